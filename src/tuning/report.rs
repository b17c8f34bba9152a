use std::{fmt, fs, path::Path};

use miette::{Context, IntoDiagnostic};
use serde::Serialize;

use crate::tuning::{
    config::ObjectiveDirection,
    params::ParameterSet,
    spsa_tuner::{IterationRecord, StopReason, TunerState, TuningWarning},
};

/// Final report of a tuning run, derived purely from its iteration trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TuningSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TunerState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    pub iterations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_iteration: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_score: Option<f64>,
    pub failed_evaluations: usize,
    pub dropped_pairs: usize,
    pub divergence_warnings: usize,
    /// Raw per-iteration scores, for plotting.
    pub score_trace: Vec<f64>,
    /// Trailing moving average of `score_trace`.
    pub smoothed_trace: Vec<f64>,
    /// Best-scoring parameters as they were evaluated.
    pub best: ParameterSet,
    /// `best`, clipped and snapped to each parameter's grid: what to put
    /// into the engine.
    pub best_final: ParameterSet,
    /// Live parameters after the last update.
    pub last: ParameterSet,
}

impl TuningSummary {
    /// Picks the best iteration (ties go to the latest, which rests on the
    /// most games) and collects the traces. With an empty history the
    /// initial parameters are reported as best.
    pub fn from_history(
        initial: &ParameterSet,
        history: &[IterationRecord],
        direction: ObjectiveDirection,
        window: usize,
    ) -> Self {
        let best_record = history.iter().fold(None::<&IterationRecord>, |best, r| match best {
            Some(b) if direction.is_better(b.score, r.score) => Some(b),
            _ => Some(r),
        });

        let best = best_record
            .map(|r| r.evaluated.clone())
            .unwrap_or_else(|| initial.clone());
        let last = history
            .last()
            .map(|r| r.updated.clone())
            .unwrap_or_else(|| initial.clone());

        let score_trace: Vec<f64> = history.iter().map(|r| r.score).collect();
        let smoothed_trace = moving_average(&score_trace, window.max(1));

        let mut failed_evaluations = 0;
        let mut dropped_pairs = 0;
        let mut divergence_warnings = 0;
        for w in history.iter().flat_map(|r| &r.warnings) {
            match w {
                TuningWarning::EvaluationFailed { .. } => failed_evaluations += 1,
                TuningWarning::PairDropped { .. } => dropped_pairs += 1,
                TuningWarning::Divergence(_) => divergence_warnings += 1,
                TuningWarning::FlatPair { .. } => {}
            }
        }

        Self {
            state: None,
            stop_reason: None,
            iterations: history.len(),
            best_iteration: best_record.map(|r| r.iteration),
            best_score: best_record.map(|r| r.score),
            failed_evaluations,
            dropped_pairs,
            divergence_warnings,
            score_trace,
            smoothed_trace,
            best_final: best.quantized(),
            best,
            last,
        }
    }

    pub fn with_outcome(mut self, state: TunerState, stop_reason: Option<StopReason>) -> Self {
        self.state = Some(state);
        self.stop_reason = stop_reason;
        self
    }

    /// Save to TOML File
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> miette::Result<()> {
        let toml_string = toml::to_string_pretty(self).into_diagnostic()?;
        fs::write(path.as_ref(), toml_string)
            .into_diagnostic()
            .with_context(|| format!("Writing summary to {}", path.as_ref().display()))
    }
}

fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for (i, &v) in values.iter().enumerate() {
        sum += v;
        if i >= window {
            sum -= values[i - window];
        }
        out.push(sum / (i + 1).min(window) as f64);
    }
    out
}

impl fmt::Display for TuningSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Results:")?;
        writeln!(f, "--------------------------------")?;
        if let Some(state) = self.state {
            write!(f, "State:       {state:?}")?;
            if let Some(reason) = self.stop_reason {
                write!(f, " ({reason:?})")?;
            }
            writeln!(f)?;
        }
        writeln!(f, "Iterations:  {}", self.iterations)?;
        match (self.best_iteration, self.best_score) {
            (Some(k), Some(score)) => writeln!(f, "Best score:  {score:.6} (iteration {k})")?,
            _ => writeln!(f, "Best score:  n/a (no completed iteration)")?,
        }
        if self.failed_evaluations + self.dropped_pairs + self.divergence_warnings > 0 {
            writeln!(
                f,
                "Warnings:    {} failed evaluation(s), {} dropped pair(s), {} divergence",
                self.failed_evaluations, self.dropped_pairs, self.divergence_warnings
            )?;
        }
        writeln!(f, "--------------------------------")?;
        writeln!(
            f,
            "{:<24} {:>12} {:>12} {:>12}   bounds",
            "name", "best", "final", "last"
        )?;
        for ((b, fin), l) in self.best.iter().zip(self.best_final.iter()).zip(self.last.iter()) {
            writeln!(
                f,
                "{:<24} {:>12.4} {:>12.4} {:>12.4}   [{}, {}]",
                b.name, b.value, fin.value, l.value, b.min, b.max
            )?;
        }
        writeln!(f, "--------------------------------")?;
        write!(f, "{}", self.best_final.to_token_string())
    }
}
