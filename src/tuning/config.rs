use std::{fs, path::Path};

use miette::{Context, IntoDiagnostic};
use serde::{Deserialize, Serialize};

use crate::tuning::{error::TuningError, gains::GainSchedule, gradient::PairWeighting};

/// Whether the objective's scores should be driven up (match score, Elo)
/// or down (a loss).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveDirection {
    #[default]
    Maximize,
    Minimize,
}

impl ObjectiveDirection {
    /// Maps a raw score to "higher is better".
    #[inline]
    pub fn orient(self, score: f64) -> f64 {
        match self {
            Self::Maximize => score,
            Self::Minimize => -score,
        }
    }

    #[inline]
    pub fn is_better(self, candidate: f64, incumbent: f64) -> bool {
        self.orient(candidate) > self.orient(incumbent)
    }
}

/// Every knob of a tuning run. All fields have defaults so a TOML file only
/// needs the ones it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpsaConfig {
    /// Step gain numerator.
    pub a: f64,
    /// Perturbation gain numerator.
    pub c: f64,
    /// Stability offset of the step gain. `None` means 10% of `max_iterations`.
    #[serde(rename = "A", skip_serializing_if = "Option::is_none")]
    pub big_a: Option<f64>,
    pub alpha: f64,
    pub gamma: f64,

    /// Independent perturbation directions evaluated per iteration.
    pub pairs_per_iteration: usize,
    /// Games each side of a pair plays.
    pub games_per_pair: usize,
    pub max_iterations: usize,

    /// Plateau detection window in iterations, 0 disables it.
    pub convergence_window: usize,
    /// Minimum gain of the smoothed score that still counts as progress.
    pub convergence_threshold: f64,

    pub random_seed: u64,

    /// Retries of a failed pair before it is dropped.
    pub max_retries: usize,
    /// Re-evaluations, with a fresh seed, of a pair whose two scores tie.
    pub flat_retries: usize,
    /// Fraction of the previous gradient blended into the new one, in [0, 1).
    pub momentum: f64,
    pub weighting: PairWeighting,
    pub direction: ObjectiveDirection,

    /// Consecutive clipped updates of one parameter before a divergence warning, 0 disables.
    pub divergence_clip_streak: usize,
    /// Drop of the smoothed score below its best that raises a divergence warning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub divergence_score_drop: Option<f64>,
}

impl Default for SpsaConfig {
    fn default() -> Self {
        Self {
            a: 0.5,
            c: 0.1,
            big_a: None,
            alpha: 0.602,
            gamma: 0.101,
            pairs_per_iteration: 1,
            games_per_pair: 6,
            max_iterations: 1000,
            convergence_window: 0,
            convergence_threshold: 0.0,
            random_seed: 1,
            max_retries: 2,
            flat_retries: 0,
            momentum: 0.0,
            weighting: PairWeighting::Mean,
            direction: ObjectiveDirection::Maximize,
            divergence_clip_streak: 10,
            divergence_score_drop: None,
        }
    }
}

impl SpsaConfig {
    pub fn stability_offset(&self) -> f64 {
        self.big_a
            .unwrap_or_else(|| (self.max_iterations as f64 / 10.0).max(1.0))
    }

    pub fn gains(&self) -> Result<GainSchedule, TuningError> {
        GainSchedule::new(
            self.a,
            self.c,
            self.stability_offset(),
            self.alpha,
            self.gamma,
        )
    }

    /// Checks everything that can be checked before the first evaluation.
    pub fn validate(&self) -> Result<(), TuningError> {
        self.gains()?;
        if self.pairs_per_iteration == 0 {
            return Err(TuningError::config("pairs_per_iteration must be at least 1"));
        }
        if self.games_per_pair == 0 {
            return Err(TuningError::config("games_per_pair must be at least 1"));
        }
        if self.max_iterations == 0 {
            return Err(TuningError::config("max_iterations must be at least 1"));
        }
        if !self.convergence_threshold.is_finite() || self.convergence_threshold < 0.0 {
            return Err(TuningError::config(format!(
                "convergence_threshold must be finite and >= 0, got {}",
                self.convergence_threshold
            )));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(TuningError::config(format!(
                "momentum must be in [0, 1), got {}",
                self.momentum
            )));
        }
        if let Some(drop) = self.divergence_score_drop {
            if !drop.is_finite() || drop <= 0.0 {
                return Err(TuningError::config(format!(
                    "divergence_score_drop must be finite and > 0, got {drop}"
                )));
            }
        }
        Ok(())
    }

    /// Save to TOML File
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> miette::Result<()> {
        let toml_string = toml::to_string_pretty(self).into_diagnostic()?;
        fs::write(path, toml_string).into_diagnostic()?;
        Ok(())
    }

    /// Load from a TOML File
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> miette::Result<Self> {
        let file_content = fs::read_to_string(path.as_ref())
            .into_diagnostic()
            .with_context(|| format!("Reading tuner config from {}", path.as_ref().display()))?;
        let config: Self = toml::from_str(&file_content).into_diagnostic()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(SpsaConfig::default().validate().is_ok());
    }

    #[test]
    fn stability_offset_defaults_to_tenth_of_budget() {
        let config = SpsaConfig {
            max_iterations: 500,
            ..Default::default()
        };
        assert_eq!(config.stability_offset(), 50.0);
        let tiny = SpsaConfig {
            max_iterations: 3,
            ..Default::default()
        };
        assert_eq!(tiny.stability_offset(), 1.0);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let text = r#"
            a = 2.0
            A = 20.0
            pairs_per_iteration = 4
            weighting = "inverse_variance"
            direction = "minimize"
        "#;
        let config: SpsaConfig = toml::from_str(text).unwrap();
        assert_eq!(config.a, 2.0);
        assert_eq!(config.big_a, Some(20.0));
        assert_eq!(config.pairs_per_iteration, 4);
        assert_eq!(config.weighting, PairWeighting::InverseVariance);
        assert_eq!(config.direction, ObjectiveDirection::Minimize);
        assert_eq!(config.gamma, 0.101);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<SpsaConfig>("learning_rate = 1.0").is_err());
    }

    #[test]
    fn invalid_knobs_are_configuration_errors() {
        let cases = [
            SpsaConfig {
                alpha: -0.1,
                ..Default::default()
            },
            SpsaConfig {
                pairs_per_iteration: 0,
                ..Default::default()
            },
            SpsaConfig {
                momentum: 1.0,
                ..Default::default()
            },
            SpsaConfig {
                big_a: Some(0.0),
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(matches!(
                config.validate(),
                Err(TuningError::Configuration(_))
            ));
        }
    }

    #[test]
    fn direction_orients_scores() {
        assert!(ObjectiveDirection::Maximize.is_better(1.0, 0.0));
        assert!(ObjectiveDirection::Minimize.is_better(0.0, 1.0));
    }
}
