use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    tuning::{
        config::SpsaConfig,
        error::{EvaluationFailure, TuningError},
        gains::GainSchedule,
        gradient::{GradientEstimate, GradientEstimator, PairSample},
        history::EvaluationHistory,
        objective::{NoisyObjective, PairOutcome, PairRequest, evaluate_batch},
        params::ParameterSet,
        perturbation::{Perturbation, PerturbationGenerator},
        report::TuningSummary,
    },
    utils::prng::Prng,
};

/// Window of evaluations behind the running goal estimate in progress logs.
const PROGRESS_AVERAGE: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TunerState {
    Initializing,
    Iterating,
    Converged,
    Aborted,
}

impl TunerState {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Converged | Self::Aborted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    BudgetExhausted,
    Plateau,
    Cancelled,
    EvaluationFailed,
}

/// What triggered a divergence warning.
#[derive(Debug, Clone, PartialEq)]
pub enum Divergence {
    /// Parameter hit a bound on this many consecutive updates.
    ClippedAtBound { parameter: String, streak: usize },
    /// Smoothed score fell this far below its best value.
    ScoreDrop { smoothed: f64, best: f64 },
}

/// Non-fatal events, kept on the iteration they happened in.
#[derive(Debug, Clone, PartialEq)]
pub enum TuningWarning {
    EvaluationFailed {
        pair: usize,
        attempt: usize,
        reason: String,
    },
    PairDropped {
        pair: usize,
        reason: String,
    },
    FlatPair {
        pair: usize,
        retries: usize,
    },
    Divergence(Divergence),
}

/// Immutable trace entry, one per completed iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    pub iteration: usize,
    pub a_k: f64,
    pub c_k: f64,
    pub gradient: GradientEstimate,
    /// Live parameters the perturbations were centred on.
    pub evaluated: ParameterSet,
    /// Mean of every successful evaluation around `evaluated`, in objective units.
    pub score: f64,
    /// Live parameters after this iteration's update.
    pub updated: ParameterSet,
    /// Best `score` seen up to and including this iteration.
    pub best_score: f64,
    pub pairs_used: usize,
    pub pairs_dropped: usize,
    pub warnings: Vec<TuningWarning>,
}

/// Adapters are not trusted to report finite numbers: a NaN reaching the
/// gradient would carry the live set outside its bounds.
fn reject_non_finite(
    pair: usize,
    result: Result<PairOutcome, EvaluationFailure>,
) -> Result<PairOutcome, EvaluationFailure> {
    let outcome = result?;
    let sides = [("+", outcome.plus), ("-", outcome.minus)];
    for (side, r) in sides {
        if !r.score.is_finite() {
            return Err(EvaluationFailure::new(
                pair,
                format!("non-finite score {} on the {side} side", r.score),
            ));
        }
        if r.variance.is_some_and(|v| !v.is_finite() || v < 0.0) {
            return Err(EvaluationFailure::new(
                pair,
                format!("invalid variance {:?} on the {side} side", r.variance),
            ));
        }
    }
    Ok(outcome)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Finished(TunerState),
}

/// Owns the live parameter set and drives SPSA iterations against a noisy
/// objective until the budget runs out, progress stalls, or it is stopped.
///
/// Iterations are strictly sequential. Within one, all pairs are evaluated
/// behind a barrier before any update is applied.
pub struct SpsaTuner<O> {
    config: SpsaConfig,
    gains: GainSchedule,
    objective: O,
    initial: ParameterSet,
    live: ParameterSet,
    generator: PerturbationGenerator,
    seeds: Prng,
    estimator: GradientEstimator,
    history: Vec<IterationRecord>,
    evaluations: EvaluationHistory,
    state: TunerState,
    stop_reason: Option<StopReason>,
    cancel: Arc<AtomicBool>,
    clip_streaks: Vec<usize>,
    best_smoothed: Option<f64>,
    last_improvement: usize,
}

impl<O: NoisyObjective> SpsaTuner<O> {
    /// Validates the configuration and the starting point. Nothing is
    /// evaluated until [`SpsaTuner::run`] or [`SpsaTuner::step`].
    pub fn new(
        initial: ParameterSet,
        objective: O,
        config: SpsaConfig,
    ) -> Result<Self, TuningError> {
        config.validate()?;
        if initial.is_empty() {
            return Err(TuningError::config("parameter set is empty"));
        }
        let gains = config.gains()?;

        let mut root = Prng::init(config.random_seed);
        let generator = PerturbationGenerator::new(root.fork());
        let seeds = root.fork();
        let estimator = GradientEstimator::new(config.weighting, config.direction)
            .with_momentum(config.momentum);

        debug!(
            "SpsaTuner: {} parameters, a = {}, c = {}, A = {}, alpha = {}, gamma = {}",
            initial.len(),
            config.a,
            config.c,
            config.stability_offset(),
            config.alpha,
            config.gamma
        );

        Ok(Self {
            gains,
            objective,
            live: initial.clone(),
            clip_streaks: vec![0; initial.len()],
            initial,
            generator,
            seeds,
            estimator,
            history: Vec::with_capacity(config.max_iterations.min(1 << 16)),
            evaluations: EvaluationHistory::default(),
            state: TunerState::Initializing,
            stop_reason: None,
            cancel: Arc::new(AtomicBool::new(false)),
            best_smoothed: None,
            last_improvement: 0,
            config,
        })
    }

    /// Shares an external cancellation flag. Setting it to `true` stops the
    /// tuner at the next iteration boundary.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn state(&self) -> TunerState {
        self.state
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn config(&self) -> &SpsaConfig {
        &self.config
    }

    pub fn initial(&self) -> &ParameterSet {
        &self.initial
    }

    /// Current live parameters.
    pub fn live(&self) -> &ParameterSet {
        &self.live
    }

    pub fn history(&self) -> &[IterationRecord] {
        &self.history
    }

    pub fn evaluations(&self) -> &EvaluationHistory {
        &self.evaluations
    }

    pub fn summary(&self) -> TuningSummary {
        TuningSummary::from_history(
            &self.initial,
            &self.history,
            self.config.direction,
            self.smoothing_window(),
        )
        .with_outcome(self.state, self.stop_reason)
    }

    /// Iterates until the tuner converges or aborts.
    ///
    /// Cancellation ends in `Ok(TunerState::Aborted)`. An iteration in which
    /// every pair failed ends in `Err`, with the history so far still
    /// available through [`SpsaTuner::history`].
    pub fn run(&mut self) -> Result<TunerState, TuningError> {
        info!(
            "Starting SPSA: {} parameters, {} iterations, {} pair(s) per iteration",
            self.live.len(),
            self.config.max_iterations,
            self.config.pairs_per_iteration
        );
        loop {
            if let Step::Finished(state) = self.step()? {
                return Ok(state);
            }
        }
    }

    /// Runs a single iteration, or reports that the tuner has finished.
    #[instrument(skip_all, fields(k = self.history.len()))]
    pub fn step(&mut self) -> Result<Step, TuningError> {
        if self.state.is_finished() {
            return Ok(Step::Finished(self.state));
        }
        self.state = TunerState::Iterating;

        if self.cancel.load(Ordering::Acquire) {
            info!("Cancellation requested, stopping at iteration boundary");
            return Ok(self.finish(TunerState::Aborted, StopReason::Cancelled));
        }
        let k = self.history.len();
        if k >= self.config.max_iterations {
            return Ok(self.finish(TunerState::Converged, StopReason::BudgetExhausted));
        }

        let a_k = self.gains.a_k(k);
        let c_k = self.gains.c_k(k);
        let base = self.live.clone();
        let mut warnings = Vec::new();

        let mut requests = self.build_requests(k, &base, c_k);
        let (mut outcomes, failures) = self.evaluate_with_retries(&requests, &mut warnings);

        let succeeded = outcomes.iter().filter(|o| o.is_some()).count();
        if succeeded == 0 {
            error!("Iteration {k}: every pair failed, aborting");
            self.finish(TunerState::Aborted, StopReason::EvaluationFailed);
            return Err(TuningError::AllPairsFailed {
                iteration: k,
                failures,
            });
        }
        for f in failures {
            warn!("Iteration {k}: dropping pair {} ({})", f.pair, f.reason);
            warnings.push(TuningWarning::PairDropped {
                pair: f.pair,
                reason: f.reason,
            });
        }

        self.retry_flat_pairs(&mut requests, &mut outcomes, &mut warnings);

        let samples: Vec<PairSample> = requests
            .iter()
            .zip(&outcomes)
            .filter_map(|(req, out)| {
                out.map(|outcome| PairSample {
                    perturbation: Perturbation::effective(&req.plus, &req.minus),
                    outcome,
                })
            })
            .collect();

        let mut score_sum = 0.0;
        for s in &samples {
            self.evaluations.push(s.outcome.plus.score);
            self.evaluations.push(s.outcome.minus.score);
            score_sum += s.outcome.plus.score + s.outcome.minus.score;
        }
        let score = score_sum / (2 * samples.len()) as f64;

        let gradient = self.estimator.estimate(base.len(), &samples);
        let delta: Vec<f64> = gradient.components.iter().map(|g| a_k * g).collect();
        let clipped = self.live.step_by(&delta);
        self.track_clipping(&clipped, &mut warnings);

        let plateaued = self.update_smoothing(score, &mut warnings);

        let direction = self.config.direction;
        let best_score = match self.history.last() {
            Some(prev) if !direction.is_better(score, prev.best_score) => prev.best_score,
            _ => score,
        };

        let record = IterationRecord {
            iteration: k,
            a_k,
            c_k,
            evaluated: base,
            score,
            updated: self.live.clone(),
            best_score,
            pairs_used: samples.len(),
            pairs_dropped: self.config.pairs_per_iteration - samples.len(),
            gradient,
            warnings,
        };
        debug!(
            "iter {k}: a_k = {a_k:.5}, c_k = {c_k:.5}, score = {score:.4}, |g| = {:.4}, theta = {}",
            record.gradient.norm(),
            record.updated
        );
        self.history.push(record);

        let iter = k + 1;
        if iter < 10 || iter % 100 == 0 {
            if let Some(goal) = self.evaluations.average_last(PROGRESS_AVERAGE) {
                info!("iter = {iter}, goal = {goal:.4}");
            }
        }

        if plateaued {
            info!("Score plateaued after {iter} iterations");
            return Ok(self.finish(TunerState::Converged, StopReason::Plateau));
        }
        if iter >= self.config.max_iterations {
            return Ok(self.finish(TunerState::Converged, StopReason::BudgetExhausted));
        }
        Ok(Step::Continue)
    }

    fn finish(&mut self, state: TunerState, reason: StopReason) -> Step {
        self.state = state;
        self.stop_reason = Some(reason);
        debug!("Tuner finished: {state:?} ({reason:?})");
        Step::Finished(state)
    }

    fn smoothing_window(&self) -> usize {
        if self.config.convergence_window > 0 {
            self.config.convergence_window
        } else {
            PROGRESS_AVERAGE
        }
    }

    fn build_requests(&mut self, k: usize, base: &ParameterSet, c_k: f64) -> Vec<PairRequest> {
        (0..self.config.pairs_per_iteration)
            .map(|pair| {
                let perturbation = self.generator.next(base, c_k);
                PairRequest {
                    iteration: k,
                    pair,
                    plus: base.apply_perturbation(&perturbation, 1.0).quantized(),
                    minus: base.apply_perturbation(&perturbation, -1.0).quantized(),
                    games: self.config.games_per_pair,
                    seed: self.seeds.rand(),
                }
            })
            .collect()
    }

    /// Evaluates all pairs, re-submitting failed ones up to `max_retries`
    /// times. Returns per-pair outcomes and the failures that never recovered.
    fn evaluate_with_retries(
        &self,
        requests: &[PairRequest],
        warnings: &mut Vec<TuningWarning>,
    ) -> (Vec<Option<PairOutcome>>, Vec<EvaluationFailure>) {
        let mut outcomes = vec![None; requests.len()];
        let mut pending: Vec<usize> = (0..requests.len()).collect();
        let mut last_failure: Vec<Option<EvaluationFailure>> = vec![None; requests.len()];

        for attempt in 0..=self.config.max_retries {
            if pending.is_empty() {
                break;
            }
            let batch: Vec<PairRequest> = pending.iter().map(|&i| requests[i].clone()).collect();
            let results = evaluate_batch(&self.objective, &batch);

            let mut still_pending = Vec::new();
            for (i, result) in pending.into_iter().zip(results) {
                match reject_non_finite(i, result) {
                    Ok(outcome) => outcomes[i] = Some(outcome),
                    Err(failure) => {
                        warn!(
                            "Pair {i} failed (attempt {}): {}",
                            attempt + 1,
                            failure.reason
                        );
                        warnings.push(TuningWarning::EvaluationFailed {
                            pair: i,
                            attempt,
                            reason: failure.reason.clone(),
                        });
                        last_failure[i] = Some(failure);
                        still_pending.push(i);
                    }
                }
            }
            pending = still_pending;
        }

        let failures = pending
            .into_iter()
            .filter_map(|i| last_failure[i].take())
            .collect();
        (outcomes, failures)
    }

    /// Pairs whose two scores tie carry no gradient information; replay them
    /// with a fresh seed, up to `flat_retries` times.
    fn retry_flat_pairs(
        &mut self,
        requests: &mut [PairRequest],
        outcomes: &mut [Option<PairOutcome>],
        warnings: &mut Vec<TuningWarning>,
    ) {
        let mut retries = vec![0usize; requests.len()];
        for _ in 0..self.config.flat_retries {
            let flat: Vec<usize> = outcomes
                .iter()
                .enumerate()
                .filter(|(_, o)| o.is_some_and(|o| o.plus.score == o.minus.score))
                .map(|(i, _)| i)
                .collect();
            if flat.is_empty() {
                break;
            }

            for &i in &flat {
                requests[i].seed = self.seeds.rand();
                retries[i] += 1;
            }
            let batch: Vec<PairRequest> = flat.iter().map(|&i| requests[i].clone()).collect();
            for (i, result) in flat.into_iter().zip(evaluate_batch(&self.objective, &batch)) {
                // a failed replay keeps the tied result, it is still a valid sample
                if let Ok(outcome) = reject_non_finite(i, result) {
                    outcomes[i] = Some(outcome);
                }
            }
        }

        for (pair, &n) in retries.iter().enumerate() {
            if n > 0 {
                debug!("Pair {pair} replayed {n} time(s) after a tie");
                warnings.push(TuningWarning::FlatPair { pair, retries: n });
            }
        }
    }

    fn track_clipping(&mut self, clipped: &[bool], warnings: &mut Vec<TuningWarning>) {
        let limit = self.config.divergence_clip_streak;
        for (i, &hit) in clipped.iter().enumerate() {
            if !hit {
                self.clip_streaks[i] = 0;
                continue;
            }
            self.clip_streaks[i] += 1;
            let streak = self.clip_streaks[i];
            if limit > 0 && streak >= limit && streak % limit == 0 {
                let parameter = self
                    .live
                    .names()
                    .nth(i)
                    .unwrap_or_default()
                    .to_string();
                warn!("`{parameter}` clipped at a bound {streak} updates in a row");
                warnings.push(TuningWarning::Divergence(Divergence::ClippedAtBound {
                    parameter,
                    streak,
                }));
            }
        }
    }

    /// Folds the newest iteration score into the smoothed trace. Returns
    /// whether the plateau rule fires; a large drop adds a divergence warning.
    fn update_smoothing(&mut self, score: f64, warnings: &mut Vec<TuningWarning>) -> bool {
        let drop_limit = self.config.divergence_score_drop;
        if self.config.convergence_window == 0 && drop_limit.is_none() {
            return false;
        }
        let window = self.smoothing_window();
        let k = self.history.len();
        if k + 1 < window {
            return false;
        }

        let direction = self.config.direction;
        let earlier: f64 = self.history[k + 1 - window..]
            .iter()
            .map(|r| direction.orient(r.score))
            .sum();
        let smoothed = (earlier + direction.orient(score)) / window as f64;

        match self.best_smoothed {
            Some(best) if smoothed <= best + self.config.convergence_threshold => {
                if let Some(limit) = drop_limit {
                    if best - smoothed > limit {
                        let drop = Divergence::ScoreDrop {
                            smoothed: direction.orient(smoothed),
                            best: direction.orient(best),
                        };
                        warn!("Score trace diverging: {drop:?}");
                        warnings.push(TuningWarning::Divergence(drop));
                    }
                }
            }
            _ => {
                self.best_smoothed = Some(smoothed);
                self.last_improvement = k;
            }
        }

        self.config.convergence_window > 0 && k - self.last_improvement >= window
    }
}
