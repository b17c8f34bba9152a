use crate::tuning::{
    error::{EvaluationFailure, TuningError},
    params::ParameterSet,
};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Outcome of the games played with one parameter set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationResult {
    pub score: f64,
    /// Games behind `score`, used to weight pairs against each other.
    pub games: usize,
    /// Per-game score variance, if the match runner reports one.
    pub variance: Option<f64>,
}

impl EvaluationResult {
    pub fn new(score: f64, games: usize) -> Self {
        Self {
            score,
            games,
            variance: None,
        }
    }

    pub fn with_variance(mut self, variance: f64) -> Self {
        self.variance = Some(variance);
        self
    }

    /// Variance of `score` as an estimate of the mean. Unknown per-game
    /// variance counts as 1.
    pub fn variance_of_mean(&self) -> f64 {
        self.variance.unwrap_or(1.0) / self.games.max(1) as f64
    }
}

/// One antithetic evaluation job: the `+` and `-` candidates of a single
/// perturbation direction, to be played under identical conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct PairRequest {
    pub iteration: usize,
    pub pair: usize,
    pub plus: ParameterSet,
    pub minus: ParameterSet,
    /// Games per side.
    pub games: usize,
    /// Shared by both sides so the match runner can reuse openings/colors.
    pub seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairOutcome {
    pub plus: EvaluationResult,
    pub minus: EvaluationResult,
}

/// The noisy objective the tuner climbs. Implementations only ever receive
/// snapshots; they may be called from several threads at once.
pub trait NoisyObjective: Sync {
    fn evaluate_pair(&self, request: &PairRequest) -> Result<PairOutcome, EvaluationFailure>;
}

impl<T: NoisyObjective + ?Sized> NoisyObjective for &T {
    fn evaluate_pair(&self, request: &PairRequest) -> Result<PairOutcome, EvaluationFailure> {
        (**self).evaluate_pair(request)
    }
}

impl<T: NoisyObjective + ?Sized> NoisyObjective for Box<T> {
    fn evaluate_pair(&self, request: &PairRequest) -> Result<PairOutcome, EvaluationFailure> {
        (**self).evaluate_pair(request)
    }
}

/// Evaluates every request and returns once all of them have finished or
/// failed, results in request order.
pub fn evaluate_batch<O: NoisyObjective + ?Sized>(
    objective: &O,
    requests: &[PairRequest],
) -> Vec<Result<PairOutcome, EvaluationFailure>> {
    #[cfg(feature = "parallel")]
    let iter = requests.par_iter();
    #[cfg(not(feature = "parallel"))]
    let iter = requests.iter();

    iter.map(|req| objective.evaluate_pair(req)).collect()
}

/// Adapts a plain scoring closure `f(params, seed) -> score`. Both sides of
/// a pair get the same seed.
pub struct FnObjective<F> {
    f: F,
}

impl<F> FnObjective<F>
where
    F: Fn(&ParameterSet, u64) -> f64 + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> NoisyObjective for FnObjective<F>
where
    F: Fn(&ParameterSet, u64) -> f64 + Sync,
{
    fn evaluate_pair(&self, request: &PairRequest) -> Result<PairOutcome, EvaluationFailure> {
        let plus = (self.f)(&request.plus, request.seed);
        let minus = (self.f)(&request.minus, request.seed);
        if !plus.is_finite() || !minus.is_finite() {
            return Err(EvaluationFailure::new(
                request.pair,
                format!("non-finite score (+{plus}, -{minus})"),
            ));
        }
        Ok(PairOutcome {
            plus: EvaluationResult::new(plus, request.games),
            minus: EvaluationResult::new(minus, request.games),
        })
    }
}

/// Penalizes distance from the starting point:
/// `score - lambda * ((1 - mix) * |d|_1 + mix * |d|_2)` with `d = theta - theta0`.
///
/// Helps keep a flat or non-convex match landscape from drifting far from a
/// known-good configuration.
pub struct Regularized<O> {
    inner: O,
    origin: Vec<f64>,
    lambda: f64,
    mix: f64,
}

impl<O: NoisyObjective> Regularized<O> {
    pub fn new(inner: O, origin: &ParameterSet) -> Self {
        Self {
            inner,
            origin: origin.values(),
            lambda: 0.01,
            mix: 0.5,
        }
    }

    /// `lambda` must be finite and non-negative, `mix` is clamped to [0, 1].
    pub fn with_strength(mut self, lambda: f64, mix: f64) -> Result<Self, TuningError> {
        if !lambda.is_finite() || lambda < 0.0 {
            return Err(TuningError::config(format!(
                "regularization strength must be finite and >= 0, got {lambda}"
            )));
        }
        if mix.is_nan() {
            return Err(TuningError::config("regularization mix is NaN"));
        }
        self.lambda = lambda;
        self.mix = mix.clamp(0.0, 1.0);
        Ok(self)
    }

    pub fn penalty(&self, params: &ParameterSet) -> f64 {
        let (l1, l2sq) = params
            .iter()
            .zip(&self.origin)
            .map(|(p, &o)| p.value - o)
            .fold((0.0, 0.0), |(l1, l2), d| (l1 + d.abs(), l2 + d * d));
        self.lambda * ((1.0 - self.mix) * l1 + self.mix * l2sq.sqrt())
    }
}

impl<O: NoisyObjective> NoisyObjective for Regularized<O> {
    fn evaluate_pair(&self, request: &PairRequest) -> Result<PairOutcome, EvaluationFailure> {
        let mut outcome = self.inner.evaluate_pair(request)?;
        outcome.plus.score -= self.penalty(&request.plus);
        outcome.minus.score -= self.penalty(&request.minus);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::params::Parameter;

    fn request(x_plus: f64, x_minus: f64, pair: usize) -> PairRequest {
        let set = |x| ParameterSet::new(vec![Parameter::new("x", x, -100.0, 100.0, 1.0)]).unwrap();
        PairRequest {
            iteration: 0,
            pair,
            plus: set(x_plus),
            minus: set(x_minus),
            games: 4,
            seed: 17,
        }
    }

    #[test]
    fn fn_objective_shares_seed_between_sides() {
        let objective = FnObjective::new(|p: &ParameterSet, seed| p.get("x").unwrap() + seed as f64);
        let out = objective.evaluate_pair(&request(1.0, -1.0, 0)).unwrap();
        assert_eq!(out.plus.score, 18.0);
        assert_eq!(out.minus.score, 16.0);
        assert_eq!(out.plus.games, 4);
    }

    #[test]
    fn fn_objective_rejects_nan() {
        let objective = FnObjective::new(|_: &ParameterSet, _| f64::NAN);
        let err = objective.evaluate_pair(&request(1.0, -1.0, 3)).unwrap_err();
        assert_eq!(err.pair, 3);
    }

    #[test]
    fn batch_preserves_request_order() {
        let objective = FnObjective::new(|p: &ParameterSet, _| p.get("x").unwrap());
        let requests: Vec<_> = (0..32)
            .map(|i| request(i as f64, -(i as f64), i))
            .collect();
        let results = evaluate_batch(&objective, &requests);
        for (i, r) in results.into_iter().enumerate() {
            assert_eq!(r.unwrap().plus.score, i as f64);
        }
    }

    #[test]
    fn regularizer_penalizes_distance_from_origin() {
        let origin = ParameterSet::new(vec![Parameter::new("x", 0.0, -100.0, 100.0, 1.0)]).unwrap();
        let objective = Regularized::new(FnObjective::new(|_: &ParameterSet, _| 1.0), &origin)
            .with_strength(0.1, 0.5)
            .unwrap();
        let out = objective.evaluate_pair(&request(4.0, 0.0, 0)).unwrap();
        // 0.1 * (0.5 * 4 + 0.5 * 4)
        assert!((out.plus.score - 0.6).abs() < 1e-12);
        assert_eq!(out.minus.score, 1.0);
    }

    #[test]
    fn regularizer_rejects_bad_strength() {
        let origin = ParameterSet::new(vec![Parameter::new("x", 0.0, -1.0, 1.0, 1.0)]).unwrap();
        let flat = || FnObjective::new(|_: &ParameterSet, _| 1.0);
        for (lambda, mix) in [(-0.1, 0.5), (f64::NAN, 0.5), (f64::INFINITY, 0.5), (0.1, f64::NAN)] {
            assert!(matches!(
                Regularized::new(flat(), &origin).with_strength(lambda, mix),
                Err(TuningError::Configuration(_))
            ));
        }
        assert!(Regularized::new(flat(), &origin).with_strength(0.0, 2.0).is_ok());
    }

    #[test]
    fn unknown_variance_counts_as_unit() {
        let r = EvaluationResult::new(0.5, 8);
        assert_eq!(r.variance_of_mean(), 0.125);
        assert_eq!(r.with_variance(0.25).variance_of_mean(), 0.03125);
    }
}
