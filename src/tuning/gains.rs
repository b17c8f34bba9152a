use tracing::warn;

use crate::tuning::error::TuningError;

/// Decaying SPSA gain sequences:
///
/// * step gain `a_k = a / (k + A)^alpha`
/// * perturbation gain `c_k = c / (k + 1)^gamma`
///
/// See Spall (1998), "Implementation of the simultaneous perturbation
/// algorithm for stochastic optimization".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainSchedule {
    a: f64,
    c: f64,
    big_a: f64,
    alpha: f64,
    gamma: f64,
}

impl GainSchedule {
    pub fn new(a: f64, c: f64, big_a: f64, alpha: f64, gamma: f64) -> Result<Self, TuningError> {
        let finite_positive = [("a", a), ("c", c), ("A", big_a), ("alpha", alpha), ("gamma", gamma)];
        for (name, v) in finite_positive {
            if !v.is_finite() || v <= 0.0 {
                return Err(TuningError::config(format!(
                    "gain constant `{name}` must be finite and > 0, got {v}"
                )));
            }
        }
        if alpha > 1.0 {
            return Err(TuningError::config(format!(
                "alpha must be <= 1 or the step sizes sum to a finite value, got {alpha}"
            )));
        }

        if gamma > 1.0 / 6.0 {
            warn!("gamma = {gamma} is above 1/6, gradient bias may dominate");
        }
        if 2.0 * (alpha - gamma) <= 1.0 {
            warn!(
                "2 * (alpha - gamma) = {:.3} <= 1, noise is not guaranteed to average out",
                2.0 * (alpha - gamma)
            );
        }

        Ok(Self {
            a,
            c,
            big_a,
            alpha,
            gamma,
        })
    }

    /// Learning rate for iteration `k`.
    #[inline]
    pub fn a_k(&self, k: usize) -> f64 {
        self.a / (k as f64 + self.big_a).powf(self.alpha)
    }

    /// Perturbation magnitude for iteration `k`, before per-parameter step scaling.
    #[inline]
    pub fn c_k(&self, k: usize) -> f64 {
        self.c / (k as f64 + 1.0).powf(self.gamma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_strictly_decrease_and_stay_positive() {
        let gains = GainSchedule::new(0.5, 0.1, 100.0, 0.602, 0.101).unwrap();
        let mut prev = (f64::INFINITY, f64::INFINITY);
        for k in 0..1000 {
            let (a, c) = (gains.a_k(k), gains.c_k(k));
            assert!(a > 0.0 && c > 0.0, "gain hit zero at k = {k}");
            assert!(a < prev.0, "a_k not decreasing at k = {k}");
            assert!(c < prev.1, "c_k not decreasing at k = {k}");
            prev = (a, c);
        }
    }

    #[test]
    fn first_terms_match_formula() {
        let gains = GainSchedule::new(2.0, 1.0, 4.0, 0.5, 1.0 / 6.0).unwrap();
        assert!((gains.a_k(0) - 1.0).abs() < 1e-12);
        assert!((gains.c_k(0) - 1.0).abs() < 1e-12);
        assert!((gains.a_k(5) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn misconfiguration_is_rejected() {
        let bad = [
            (0.5, 0.1, 10.0, 0.0, 0.101),
            (0.5, 0.1, 10.0, -0.6, 0.101),
            (0.5, 0.1, 10.0, 1.5, 0.101),
            (0.5, 0.1, 10.0, 0.602, 0.0),
            (0.0, 0.1, 10.0, 0.602, 0.101),
            (0.5, -0.1, 10.0, 0.602, 0.101),
            (0.5, 0.1, 0.0, 0.602, 0.101),
            (f64::NAN, 0.1, 10.0, 0.602, 0.101),
        ];
        for (a, c, big_a, alpha, gamma) in bad {
            assert!(
                matches!(
                    GainSchedule::new(a, c, big_a, alpha, gamma),
                    Err(TuningError::Configuration(_))
                ),
                "accepted a={a} c={c} A={big_a} alpha={alpha} gamma={gamma}"
            );
        }
    }
}
