use serde::{Deserialize, Serialize};

use crate::tuning::{
    config::ObjectiveDirection, objective::PairOutcome, perturbation::Perturbation,
};

/// How the per-pair estimates of one iteration are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairWeighting {
    /// Plain component-wise average.
    #[default]
    Mean,
    /// Weight each pair by `1 / var(s+ - s-)`, from the reported game counts
    /// and per-game variances. Pairs that played more games count more.
    InverseVariance,
}

/// One evaluated direction: the realized perturbation and the scores it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PairSample {
    pub perturbation: Perturbation,
    pub outcome: PairOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradientEstimate {
    /// Ascent direction in "higher is better" units, one entry per parameter.
    pub components: Vec<f64>,
    /// False where no pair perturbed the parameter; the component is zero.
    pub perturbed: Vec<bool>,
    pub pairs: usize,
}

impl GradientEstimate {
    pub fn norm(&self) -> f64 {
        self.components.iter().map(|g| g * g).sum::<f64>().sqrt()
    }
}

/// SPSA difference-quotient estimator, averaged over several independent
/// directions per iteration, with optional momentum across iterations.
#[derive(Debug, Clone)]
pub struct GradientEstimator {
    weighting: PairWeighting,
    direction: ObjectiveDirection,
    momentum: f64,
    previous: Option<Vec<f64>>,
}

impl GradientEstimator {
    pub fn new(weighting: PairWeighting, direction: ObjectiveDirection) -> Self {
        Self {
            weighting,
            direction,
            momentum: 0.0,
            previous: None,
        }
    }

    /// Blend `momentum` of the previous estimate into each new one.
    pub fn with_momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }

    fn weight(&self, outcome: &PairOutcome) -> f64 {
        match self.weighting {
            PairWeighting::Mean => 1.0,
            PairWeighting::InverseVariance => {
                let var = outcome.plus.variance_of_mean() + outcome.minus.variance_of_mean();
                1.0 / var.max(f64::EPSILON)
            }
        }
    }

    /// `g_i = (s+ - s-) / (2 c_i)` per pair, then a weighted component-wise
    /// average. A pair with `c_i == 0` says nothing about parameter `i`.
    pub fn estimate(&mut self, num_params: usize, samples: &[PairSample]) -> GradientEstimate {
        let mut weighted_sum = vec![0.0; num_params];
        let mut weight_total = vec![0.0; num_params];

        for sample in samples {
            let w = self.weight(&sample.outcome);
            let diff = self.direction.orient(sample.outcome.plus.score)
                - self.direction.orient(sample.outcome.minus.score);

            for (i, &c) in sample.perturbation.components().iter().enumerate() {
                if c == 0.0 {
                    continue;
                }
                weighted_sum[i] += w * diff / (2.0 * c);
                weight_total[i] += w;
            }
        }

        let perturbed: Vec<bool> = weight_total.iter().map(|&w| w > 0.0).collect();
        let mut components: Vec<f64> = weighted_sum
            .iter()
            .zip(&weight_total)
            .map(|(&s, &w)| if w > 0.0 { s / w } else { 0.0 })
            .collect();

        if self.momentum > 0.0 {
            if let Some(prev) = &self.previous {
                for (g, &p) in components.iter_mut().zip(prev) {
                    *g = (1.0 - self.momentum) * *g + self.momentum * p;
                }
            }
            self.previous = Some(components.clone());
        }

        GradientEstimate {
            components,
            perturbed,
            pairs: samples.len(),
        }
    }
}
