use crate::{tuning::params::ParameterSet, utils::prng::Prng};

/// Signed per-parameter perturbation magnitudes for one SPSA direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Perturbation {
    components: Vec<f64>,
}

impl Perturbation {
    pub fn from_components(components: Vec<f64>) -> Self {
        Self { components }
    }

    pub fn components(&self) -> &[f64] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// The perturbation that was actually realized between two candidates,
    /// `(plus - minus) / 2`. Differs from the drawn one when a candidate was
    /// clipped at a bound or snapped to a discrete grid.
    pub fn effective(plus: &ParameterSet, minus: &ParameterSet) -> Self {
        let components = plus
            .iter()
            .zip(minus.iter())
            .map(|(p, m)| (p.value - m.value) / 2.0)
            .collect();
        Self { components }
    }
}

/// Draws Rademacher (±1) directions scaled by `c_k * step` for each parameter.
/// Discrete parameters move by at least one grid step, otherwise rounding
/// would collapse both candidates onto the same value once `c_k < 0.5`.
///
/// Holds no memory of previous draws; the only state is the PRNG.
#[derive(Debug, Clone)]
pub struct PerturbationGenerator {
    rng: Prng,
}

impl PerturbationGenerator {
    pub fn new(rng: Prng) -> Self {
        Self { rng }
    }

    pub fn next(&mut self, params: &ParameterSet, c_k: f64) -> Perturbation {
        let components = params
            .iter()
            .map(|p| {
                // draw even for frozen parameters so the sign stream does not
                // shift when a step is set to zero
                let sign = self.rng.pm_one();
                let magnitude = if p.discrete {
                    (c_k * p.step).max(p.step)
                } else {
                    c_k * p.step
                };
                sign * magnitude
            })
            .collect();
        Perturbation { components }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::params::Parameter;

    fn params() -> ParameterSet {
        ParameterSet::new(vec![
            Parameter::new("a", 0.0, -10.0, 10.0, 2.0),
            Parameter::new("b", 0.0, -10.0, 10.0, 0.5),
            Parameter::new("frozen", 0.0, -10.0, 10.0, 0.0),
        ])
        .unwrap()
    }

    #[test]
    fn magnitudes_follow_step_and_gain() {
        let mut generator = PerturbationGenerator::new(Prng::init(3));
        let params = params();
        for _ in 0..50 {
            let p = generator.next(&params, 0.25);
            let c = p.components();
            assert_eq!(c[0].abs(), 0.5);
            assert_eq!(c[1].abs(), 0.125);
            assert_eq!(c[2], 0.0);
        }
    }

    #[test]
    fn signs_are_mean_zero() {
        let mut generator = PerturbationGenerator::new(Prng::init(11));
        let params = params();
        let draws = 20_000;
        let sum: f64 = (0..draws)
            .map(|_| generator.next(&params, 1.0).components()[0].signum())
            .sum();
        assert!((sum / draws as f64).abs() < 0.03);
    }

    #[test]
    fn discrete_parameters_move_at_least_one_step() {
        let params = ParameterSet::new(vec![Parameter::integer("depth", 4, 1, 12)]).unwrap();
        let mut generator = PerturbationGenerator::new(Prng::init(5));
        for c_k in [0.01, 0.1, 0.49, 3.0] {
            let delta = generator.next(&params, c_k);
            assert_eq!(delta.components()[0].abs(), c_k.max(1.0));

            let plus = params.apply_perturbation(&delta, 1.0).quantized();
            let minus = params.apply_perturbation(&delta, -1.0).quantized();
            let realized = Perturbation::effective(&plus, &minus);
            assert!(
                realized.components()[0].abs() >= 1.0,
                "c_k = {c_k} collapsed to {:?}",
                realized.components()
            );
        }
    }

    #[test]
    fn effective_reflects_clipping() {
        let params = ParameterSet::new(vec![Parameter::new("x", 9.5, 0.0, 10.0, 1.0)]).unwrap();
        let p = Perturbation::from_components(vec![1.0]);
        let plus = params.apply_perturbation(&p, 1.0);
        let minus = params.apply_perturbation(&p, -1.0);
        assert_eq!(Perturbation::effective(&plus, &minus).components(), &[0.75]);
    }
}
