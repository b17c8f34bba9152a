//! Simultaneous perturbation stochastic approximation (SPSA) for parameters
//! that can only be measured through noisy matches.
//!
//! Each iteration perturbs every parameter at once along a random ±1
//! direction, plays both sides of the perturbation against the objective,
//! and steps the live set along the resulting two-evaluation gradient
//! estimate. See [`SpsaTuner`] for the loop itself.

pub mod command;
pub mod config;
pub mod error;
pub mod gains;
pub mod gradient;
pub mod history;
pub mod objective;
pub mod params;
pub mod perturbation;
pub mod report;
pub mod spsa_tuner;

pub use command::CommandObjective;
pub use config::{ObjectiveDirection, SpsaConfig};
pub use error::{EvaluationFailure, TuningError};
pub use gains::GainSchedule;
pub use gradient::{GradientEstimate, GradientEstimator, PairSample, PairWeighting};
pub use objective::{
    EvaluationResult, FnObjective, NoisyObjective, PairOutcome, PairRequest, Regularized,
};
pub use params::{Parameter, ParameterSet};
pub use perturbation::{Perturbation, PerturbationGenerator};
pub use report::TuningSummary;
pub use spsa_tuner::{
    Divergence, IterationRecord, SpsaTuner, Step, StopReason, TunerState, TuningWarning,
};
