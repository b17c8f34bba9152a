pub use crate::consts::*;
pub use crate::tuning::{
    self, CommandObjective, FnObjective, NoisyObjective, ObjectiveDirection, Parameter,
    ParameterSet, Regularized, SpsaConfig, SpsaTuner, Step, StopReason, TunerState, TuningError,
    TuningSummary,
};
pub use crate::utils::{self, cli::*, log::*, prng::*};
pub use miette::{self, Context, IntoDiagnostic, Result};
pub use std::fmt::Display;
pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
