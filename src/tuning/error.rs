use miette::Diagnostic;
use thiserror::Error;

/// Fatal tuning errors. Any of these stops the loop; history gathered up to
/// that point stays readable on the tuner.
#[derive(Debug, Clone, PartialEq, Error, Diagnostic)]
pub enum TuningError {
    #[error("invalid configuration: {0}")]
    #[diagnostic(
        code(spsa::configuration),
        help("check the gain constants and the parameter bounds")
    )]
    Configuration(String),

    #[error("unknown parameter `{0}`")]
    #[diagnostic(code(spsa::unknown_parameter))]
    UnknownParameter(String),

    #[error("all {} pair(s) failed in iteration {iteration}", failures.len())]
    #[diagnostic(
        code(spsa::all_pairs_failed),
        help("the match runner did not return a single usable result, check its logs")
    )]
    AllPairsFailed {
        iteration: usize,
        failures: Vec<EvaluationFailure>,
    },
}

impl TuningError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// A paired evaluation that could not complete (engine crash, timeout,
/// garbage output). Recoverable: the loop retries or drops the pair.
#[derive(Debug, Clone, PartialEq, Error, Diagnostic)]
#[error("evaluation of pair {pair} failed: {reason}")]
#[diagnostic(code(spsa::evaluation_failure))]
pub struct EvaluationFailure {
    pub pair: usize,
    pub reason: String,
}

impl EvaluationFailure {
    pub fn new(pair: usize, reason: impl Into<String>) -> Self {
        Self {
            pair,
            reason: reason.into(),
        }
    }
}
