pub mod prelude;
pub mod tuning;
pub mod utils;

pub mod consts {
    /// Version string with the git description, set by `build.rs`.
    pub const APP_VERSION: &str = env!("APP_VERSION");

    /// Default bounds for parameters given as bare `name value` tokens.
    pub const DEFAULT_TOKEN_MIN: f64 = f64::NEG_INFINITY;
    pub const DEFAULT_TOKEN_MAX: f64 = f64::INFINITY;
    pub const DEFAULT_TOKEN_STEP: f64 = 1.0;
}
