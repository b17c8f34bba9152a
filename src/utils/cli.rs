use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use miette::ensure;
use tracing::Level;

use crate::consts::{APP_VERSION, DEFAULT_TOKEN_MAX, DEFAULT_TOKEN_MIN, DEFAULT_TOKEN_STEP};
use crate::tuning::{ParameterSet, SpsaConfig};

#[derive(Parser, Debug)]
#[command(name = env!("CARGO_PKG_NAME"), version = APP_VERSION, about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Cli {
    /// Console log level
    #[arg(short, long, global = true, default_value_t = Level::INFO)]
    pub log_level: Level,

    /// Also write debug logs to a timestamped file in /tmp/spsa_tune_logs
    #[arg(long, global = true, default_value = "false")]
    pub log_file: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Tune parameters against an external match script
    ///
    /// The script is called as `<command> <games> <seed> NAME VALUE ...` and
    /// must print the average score of the candidate on its last line.
    Run {
        /// Match script, split like a shell command line
        #[arg(short = 'e', long)]
        command: String,

        #[command(flatten)]
        params: ParamArgs,

        #[command(flatten)]
        tuner: TunerArgs,

        /// Penalize distance from the starting parameters with this strength
        #[arg(long)]
        regularize: Option<f64>,

        /// L1/L2 mix of the regularization penalty (0 = pure L1, 1 = pure L2)
        #[arg(long, default_value_t = 0.5)]
        mix: f64,
    },

    /// Tune a synthetic noisy quadratic to sanity check gain settings
    Demo {
        /// Location of the optimum in every dimension
        #[arg(long, default_value_t = 7.0)]
        target: f64,

        /// Number of parameters
        #[arg(long, default_value_t = 1)]
        dims: usize,

        /// Amplitude of the uniform noise added to each evaluation
        #[arg(long, default_value_t = 0.1)]
        noise: f64,

        /// Starting value of every parameter
        #[arg(long, default_value_t = 2.0)]
        start: f64,

        #[command(flatten)]
        tuner: TunerArgs,
    },

    /// Validate a config and parameter file, and print the gain schedule
    Check {
        #[command(flatten)]
        params: ParamArgs,

        /// Tuner config (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Rows of the gain schedule to print
        #[arg(long, default_value_t = 10)]
        rows: usize,
    },
}

/// Where the starting parameters come from.
#[derive(Args, Debug, Clone)]
pub struct ParamArgs {
    /// Parameter file (TOML, a list of [[parameter]] tables)
    #[arg(short, long, conflicts_with = "tokens")]
    pub params: Option<PathBuf>,

    /// Parameters inline, as "NAME VALUE NAME VALUE ..."
    #[arg(short, long)]
    pub tokens: Option<String>,

    /// Lower bound for inline parameters
    #[arg(long, default_value_t = DEFAULT_TOKEN_MIN, allow_negative_numbers = true)]
    pub min: f64,

    /// Upper bound for inline parameters
    #[arg(long, default_value_t = DEFAULT_TOKEN_MAX, allow_negative_numbers = true)]
    pub max: f64,

    /// Perturbation scale for inline parameters
    #[arg(long, default_value_t = DEFAULT_TOKEN_STEP)]
    pub step: f64,
}

impl ParamArgs {
    pub fn load(&self) -> miette::Result<ParameterSet> {
        match (&self.params, &self.tokens) {
            (Some(path), _) => ParameterSet::load_from_file(path),
            (None, Some(tokens)) => {
                Ok(ParameterSet::from_tokens(tokens, self.min, self.max, self.step)?)
            }
            (None, None) => Err(miette::miette!(
                help = "pass --params <file> or --tokens \"NAME VALUE ...\"",
                "No parameters to tune"
            )),
        }
    }
}

/// Knobs shared by every subcommand that runs the tuner. Flags override the
/// config file.
#[derive(Args, Debug, Clone)]
pub struct TunerArgs {
    /// Tuner config (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(short = 'n', long)]
    pub iterations: Option<usize>,

    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Number of threads to use (0 = auto-detect/all-cores)
    #[arg(long, default_value_t = 0)]
    pub threads: usize,

    /// Write the run summary here (TOML)
    #[arg(short = 'o', long)]
    pub summary: Option<PathBuf>,
}

impl TunerArgs {
    pub fn load_config(&self) -> miette::Result<SpsaConfig> {
        let mut config = match &self.config {
            Some(path) => SpsaConfig::load_from_file(path)?,
            None => SpsaConfig::default(),
        };
        if let Some(n) = self.iterations {
            config.max_iterations = n;
        }
        if let Some(seed) = self.seed {
            config.random_seed = seed;
        }
        ensure!(
            config.max_iterations > 0,
            "max_iterations must be at least 1"
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_with_inline_tokens() {
        let cli = Cli::try_parse_from([
            "spsa-tune",
            "run",
            "-e",
            "python match.py",
            "--tokens",
            "QueenValue 10 RookValue 6",
            "--min",
            "-5",
            "--max",
            "20",
            "-n",
            "50",
        ])
        .unwrap();

        let Commands::Run { params, tuner, .. } = cli.command else {
            panic!("expected run");
        };
        let set = params.load().unwrap();
        assert_eq!(set.to_token_string(), "QueenValue 10 RookValue 6");
        assert_eq!(set.parameter("RookValue").unwrap().min, -5.0);
        assert_eq!(tuner.load_config().unwrap().max_iterations, 50);
    }

    #[test]
    fn test_missing_parameters_is_an_error() {
        let args = ParamArgs {
            params: None,
            tokens: None,
            min: DEFAULT_TOKEN_MIN,
            max: DEFAULT_TOKEN_MAX,
            step: DEFAULT_TOKEN_STEP,
        };
        assert!(args.load().is_err());
    }

    #[test]
    fn test_params_and_tokens_conflict() {
        let parsed = Cli::try_parse_from([
            "spsa-tune", "check", "-p", "a.toml", "-t", "A 1",
        ]);
        assert!(parsed.is_err());
    }
}
