use std::process::Command;

use tracing::{debug, trace};

use crate::tuning::{
    error::{EvaluationFailure, TuningError},
    objective::{EvaluationResult, NoisyObjective, PairOutcome, PairRequest},
    params::ParameterSet,
};

/// Runs an external match script once per candidate:
///
/// ```text
/// <command> <games> <seed> NAME VALUE [NAME VALUE]...
/// ```
///
/// The script plays `games` games against a reference engine and prints the
/// engine's average score; the last non-empty line of stdout is taken as the
/// result. Both sides of a pair get the same seed so they meet the same
/// openings.
#[derive(Debug, Clone)]
pub struct CommandObjective {
    program: String,
    base_args: Vec<String>,
}

impl CommandObjective {
    pub fn new(command: &str) -> Result<Self, TuningError> {
        let mut words = shell_words::split(command)
            .map_err(|e| TuningError::config(format!("cannot parse engine command: {e}")))?;
        if words.is_empty() {
            return Err(TuningError::config("engine command is empty"));
        }
        let program = words.remove(0);
        Ok(Self {
            program,
            base_args: words,
        })
    }

    fn args_for(&self, params: &ParameterSet, games: usize, seed: u64) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.push(games.to_string());
        args.push(seed.to_string());
        for p in params.iter() {
            args.push(p.name.clone());
            args.push(p.value.to_string());
        }
        args
    }

    fn play(
        &self,
        pair: usize,
        params: &ParameterSet,
        games: usize,
        seed: u64,
    ) -> Result<EvaluationResult, EvaluationFailure> {
        let args = self.args_for(params, games, seed);
        trace!("Launching {} {}", self.program, shell_words::join(&args));

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| {
                EvaluationFailure::new(pair, format!("could not execute {}: {e}", self.program))
            })?;

        if !output.status.success() {
            return Err(EvaluationFailure::new(
                pair,
                format!("{} exited with {}", self.program, output.status),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let score = parse_score(&stdout).ok_or_else(|| {
            EvaluationFailure::new(pair, format!("no score in match output {stdout:?}"))
        })?;
        debug!("pair {pair}: {} -> {score}", params);
        Ok(EvaluationResult::new(score, games))
    }
}

/// Last non-empty line of the script output, as a finite number.
fn parse_score(output: &str) -> Option<f64> {
    output
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .and_then(|line| line.parse::<f64>().ok())
        .filter(|score| score.is_finite())
}

impl NoisyObjective for CommandObjective {
    fn evaluate_pair(&self, request: &PairRequest) -> Result<PairOutcome, EvaluationFailure> {
        let plus = self.play(request.pair, &request.plus, request.games, request.seed)?;
        let minus = self.play(request.pair, &request.minus, request.games, request.seed)?;
        Ok(PairOutcome { plus, minus })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::params::Parameter;

    fn params() -> ParameterSet {
        ParameterSet::new(vec![
            Parameter::new("A", 0.32, 0.0, 1.0, 0.01),
            Parameter::new("B", 1.28, 0.0, 2.0, 0.01),
        ])
        .unwrap()
    }

    fn request(pair: usize) -> PairRequest {
        PairRequest {
            iteration: 0,
            pair,
            plus: params(),
            minus: params(),
            games: 6,
            seed: 1234,
        }
    }

    #[test]
    fn command_line_follows_match_script_convention() {
        let objective = CommandObjective::new("python 'my match.py' --quiet").unwrap();
        assert_eq!(objective.program, "python");
        assert_eq!(
            objective.args_for(&params(), 6, 1234),
            vec!["my match.py", "--quiet", "6", "1234", "A", "0.32", "B", "1.28"]
        );
    }

    #[test]
    fn score_is_last_non_empty_line() {
        assert_eq!(parse_score("game 1: 1\ngame 2: 0\n0.417\n\n"), Some(0.417));
        assert_eq!(parse_score("   0.5  "), Some(0.5));
        assert_eq!(parse_score("0.5\nresigned\n"), None);
        assert_eq!(parse_score(""), None);
        assert_eq!(parse_score("NaN"), None);
    }

    #[test]
    fn empty_or_unbalanced_commands_are_rejected() {
        assert!(CommandObjective::new("   ").is_err());
        assert!(CommandObjective::new("python 'unterminated").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn runs_script_and_reads_score() {
        let objective = CommandObjective::new("sh -c 'echo noise; echo 0.75' match").unwrap();
        let outcome = objective.evaluate_pair(&request(0)).unwrap();
        assert_eq!(outcome.plus.score, 0.75);
        assert_eq!(outcome.minus.games, 6);
    }

    #[cfg(unix)]
    #[test]
    fn failing_script_is_an_evaluation_failure() {
        let objective = CommandObjective::new("sh -c 'exit 2' match").unwrap();
        let failure = objective.evaluate_pair(&request(5)).unwrap_err();
        assert_eq!(failure.pair, 5);

        let missing = CommandObjective::new("/nonexistent/match-runner").unwrap();
        assert!(missing.evaluate_pair(&request(0)).is_err());
    }
}
