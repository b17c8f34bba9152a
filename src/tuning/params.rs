use std::{collections::HashMap, fmt, fs, path::Path};

use miette::{Context, IntoDiagnostic};
use serde::{Deserialize, Serialize};

use crate::tuning::{error::TuningError, perturbation::Perturbation};

/// A single tunable engine parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    /// Resolution of the parameter. Scales the perturbation magnitude, and is
    /// the rounding grid (anchored at `min`) for discrete parameters.
    /// Zero freezes the parameter.
    pub step: f64,
    /// Engine only accepts values on the `step` grid (e.g. integer options).
    #[serde(default)]
    pub discrete: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: f64, min: f64, max: f64, step: f64) -> Self {
        Self {
            name: name.into(),
            value,
            min,
            max,
            step,
            discrete: false,
        }
    }

    /// Integer valued parameter with unit step.
    pub fn integer(name: impl Into<String>, value: i64, min: i64, max: i64) -> Self {
        Self {
            discrete: true,
            ..Self::new(name, value as f64, min as f64, max as f64, 1.0)
        }
    }

    #[inline]
    pub fn clip(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    #[inline]
    pub fn is_perturbable(&self) -> bool {
        self.step > 0.0
    }

    /// Rounds onto the step grid for discrete parameters, otherwise a no-op.
    pub fn quantize(&self, value: f64) -> f64 {
        if !self.discrete || self.step <= 0.0 {
            return value;
        }
        let snapped = self.min + ((value - self.min) / self.step).round() * self.step;
        self.clip(snapped)
    }

    fn validate(&self) -> Result<(), TuningError> {
        let name = &self.name;
        if name.trim().is_empty() {
            return Err(TuningError::config("parameter name must not be empty"));
        }
        if self.min.is_nan() || self.max.is_nan() {
            return Err(TuningError::config(format!("`{name}` has a NaN bound")));
        }
        if self.min > self.max {
            return Err(TuningError::config(format!(
                "`{name}` has min {} above max {}",
                self.min, self.max
            )));
        }
        if !self.step.is_finite() || self.step < 0.0 {
            return Err(TuningError::config(format!(
                "`{name}` has invalid step {}",
                self.step
            )));
        }
        if !self.value.is_finite() {
            return Err(TuningError::config(format!(
                "`{name}` has non-finite value {}",
                self.value
            )));
        }
        Ok(())
    }
}

/// Ordered collection of named parameters.
///
/// The tuner keeps one live master copy and hands out clones, so evaluation
/// workers never observe an update in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ParameterFile", into = "ParameterFile")]
pub struct ParameterSet {
    params: Vec<Parameter>,
    index: HashMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ParameterFile {
    #[serde(rename = "parameter", default)]
    parameters: Vec<Parameter>,
}

impl TryFrom<ParameterFile> for ParameterSet {
    type Error = TuningError;

    fn try_from(file: ParameterFile) -> Result<Self, Self::Error> {
        Self::new(file.parameters)
    }
}

impl From<ParameterSet> for ParameterFile {
    fn from(set: ParameterSet) -> Self {
        Self {
            parameters: set.params,
        }
    }
}

impl ParameterSet {
    /// Builds a validated set. Initial values outside their bounds are
    /// clipped, not rejected.
    pub fn new(params: Vec<Parameter>) -> Result<Self, TuningError> {
        if params.is_empty() {
            return Err(TuningError::config("parameter set is empty"));
        }

        let mut index = HashMap::with_capacity(params.len());
        let mut params = params;
        for (i, p) in params.iter_mut().enumerate() {
            p.validate()?;
            p.value = p.clip(p.value);
            if index.insert(p.name.clone(), i).is_some() {
                return Err(TuningError::config(format!(
                    "duplicate parameter `{}`",
                    p.name
                )));
            }
        }

        Ok(Self { params, index })
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.name.as_str())
    }

    pub fn values(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.value).collect()
    }

    pub fn parameter(&self, name: &str) -> Result<&Parameter, TuningError> {
        self.index
            .get(name)
            .map(|&i| &self.params[i])
            .ok_or_else(|| TuningError::UnknownParameter(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Result<f64, TuningError> {
        self.parameter(name).map(|p| p.value)
    }

    /// Stores `value` clipped to the parameter bounds and returns what was stored.
    pub fn set(&mut self, name: &str, value: f64) -> Result<f64, TuningError> {
        let i = *self
            .index
            .get(name)
            .ok_or_else(|| TuningError::UnknownParameter(name.to_string()))?;
        if !value.is_finite() {
            return Err(TuningError::config(format!(
                "refusing non-finite value {value} for `{name}`"
            )));
        }
        let p = &mut self.params[i];
        p.value = p.clip(value);
        Ok(p.value)
    }

    /// Returns `self + sign * perturbation`, clipped. `self` is untouched.
    pub fn apply_perturbation(&self, perturbation: &Perturbation, sign: f64) -> ParameterSet {
        debug_assert_eq!(perturbation.len(), self.len());
        let mut out = self.clone();
        for (p, &c) in out.params.iter_mut().zip(perturbation.components()) {
            p.value = p.clip(p.value + sign * c);
        }
        out
    }

    /// Snapshot with every discrete parameter snapped to its grid.
    pub fn quantized(&self) -> ParameterSet {
        let mut out = self.clone();
        for p in out.params.iter_mut() {
            p.value = p.quantize(p.value);
        }
        out
    }

    /// Adds `delta` component-wise, clipping each result. Returns, per
    /// parameter, whether the bound was hit.
    pub(crate) fn step_by(&mut self, delta: &[f64]) -> Vec<bool> {
        debug_assert_eq!(delta.len(), self.len());
        self.params
            .iter_mut()
            .zip(delta)
            .map(|(p, &d)| {
                let wanted = p.value + d;
                p.value = p.clip(wanted);
                d != 0.0 && p.value != wanted
            })
            .collect()
    }

    /// Flat `name value name value ...` form, the shape external match
    /// scripts take on their command line.
    pub fn to_token_string(&self) -> String {
        self.params
            .iter()
            .map(|p| format!("{} {}", p.name, p.value))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Parses the flat `name value ...` form. Every parameter gets the same
    /// bounds and step since the token form carries only values.
    pub fn from_tokens(text: &str, min: f64, max: f64, step: f64) -> Result<Self, TuningError> {
        let words = shell_words::split(text)
            .map_err(|e| TuningError::config(format!("cannot split parameter list: {e}")))?;
        if words.len() % 2 != 0 {
            return Err(TuningError::config(format!(
                "parameter list has a name without a value: `{}`",
                words.last().map(String::as_str).unwrap_or_default()
            )));
        }

        let params = words
            .chunks_exact(2)
            .map(|pair| {
                let value = pair[1].parse::<f64>().map_err(|_| {
                    TuningError::config(format!("`{}` has non-numeric value `{}`", pair[0], pair[1]))
                })?;
                Ok(Parameter::new(pair[0].as_str(), value, min, max, step))
            })
            .collect::<Result<Vec<_>, TuningError>>()?;
        Self::new(params)
    }

    /// Save to TOML File
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> miette::Result<()> {
        let toml_string = toml::to_string_pretty(self).into_diagnostic()?;
        fs::write(path.as_ref(), toml_string)
            .into_diagnostic()
            .with_context(|| format!("Writing parameters to {}", path.as_ref().display()))
    }

    /// Load from a TOML File
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> miette::Result<Self> {
        let file_content = fs::read_to_string(path.as_ref())
            .into_diagnostic()
            .with_context(|| format!("Reading parameters from {}", path.as_ref().display()))?;
        let params: Self = toml::from_str(&file_content).into_diagnostic()?;
        Ok(params)
    }
}

impl fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_token_string())
    }
}
