use crate::error::ConfigError;
use crate::path::MAX_ARRAY_LENGTH;
use crate::sandbox::Limits;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const MAX_CALL_DEPTH_VAR: &str = "DATATREE_MAX_CALL_DEPTH";
pub const MAX_STEPS_VAR: &str = "DATATREE_MAX_STEPS";

/// Engine settings, read from a JSON file and the environment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deepest nesting of function calls inside one expression.
    pub max_call_depth: usize,
    /// Interpreter steps one expression may take before it is aborted.
    pub max_steps: usize,
    /// Longest array an expression may grow by assignment.
    pub max_array_length: usize,
    /// Log a summary line after every pass.
    pub log_passes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_call_depth: 64,
            max_steps: 100_000,
            max_array_length: MAX_ARRAY_LENGTH,
            log_passes: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Loads a config file; missing fields keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Applies `DATATREE_MAX_CALL_DEPTH` and `DATATREE_MAX_STEPS` when set.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|var| std::env::var(var).ok())
    }

    /// Same as [`EngineConfig::with_env_overrides`] with an explicit lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(MAX_CALL_DEPTH_VAR) {
            self.max_call_depth = parse_limit(MAX_CALL_DEPTH_VAR, &value)?;
        }
        if let Some(value) = lookup(MAX_STEPS_VAR) {
            self.max_steps = parse_limit(MAX_STEPS_VAR, &value)?;
        }
        Ok(self)
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_call_depth: self.max_call_depth,
            max_steps: self.max_steps,
            max_array_length: self.max_array_length.min(MAX_ARRAY_LENGTH),
        }
    }
}

fn parse_limit(var: &str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(limit) if limit > 0 => Ok(limit),
        _ => Err(ConfigError::Env {
            var: var.to_string(),
            value: value.to_string(),
        }),
    }
}
