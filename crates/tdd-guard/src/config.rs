//! Guard configuration.
//!
//! Configuration lives at `<project-root>/.tdd-guard/config.json`:
//!
//! ```json
//! {
//!   "testOutputFile": ".tdd-guard/test-output.txt",
//!   "enforcePatterns": ["src/**"],
//!   "verifierModel": "small-fast-model",
//!   "maxTestOutputAge": 300
//! }
//! ```
//!
//! The JSON is validated eagerly into [`GuardConfig`]; nothing unvalidated
//! reaches the decision engine. A missing file is not an error, it means the
//! project has not opted in to enforcement.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::GUARD_DIR;
use crate::pattern::PatternSet;
use crate::signal::DEFAULT_MAX_AGE;

/// File name of the configuration inside the guard directory.
pub const CONFIG_FILE: &str = "config.json";

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file exists but could not be read.
    #[error("Cannot read config {path}: {source}")]
    Read {
        /// Path of the configuration file.
        path: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The configuration is not valid JSON.
    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    /// The top-level JSON value is not an object.
    #[error("Invalid config: expected a JSON object")]
    NotAnObject,
    /// A required field is absent or empty.
    #[error("Invalid config: missing required field `{0}`")]
    MissingField(&'static str),
    /// A field has the wrong JSON type.
    #[error("Invalid config: {0}")]
    Schema(#[source] serde_json::Error),
    /// A field has the right type but an unusable value.
    #[error("Invalid config: `{field}` must be {expected}")]
    InvalidField {
        /// The offending field.
        field: &'static str,
        /// Description of the accepted shape.
        expected: &'static str,
    },
    /// An enforcement pattern is not a valid glob.
    #[error("Invalid config: bad enforce pattern `{pattern}`: {message}")]
    InvalidPattern {
        /// The pattern source.
        pattern: String,
        /// Why it failed to compile.
        message: String,
    },
}

/// Validated guard configuration for one project.
#[derive(Clone, Debug)]
pub struct GuardConfig {
    /// Location of the latest test run's output.
    pub test_output_file: PathBuf,
    /// Files in scope for enforcement. `None` means nothing is enforced.
    pub enforce_patterns: Option<PatternSet>,
    /// Model identifier passed to the verifier backend.
    pub verifier_model: String,
    /// Freshness window for the test output.
    pub max_test_output_age: Duration,
}

impl GuardConfig {
    /// Create a configuration with no enforcement patterns and the default age.
    pub fn new(test_output_file: impl Into<PathBuf>, verifier_model: impl Into<String>) -> Self {
        Self {
            test_output_file: test_output_file.into(),
            enforce_patterns: None,
            verifier_model: verifier_model.into(),
            max_test_output_age: DEFAULT_MAX_AGE,
        }
    }

    /// Set the enforcement patterns.
    pub fn with_patterns(mut self, patterns: PatternSet) -> Self {
        self.enforce_patterns = Some(patterns);
        self
    }

    /// Set the freshness window.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_test_output_age = max_age;
        self
    }

    /// Path of the configuration file for a project.
    pub fn path_for(project_root: &Path) -> PathBuf {
        project_root.join(GUARD_DIR).join(CONFIG_FILE)
    }

    /// Load the project's configuration.
    ///
    /// Returns `Ok(None)` if no configuration file exists.
    pub async fn load(project_root: &Path) -> Result<Option<Self>, ConfigError> {
        let path = Self::path_for(project_root);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };

        let mut config = Self::from_json_str(&text)?;
        if config.test_output_file.is_relative() {
            config.test_output_file = project_root.join(&config.test_output_file);
        }
        Ok(Some(config))
    }

    /// Parse and validate configuration JSON.
    ///
    /// Relative paths are left as written.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(ConfigError::NotAnObject);
        }
        let raw = RawConfig::deserialize(value).map_err(ConfigError::Schema)?;

        let test_output_file = required(raw.test_output_file, "testOutputFile")?;
        let verifier_model = required(raw.verifier_model, "verifierModel")?;

        let enforce_patterns = raw
            .enforce_patterns
            .map(|patterns| compile_patterns(&patterns))
            .transpose()?;

        let max_test_output_age = match raw.max_test_output_age {
            None => DEFAULT_MAX_AGE,
            Some(secs) => Duration::try_from_secs_f64(secs).map_err(|_| {
                ConfigError::InvalidField {
                    field: "maxTestOutputAge",
                    expected: "a non-negative number of seconds",
                }
            })?,
        };

        Ok(Self {
            test_output_file: PathBuf::from(test_output_file),
            enforce_patterns,
            verifier_model,
            max_test_output_age,
        })
    }
}

/// Configuration as written on disk, before validation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    test_output_file: Option<String>,
    verifier_model: Option<String>,
    enforce_patterns: Option<Vec<String>>,
    max_test_output_age: Option<f64>,
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(ConfigError::MissingField(field)),
    }
}

fn compile_patterns(patterns: &[String]) -> Result<PatternSet, ConfigError> {
    PatternSet::compile(patterns).map_err(|e| ConfigError::InvalidPattern {
        pattern: patterns
            .iter()
            .find(|p| glob::Pattern::new(p).is_err())
            .cloned()
            .unwrap_or_default(),
        message: e.msg.to_string(),
    })
}
