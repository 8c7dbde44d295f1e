//! The red/green/refactor decision engine.
//!
//! Each check is independent. The engine derives a [`TddState`] from the
//! failing-marker count of the latest test output and decides:
//!
//! | State     | Failing markers | Outcome                                  |
//! |-----------|-----------------|------------------------------------------|
//! | `Blocked` | more than one   | deny: fix the existing failing test      |
//! | `Red`     | exactly one     | allow                                    |
//! | `Green`   | none            | ask the [`PolicyVerifier`], if one exists |
//!
//! Files outside the enforcement patterns are allowed before any test
//! output is read, so they never need a test run to exist.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::audit::AuditLogger;
use crate::config::{ConfigError, GuardConfig};
use crate::pattern::project_relative;
use crate::signal::{SignalError, read_signal};
use crate::verifier::{ChatClient, PolicyDecision, PolicyVerifier};

/// Prefix of every blocked-edit message.
pub const BLOCK_TAG: &str = "TDD: ";

/// Reason given when more than one failure is reported.
pub const FIX_FAILING_TEST: &str = "Fix existing failing test first";

/// A blocked edit. `Display` yields the message shown to the agent.
#[derive(Debug, Error)]
pub enum GuardError {
    /// The project configuration is invalid.
    #[error("TDD: {0}")]
    Config(#[from] ConfigError),
    /// The test signal is missing, stale or unreadable.
    #[error("TDD: {0}")]
    Signal(#[from] SignalError),
    /// The TDD policy rejected the edit.
    #[error("TDD: {0}")]
    Policy(String),
}

impl GuardError {
    /// The reason without the [`BLOCK_TAG`] prefix.
    pub fn reason(&self) -> String {
        match self {
            GuardError::Config(e) => e.to_string(),
            GuardError::Signal(e) => e.to_string(),
            GuardError::Policy(reason) => reason.clone(),
        }
    }

    /// Returns true for policy blocks, false for infrastructure failures.
    pub fn is_policy_block(&self) -> bool {
        matches!(self, GuardError::Policy(_))
    }
}

/// Phase of the red/green/refactor cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TddState {
    /// Exactly one failing test: implementation may proceed.
    Red,
    /// No failing test: only tests or refactors may proceed.
    Green,
    /// Several failures: nothing proceeds until they are fixed.
    Blocked,
}

impl TddState {
    /// Classify a failing-marker count.
    pub fn from_failing_count(count: usize) -> Self {
        match count {
            0 => TddState::Green,
            1 => TddState::Red,
            _ => TddState::Blocked,
        }
    }

    /// Uppercase label used in audit entries.
    pub fn as_str(self) -> &'static str {
        match self {
            TddState::Red => "RED",
            TddState::Green => "GREEN",
            TddState::Blocked => "BLOCKED",
        }
    }
}

/// A file modification the agent wants to make.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProposedEdit {
    /// Target file, absolute or project-relative.
    pub file_path: String,
    /// New content: the whole file for writes, the replacement text for edits.
    pub content: String,
}

impl ProposedEdit {
    /// Create a proposed edit.
    pub fn new(file_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            content: content.into(),
        }
    }
}

/// Resolve a project root to an absolute path.
///
/// Falls back to the path as given if the current directory is unavailable.
pub fn absolute_root(project_root: PathBuf) -> PathBuf {
    std::path::absolute(&project_root).unwrap_or(project_root)
}

/// Decides whether edits may proceed for one project.
#[derive(Clone)]
pub struct TddGuard {
    project_root: PathBuf,
    logger: AuditLogger,
    client: Option<Arc<dyn ChatClient>>,
}

impl std::fmt::Debug for TddGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TddGuard")
            .field("project_root", &self.project_root)
            .field("logger", &self.logger)
            .field("has_verifier", &self.client.is_some())
            .finish()
    }
}

impl TddGuard {
    /// Create a guard with no verifier backend.
    ///
    /// A relative `project_root` is resolved against the current directory,
    /// so absolute tool paths can still be matched beneath it.
    pub fn new(project_root: impl Into<PathBuf>, logger: AuditLogger) -> Self {
        Self {
            project_root: absolute_root(project_root.into()),
            logger,
            client: None,
        }
    }

    /// Attach the backend used to verify green-state edits.
    pub fn with_client(mut self, client: Arc<dyn ChatClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// The project this guard is bound to.
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// The audit logger.
    pub fn logger(&self) -> &AuditLogger {
        &self.logger
    }

    /// Decide on one edit under `config`.
    ///
    /// `Ok(())` lets the edit proceed; any error blocks it.
    pub async fn check(
        &self,
        config: &GuardConfig,
        edit: &ProposedEdit,
    ) -> Result<(), GuardError> {
        let path = project_relative(&edit.file_path, &self.project_root);

        let in_scope = config
            .enforce_patterns
            .as_ref()
            .is_some_and(|patterns| patterns.matches(&path));
        if !in_scope {
            tracing::debug!(path = %path, "not enforced, allowing");
            return Ok(());
        }

        let signal = read_signal(&config.test_output_file, config.max_test_output_age).await;
        let signal = match signal {
            Ok(s) => s,
            Err(e) => {
                self.logger.error(&e.to_string()).await;
                return Err(GuardError::Signal(e));
            }
        };

        let state = TddState::from_failing_count(signal.failing_count);
        tracing::debug!(
            path = %path,
            failing = signal.failing_count,
            ?state,
            "classified test signal"
        );

        let label = state.as_str();
        match state {
            TddState::Blocked => {
                let message = format!("Blocked edit to {path} ({label}): {FIX_FAILING_TEST}");
                self.logger.warn(&message).await;
                Err(GuardError::Policy(FIX_FAILING_TEST.to_string()))
            }
            TddState::Red => {
                self.logger.info(&format!("Allowed edit ({label}): {path}")).await;
                Ok(())
            }
            TddState::Green => {
                let Some(client) = &self.client else {
                    self.logger
                        .info(&format!("Allowed edit ({label}, no verifier available): {path}"))
                        .await;
                    return Ok(());
                };

                let verifier = PolicyVerifier::new(Arc::clone(client), &config.verifier_model);
                match verifier.verify(&path, &edit.content, &signal.output).await {
                    PolicyDecision::Allow => {
                        self.logger.info(&format!("Allowed edit ({label}): {path}")).await;
                        Ok(())
                    }
                    PolicyDecision::Deny(reason) => {
                        self.logger
                            .warn(&format!("Blocked edit to {path} ({label}): {reason}"))
                            .await;
                        Err(GuardError::Policy(reason))
                    }
                }
            }
        }
    }
}
