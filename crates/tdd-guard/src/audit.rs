//! Append-only audit trail of guard decisions.
//!
//! Each entry is one line, `[<timestamp>] [<LEVEL>] <message>`, appended to
//! `<project-root>/.tdd-guard/guard.log`. Lines are built in full and written
//! with a single append so concurrent guards never interleave partial entries.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;

use crate::GUARD_DIR;

/// File name of the audit log inside the guard directory.
pub const LOG_FILE: &str = "guard.log";

/// Severity of an audit entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    /// The edit was allowed.
    Info,
    /// The edit was blocked by policy.
    Warn,
    /// The edit was blocked because the guard could not decide.
    Error,
}

impl LogLevel {
    /// Uppercase label used in log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format a single audit line, including the trailing newline.
pub fn format_entry(timestamp: DateTime<Utc>, level: LogLevel, message: &str) -> String {
    format!(
        "[{}] [{}] {}\n",
        timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        level,
        message
    )
}

/// Audit logger bound to one project.
#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
}

impl AuditLogger {
    /// Create a logger writing to the project's guard log.
    pub fn for_project(project_root: impl AsRef<Path>) -> Self {
        Self {
            path: project_root.as_ref().join(GUARD_DIR).join(LOG_FILE),
        }
    }

    /// Create a logger writing to an explicit file.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry. Write failures are reported through `tracing` only;
    /// the audit trail never changes a decision.
    pub async fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => tracing::info!(target: "tdd_guard::audit", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "tdd_guard::audit", "{message}"),
            LogLevel::Error => tracing::error!(target: "tdd_guard::audit", "{message}"),
        }

        let line = format_entry(Utc::now(), level, message);
        if let Err(e) = self.append(line.as_bytes()).await {
            tracing::warn!("Failed to append to audit log {}: {}", self.path.display(), e);
        }
    }

    /// Shorthand for an INFO entry.
    pub async fn info(&self, message: &str) {
        self.log(LogLevel::Info, message).await;
    }

    /// Shorthand for a WARN entry.
    pub async fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message).await;
    }

    /// Shorthand for an ERROR entry.
    pub async fn error(&self, message: &str) {
        self.log(LogLevel::Error, message).await;
    }

    async fn append(&self, line: &[u8]) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line).await?;
        file.flush().await
    }
}
