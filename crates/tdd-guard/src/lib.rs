//! TDD Guard: red/green/refactor enforcement for coding agents.
//!
//! The guard sits in front of an agent's file-modifying tools and decides,
//! per edit, whether it may proceed. It reads the latest test output, derives
//! the phase of the TDD cycle from it, and for ambiguous cases asks a language
//! model whether the edit is a test or new behavior.
//!
//! # Example
//!
//! ```rust,ignore
//! use tdd_guard::TddGuardPlugin;
//! use serde_json::json;
//!
//! let plugin = TddGuardPlugin::new("/path/to/project", None);
//!
//! // Ok(()) lets the tool run; Err carries "TDD: <reason>".
//! plugin
//!     .before_tool("write", &json!({"filePath": "src/a.ts", "content": "..."}))
//!     .await?;
//! ```
//!
//! Per-project state lives under `<project-root>/.tdd-guard/`: the
//! configuration (`config.json`) and the audit log (`guard.log`).

pub mod audit;
pub mod config;
pub mod engine;
pub mod hook;
pub mod pattern;
pub mod signal;
pub mod verifier;

/// Directory under the project root holding guard configuration and logs.
pub const GUARD_DIR: &str = ".tdd-guard";

pub use audit::{AuditLogger, LogLevel};
pub use config::{ConfigError, GuardConfig};
pub use engine::{GuardError, ProposedEdit, TddGuard, TddState};
pub use hook::{TddGuardPlugin, ToolKind};
pub use pattern::PatternSet;
pub use signal::{SignalError, TestSignal};
pub use verifier::{ChatClient, HostClient, PolicyDecision, PolicyVerifier, SessionClient};
