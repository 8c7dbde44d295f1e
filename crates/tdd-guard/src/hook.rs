//! Host-facing adapter: turns "about to run tool X with arguments Y" into a
//! guard decision.
//!
//! Only file-modifying tools are gated. Argument keys follow the common
//! agent-host conventions (`filePath` / `file_path`, `content`,
//! `newString` / `new_string`, and `edits` for multi-edit tools).

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::audit::AuditLogger;
use crate::config::GuardConfig;
use crate::engine::{GuardError, ProposedEdit, TddGuard, absolute_root};
use crate::verifier::HostClient;

/// A file-modifying tool the guard knows how to read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolKind {
    /// Replaces a whole file; new content under `content`.
    Write,
    /// Replaces a fragment; new text under `newString`.
    Edit,
    /// Several fragment replacements under `edits`.
    MultiEdit,
}

impl ToolKind {
    /// Recognize a tool by name, case-insensitively.
    pub fn from_tool_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "write" => Some(ToolKind::Write),
            "edit" => Some(ToolKind::Edit),
            "multiedit" => Some(ToolKind::MultiEdit),
            _ => None,
        }
    }
}

fn str_field<'a>(args: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| args.get(*k).and_then(Value::as_str))
}

/// Pull the target path and new content out of a tool's arguments.
///
/// Returns `None` when no file path is present. Missing content reads as
/// empty.
pub fn extract_edit(kind: ToolKind, args: &Value) -> Option<ProposedEdit> {
    let file_path = str_field(args, &["filePath", "file_path"])?;

    let content = match kind {
        ToolKind::Write => str_field(args, &["content"]).unwrap_or_default().to_string(),
        ToolKind::Edit => str_field(args, &["newString", "new_string"])
            .unwrap_or_default()
            .to_string(),
        ToolKind::MultiEdit => args
            .get("edits")
            .and_then(Value::as_array)
            .map(|edits| {
                edits
                    .iter()
                    .filter_map(|e| str_field(e, &["newString", "new_string"]))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default(),
    };

    Some(ProposedEdit::new(file_path, content))
}

/// The guard as a host plugin, bound to one project.
#[derive(Clone, Debug)]
pub struct TddGuardPlugin {
    guard: TddGuard,
}

impl TddGuardPlugin {
    /// Bind to a project root, optionally with a host-supplied model client.
    pub fn new(project_root: impl Into<PathBuf>, client: Option<HostClient>) -> Self {
        let project_root = absolute_root(project_root.into());
        let logger = AuditLogger::for_project(&project_root);
        let mut guard = TddGuard::new(project_root, logger);
        if let Some(client) = client {
            guard = guard.with_client(client.into_chat_client());
        }
        Self { guard }
    }

    /// The project root.
    pub fn project_root(&self) -> &Path {
        self.guard.project_root()
    }

    /// The underlying decision engine.
    pub fn guard(&self) -> &TddGuard {
        &self.guard
    }

    /// Hook called before a tool runs. `Err` blocks the tool call.
    pub async fn before_tool(&self, tool_name: &str, args: &Value) -> Result<(), GuardError> {
        let Some(kind) = ToolKind::from_tool_name(tool_name) else {
            return Ok(());
        };
        let Some(edit) = extract_edit(kind, args) else {
            tracing::debug!(tool = %tool_name, "no file path in tool arguments, allowing");
            return Ok(());
        };
        self.check_edit(&edit).await
    }

    /// Load the project configuration and decide on one edit.
    pub async fn check_edit(&self, edit: &ProposedEdit) -> Result<(), GuardError> {
        let config = match GuardConfig::load(self.project_root()).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                tracing::debug!("no guard configuration, allowing");
                return Ok(());
            }
            Err(e) => {
                self.guard.logger().error(&e.to_string()).await;
                return Err(GuardError::Config(e));
            }
        };
        self.guard.check(&config, edit).await
    }
}
