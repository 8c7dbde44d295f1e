//! Language-model policy verification for edits made while tests are green.
//!
//! With no failing test, the guard cannot tell from the test signal alone
//! whether an edit is a new test (fine) or new production behavior (not
//! fine yet). The verifier asks a model to classify the edit and returns
//! a [`PolicyDecision`].
//!
//! The model is asked for JSON shaped like:
//!
//! ```json
//! {"editKind": "test" | "impl", "decision": "allow" | "block", "reason": "..."}
//! ```
//!
//! Replies may wrap that JSON in a fenced code block. Every failure (backend
//! error, unparsable reply) turns into a block; nothing is retried.

mod client;

use std::sync::{Arc, LazyLock};

use regex_lite::Regex;
use serde_json::Value;

pub use client::{
    BackendError, ChatClient, ChatMessage, ChatRequest, HostClient, Role, SessionChatClient,
    SessionClient,
};

/// Reason used when the model blocks without saying why.
pub const DEFAULT_BLOCK_REASON: &str = "Edit violates TDD: write a failing test first";

/// Reason used when the model's reply cannot be parsed.
pub const INVALID_RESPONSE_REASON: &str = "Invalid verifier response";

const SYSTEM_PROMPT: &str = "\
You review file edits made by a coding agent that must follow test-driven development.
The test suite is currently green: no test is failing.

Classify the edit:
- \"test\" if it adds or changes test code only.
- \"impl\" if it adds or changes production code.

While tests are green, test edits are always acceptable. Production edits are acceptable
only as a refactor that keeps behavior unchanged. New behavior needs a failing test first.

Reply with JSON only, no prose:
{\"editKind\": \"test\" | \"impl\", \"decision\": \"allow\" | \"block\", \"reason\": \"<short explanation>\"}";

static FENCED_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```(?i:json)?[ \t]*\r?\n?(.*?)```").ok());

/// The outcome of a policy check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyDecision {
    /// The edit may proceed.
    Allow,
    /// The edit is blocked with a reason.
    Deny(String),
}

impl PolicyDecision {
    /// Returns true if the edit is allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allow)
    }

    /// Returns the denial reason if denied, None if allowed.
    pub fn denial_reason(&self) -> Option<&str> {
        match self {
            PolicyDecision::Allow => None,
            PolicyDecision::Deny(reason) => Some(reason),
        }
    }
}

/// How the model classified an edit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditKind {
    /// Test code.
    Test,
    /// Production code.
    Impl,
    /// Missing or unrecognized; handled as [`EditKind::Impl`].
    Unknown,
}

/// What the model decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerdictDecision {
    /// The model allows the edit.
    Allow,
    /// The model blocks the edit.
    Block,
    /// Missing or unrecognized; handled as [`VerdictDecision::Block`].
    Unknown,
}

/// A parsed model reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    /// Edit classification.
    pub edit_kind: EditKind,
    /// Allow/block decision.
    pub decision: VerdictDecision,
    /// Free-text explanation.
    pub reason: Option<String>,
}

impl Verdict {
    /// Fold the verdict into a policy decision.
    ///
    /// Test edits are allowed regardless of `decision`.
    pub fn into_decision(self) -> PolicyDecision {
        if self.edit_kind == EditKind::Test {
            return PolicyDecision::Allow;
        }
        match self.decision {
            VerdictDecision::Allow => PolicyDecision::Allow,
            VerdictDecision::Block | VerdictDecision::Unknown => PolicyDecision::Deny(
                self.reason
                    .unwrap_or_else(|| DEFAULT_BLOCK_REASON.to_string()),
            ),
        }
    }
}

/// The reply did not contain a JSON object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidResponse;

/// Pick the JSON candidate out of a reply.
///
/// Uses the first fenced code block when present, otherwise the whole reply.
pub fn extract_json(response: &str) -> &str {
    FENCED_BLOCK
        .as_ref()
        .and_then(|re| re.captures(response))
        .and_then(|caps| caps.get(1))
        .map_or(response, |m| m.as_str())
        .trim()
}

/// Parse a model reply into a [`Verdict`].
pub fn parse_verdict(response: &str) -> Result<Verdict, InvalidResponse> {
    let value: Value = serde_json::from_str(extract_json(response)).map_err(|_| InvalidResponse)?;
    let Value::Object(map) = value else {
        return Err(InvalidResponse);
    };

    let edit_kind = match map
        .get("editKind")
        .or_else(|| map.get("editType"))
        .and_then(Value::as_str)
    {
        Some("test") => EditKind::Test,
        Some("impl") => EditKind::Impl,
        _ => EditKind::Unknown,
    };
    let decision = match map.get("decision").and_then(Value::as_str) {
        Some("allow") => VerdictDecision::Allow,
        Some("block") => VerdictDecision::Block,
        _ => VerdictDecision::Unknown,
    };
    let reason = map
        .get("reason")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(Verdict {
        edit_kind,
        decision,
        reason,
    })
}

/// Build the verification request for one edit.
pub fn build_request(
    model: &str,
    file_path: &str,
    edit_content: &str,
    test_output: &str,
) -> ChatRequest {
    let user = format!(
        "File: {file_path}\n\nNew content:\n```\n{edit_content}\n```\n\nLatest test output:\n```\n{test_output}\n```"
    );
    ChatRequest {
        model: model.to_string(),
        messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)],
    }
}

/// Asks a language model whether a green-state edit follows TDD.
#[derive(Clone)]
pub struct PolicyVerifier {
    client: Arc<dyn ChatClient>,
    model: String,
}

impl std::fmt::Debug for PolicyVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyVerifier")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl PolicyVerifier {
    /// Create a verifier for the given client and model.
    pub fn new(client: Arc<dyn ChatClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Verify an edit. Never fails; every problem becomes a denial.
    pub async fn verify(
        &self,
        file_path: &str,
        edit_content: &str,
        test_output: &str,
    ) -> PolicyDecision {
        let request = build_request(&self.model, file_path, edit_content, test_output);

        let response = match self.client.chat(request).await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(model = %self.model, error = %e, "verifier backend failed");
                return PolicyDecision::Deny(format!("Verification failed: {e}"));
            }
        };

        match parse_verdict(&response) {
            Ok(verdict) => {
                tracing::debug!(?verdict, "verifier verdict");
                verdict.into_decision()
            }
            Err(InvalidResponse) => {
                tracing::debug!(response = %response, "unparsable verifier response");
                PolicyDecision::Deny(INVALID_RESPONSE_REASON.to_string())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn canned(reply: &'static str) -> Arc<dyn ChatClient> {
        Arc::new(move |_req: ChatRequest| async move { Ok::<_, BackendError>(reply.to_string()) })
    }

    async fn verify_with(reply: &'static str) -> PolicyDecision {
        PolicyVerifier::new(canned(reply), "m")
            .verify("src/a.ts", "export const a = 1;", "PASS all")
            .await
    }

    #[test]
    fn test_extract_bare_json() {
        assert_eq!(extract_json(r#" {"decision":"allow"} "#), r#"{"decision":"allow"}"#);
    }

    #[test]
    fn test_extract_fenced_json() {
        let reply = "Here you go:\n```json\n{\"decision\":\"allow\"}\n```\nthanks";
        assert_eq!(extract_json(reply), r#"{"decision":"allow"}"#);
        assert_eq!(
            parse_verdict(reply).unwrap(),
            parse_verdict(r#"{"decision":"allow"}"#).unwrap()
        );
    }

    #[test]
    fn test_extract_untagged_fence_uses_first_block() {
        let reply = "```\n{\"decision\":\"block\"}\n```\n```json\n{\"decision\":\"allow\"}\n```";
        assert_eq!(extract_json(reply), r#"{"decision":"block"}"#);
    }

    #[test]
    fn test_parse_accepts_edit_type_alias() {
        let verdict = parse_verdict(r#"{"editType":"test","decision":"block"}"#).unwrap();
        assert_eq!(verdict.edit_kind, EditKind::Test);
    }

    #[test]
    fn test_parse_unknown_fields_fall_back() {
        let verdict = parse_verdict(r#"{"editKind":"docs","decision":"maybe"}"#).unwrap();
        assert_eq!(verdict.edit_kind, EditKind::Unknown);
        assert_eq!(verdict.decision, VerdictDecision::Unknown);
        assert_eq!(
            verdict.into_decision(),
            PolicyDecision::Deny(DEFAULT_BLOCK_REASON.to_string())
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_verdict(""), Err(InvalidResponse));
        assert_eq!(parse_verdict("   \n"), Err(InvalidResponse));
        assert_eq!(parse_verdict("sure, allow it"), Err(InvalidResponse));
        assert_eq!(parse_verdict("[1, 2]"), Err(InvalidResponse));
    }

    #[tokio::test]
    async fn test_test_edit_overrides_block() {
        let decision = verify_with(r#"{"editKind":"test","decision":"block"}"#).await;
        assert_eq!(decision, PolicyDecision::Allow);
    }

    #[tokio::test]
    async fn test_impl_allow() {
        let decision = verify_with(r#"{"editKind":"impl","decision":"allow"}"#).await;
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn test_block_keeps_reason() {
        let decision = verify_with(
            r#"{"editKind":"impl","decision":"block","reason":"Write a failing test first"}"#,
        )
        .await;
        assert_eq!(decision.denial_reason(), Some("Write a failing test first"));
    }

    #[tokio::test]
    async fn test_block_without_reason_uses_default() {
        let decision = verify_with(r#"{"decision":"block"}"#).await;
        assert_eq!(decision.denial_reason(), Some(DEFAULT_BLOCK_REASON));
    }

    #[tokio::test]
    async fn test_missing_decision_blocks() {
        let decision = verify_with(r#"{"editKind":"impl"}"#).await;
        assert!(!decision.is_allowed());
    }

    #[tokio::test]
    async fn test_empty_reply_is_invalid() {
        let decision = verify_with("  ").await;
        assert_eq!(decision.denial_reason(), Some(INVALID_RESPONSE_REASON));
    }

    #[tokio::test]
    async fn test_backend_error_blocks() {
        let client: Arc<dyn ChatClient> = Arc::new(|_req: ChatRequest| async {
            Err::<String, _>(BackendError::new("timed out"))
        });
        let decision = PolicyVerifier::new(client, "m")
            .verify("src/a.ts", "x", "PASS")
            .await;
        assert_eq!(
            decision.denial_reason(),
            Some("Verification failed: timed out")
        );
    }

    #[tokio::test]
    async fn test_request_carries_edit_context() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let client: Arc<dyn ChatClient> = Arc::new(move |req: ChatRequest| {
            *sink.lock().unwrap() = Some(req);
            async { Ok::<_, BackendError>(r#"{"decision":"allow"}"#.to_string()) }
        });

        PolicyVerifier::new(client, "judge-model")
            .verify("src/math.ts", "export const add = 1;", "PASS math")
            .await;

        let req = seen.lock().unwrap().take().unwrap();
        assert_eq!(req.model, "judge-model");
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, Role::System);
        assert!(req.messages[0].content.contains("editKind"));
        assert_eq!(req.messages[1].role, Role::User);
        assert!(req.messages[1].content.contains("src/math.ts"));
        assert!(req.messages[1].content.contains("export const add = 1;"));
        assert!(req.messages[1].content.contains("PASS math"));
    }
}
