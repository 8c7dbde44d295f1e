//! Language-model backend seam.
//!
//! The verifier talks to exactly one interface, [`ChatClient`]. Hosts hand
//! the guard either something that already speaks chat, or a session-based
//! client; [`HostClient`] captures both shapes and [`SessionChatClient`]
//! adapts the second into the first.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned by a language-model backend.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    /// Create a backend error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions framing the task.
    System,
    /// The request being judged.
    User,
}

/// One role-tagged message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who wrote the message.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A single chat completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// Ordered conversation.
    pub messages: Vec<ChatMessage>,
}

/// A backend that answers a chat request with reply text.
///
/// # Example
///
/// ```rust
/// use tdd_guard::verifier::{BackendError, ChatClient, ChatRequest};
///
/// struct Canned;
///
/// #[async_trait::async_trait]
/// impl ChatClient for Canned {
///     async fn chat(&self, _request: ChatRequest) -> Result<String, BackendError> {
///         Ok(r#"{"editKind": "test", "decision": "allow"}"#.to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Send the request and return the reply text.
    async fn chat(&self, request: ChatRequest) -> Result<String, BackendError>;
}

/// Blanket implementation for async closures.
///
/// ```rust,ignore
/// let client = |_req: ChatRequest| async { Ok::<_, BackendError>("{}".to_string()) };
/// ```
#[async_trait]
impl<F, Fut> ChatClient for F
where
    F: Fn(ChatRequest) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<String, BackendError>> + Send,
{
    async fn chat(&self, request: ChatRequest) -> Result<String, BackendError> {
        self(request).await
    }
}

/// A backend that only exposes session-scoped prompting.
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Open a new subordinate session and return its id.
    async fn create_session(&self) -> Result<String, BackendError>;

    /// Submit a prompt to a session and return the reply text.
    async fn prompt(
        &self,
        session_id: &str,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<String, BackendError>;

    /// Delete a session.
    async fn delete_session(&self, session_id: &str) -> Result<(), BackendError>;
}

/// Adapts a [`SessionClient`] into a [`ChatClient`].
///
/// Each chat call runs in its own session, which is deleted afterwards
/// whether or not the prompt succeeded.
pub struct SessionChatClient {
    inner: Arc<dyn SessionClient>,
}

impl SessionChatClient {
    /// Wrap a session client.
    pub fn new(inner: Arc<dyn SessionClient>) -> Self {
        Self { inner }
    }
}

impl fmt::Debug for SessionChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionChatClient").finish_non_exhaustive()
    }
}

#[async_trait]
impl ChatClient for SessionChatClient {
    async fn chat(&self, request: ChatRequest) -> Result<String, BackendError> {
        let session_id = self.inner.create_session().await?;
        tracing::debug!(session = %session_id, "created verification session");

        let reply = self
            .inner
            .prompt(&session_id, &request.model, &request.messages)
            .await;

        if let Err(e) = self.inner.delete_session(&session_id).await {
            tracing::warn!("Failed to delete verification session {}: {}", session_id, e);
        }

        reply
    }
}

/// The chat-capable object a host supplies, in one of its two shapes.
#[derive(Clone)]
pub enum HostClient {
    /// Already speaks chat; used as-is.
    Chat(Arc<dyn ChatClient>),
    /// Session-based; adapted through [`SessionChatClient`].
    Session(Arc<dyn SessionClient>),
}

impl HostClient {
    /// Resolve into the single interface the verifier consumes.
    pub fn into_chat_client(self) -> Arc<dyn ChatClient> {
        match self {
            HostClient::Chat(client) => client,
            HostClient::Session(client) => Arc::new(SessionChatClient::new(client)),
        }
    }
}

impl fmt::Debug for HostClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostClient::Chat(_) => f.write_str("HostClient::Chat(..)"),
            HostClient::Session(_) => f.write_str("HostClient::Session(..)"),
        }
    }
}
