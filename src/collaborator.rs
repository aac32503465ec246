//! Reasoning collaborator interface
//!
//! The engine delegates two judgment calls to a language model: which tool
//! (if any) a request needs, and whether mid-workflow input continues the
//! current task. Both are plain request/response calls; the engine never
//! streams or holds a connection open.

pub mod openai;

use crate::engine::{ContinuityVerdict, SelectionDecision, StackSnapshot};
use crate::registry::ParamMap;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Collaborator error with classification
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CollaboratorError {
    pub kind: CollaboratorErrorKind,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(kind: CollaboratorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(CollaboratorErrorKind::Network, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(CollaboratorErrorKind::InvalidResponse, message)
    }
}

/// Error classification for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollaboratorErrorKind {
    /// Network issues, timeouts - retryable
    Network,
    /// Rate limited (429) - retryable with backoff
    RateLimit,
    /// Server error (5xx) - retryable
    ServerError,
    /// Authentication failed (401, 403) - not retryable
    Auth,
    /// Bad request (400) - not retryable
    InvalidRequest,
    /// The model answered, but not in the expected shape - not retryable
    InvalidResponse,
    /// Unknown error
    Unknown,
}

impl CollaboratorErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::ServerError)
    }
}

/// One prior exchange in the conversation, given to the collaborator so
/// selection can resolve references like "do that again for 50".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// The two judgments the engine outsources.
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Decide whether `request` needs a tool, and which.
    async fn select_tool(
        &self,
        request: &str,
        history: &[ChatTurn],
        tool_summary: &str,
    ) -> Result<SelectionDecision, CollaboratorError>;

    /// Decide whether `text` continues the workflow described by `snapshot`.
    async fn judge_continuity(
        &self,
        text: &str,
        snapshot: &StackSnapshot,
    ) -> Result<ContinuityVerdict, CollaboratorError>;
}

// ============================================================================
// Prompt rendering
// ============================================================================

/// System prompt for the tool-selection judgment.
pub fn selection_prompt(tool_summary: &str) -> String {
    format!(
        "You route user requests to tools.\n\
         Available tools:\n{tool_summary}\n\n\
         Reply with exactly one JSON object and nothing else.\n\
         If a tool fits, reply {{\"tool\": \"<name>\", \"args\": {{}}}} and put any \
         argument values the request already states into \"args\".\n\
         If no tool fits, reply {{\"reply\": \"<a short conversational answer>\"}}."
    )
}

/// System prompt for the topic-continuity judgment. The stack rendering lets
/// the model see what question the user is currently being asked.
pub fn continuity_prompt(snapshot: &StackSnapshot) -> String {
    format!(
        "A tool workflow is in progress:\n{}\n\n\
         Decide whether the user's next message continues this workflow \
         (for example, answers the pending question) or changes the subject.\n\
         Reply with exactly one word: \"related\" or \"unrelated\".",
        snapshot.render()
    )
}

// ============================================================================
// Response parsing
// ============================================================================

#[derive(Deserialize)]
struct SelectionWire {
    tool: Option<String>,
    #[serde(default)]
    args: ParamMap,
    reply: Option<String>,
}

/// Parse the model's selection answer. Tolerates a fenced code block around
/// the JSON, which smaller models produce routinely.
pub fn parse_selection(raw: &str) -> Result<SelectionDecision, CollaboratorError> {
    let body = strip_fences(raw);
    let wire: SelectionWire = serde_json::from_str(body).map_err(|e| {
        CollaboratorError::invalid_response(format!("unparseable selection answer: {e}"))
    })?;
    match (wire.tool, wire.reply) {
        (Some(name), _) => Ok(SelectionDecision::UseTool {
            name,
            args: wire.args,
        }),
        (None, Some(reply)) => Ok(SelectionDecision::NoToolNeeded { reply }),
        (None, None) => Err(CollaboratorError::invalid_response(
            "selection answer names neither a tool nor a reply",
        )),
    }
}

/// Parse the model's continuity answer.
pub fn parse_continuity(raw: &str) -> Result<ContinuityVerdict, CollaboratorError> {
    let lowered = strip_fences(raw).to_lowercase();
    if lowered.contains("unrelated") {
        Ok(ContinuityVerdict::Unrelated)
    } else if lowered.contains("related") {
        Ok(ContinuityVerdict::Related)
    } else {
        Err(CollaboratorError::invalid_response(format!(
            "unparseable continuity answer: {raw:?}"
        )))
    }
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
