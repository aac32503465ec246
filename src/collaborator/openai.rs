//! `OpenAI`-compatible collaborator implementation
//!
//! Works against any chat-completions endpoint, including a local Ollama
//! server (the default) and hosted `OpenAI`-compatible providers.

use super::{
    continuity_prompt, parse_continuity, parse_selection, selection_prompt, ChatTurn, Collaborator,
    CollaboratorError, CollaboratorErrorKind, Role,
};
use crate::engine::{ContinuityVerdict, SelectionDecision, StackSnapshot};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";
const DEFAULT_MODEL: &str = "llama3.2";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Chat-completions client for the two collaborator judgments.
pub struct OpenAiCollaborator {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiCollaborator {
    pub fn new(base_url: String, api_key: Option<String>, model: String) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }

    /// Configuration from `MAESTRO_BASE_URL`, `MAESTRO_API_KEY`, and
    /// `MAESTRO_MODEL`, defaulting to a local Ollama server.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("MAESTRO_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            std::env::var("MAESTRO_API_KEY").ok(),
            std::env::var("MAESTRO_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        )
    }

    /// One round trip: system prompt, optional prior turns, user text in;
    /// assistant text out.
    async fn complete(
        &self,
        system: &str,
        history: &[ChatTurn],
        user: &str,
    ) -> Result<String, CollaboratorError> {
        let mut messages = vec![ChatMessage {
            role: "system",
            content: system.to_string(),
        }];
        messages.extend(history.iter().map(|turn| ChatMessage {
            role: match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: turn.text.clone(),
        }));
        messages.push(ChatMessage {
            role: "user",
            content: user.to_string(),
        });

        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: 0.0,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CollaboratorError::network(format!("request timed out: {e}"))
            } else {
                CollaboratorError::network(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            CollaboratorError::invalid_response(format!("malformed completion body: {e}"))
        })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CollaboratorError::invalid_response("completion had no choices"))?;

        debug!(model = %self.model, chars = content.len(), "collaborator answered");
        Ok(content)
    }
}

fn classify_status(status: StatusCode, body: &str) -> CollaboratorError {
    let kind = match status {
        StatusCode::TOO_MANY_REQUESTS => CollaboratorErrorKind::RateLimit,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CollaboratorErrorKind::Auth,
        StatusCode::BAD_REQUEST => CollaboratorErrorKind::InvalidRequest,
        s if s.is_server_error() => CollaboratorErrorKind::ServerError,
        _ => CollaboratorErrorKind::Unknown,
    };
    CollaboratorError::new(kind, format!("{status}: {body}"))
}

#[async_trait]
impl Collaborator for OpenAiCollaborator {
    async fn select_tool(
        &self,
        request: &str,
        history: &[ChatTurn],
        tool_summary: &str,
    ) -> Result<SelectionDecision, CollaboratorError> {
        let answer = self
            .complete(&selection_prompt(tool_summary), history, request)
            .await?;
        parse_selection(&answer)
    }

    async fn judge_continuity(
        &self,
        text: &str,
        snapshot: &StackSnapshot,
    ) -> Result<ContinuityVerdict, CollaboratorError> {
        let answer = self.complete(&continuity_prompt(snapshot), &[], text).await?;
        parse_continuity(&answer)
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}
