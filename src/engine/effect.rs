//! Effects produced by engine transitions
//!
//! The transition function is pure; everything observable happens when the
//! session driver executes these.

use super::state::{StackSnapshot, WorkflowOutcome};
use crate::registry::ParamMap;

/// Effects to be executed after a state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Ask the collaborator which tool (if any) fits the request.
    /// Suspending; the answer comes back as `Event::Selection`.
    QuerySelection { request: String },

    /// Ask the collaborator whether `text` continues the current workflow.
    /// Suspending; the answer comes back as `Event::Continuity`.
    QueryContinuity { text: String },

    /// Invoke a registry tool with the frame's collected parameters.
    /// Suspending; the answer comes back as `Event::ToolFinished`.
    InvokeTool { name: String, params: ParamMap },

    /// Ask the user for the next missing parameter. `guidance` carries the
    /// validator's hint after a failed attempt.
    PromptParameter {
        tool: String,
        parameter: String,
        question: String,
        guidance: Option<String>,
    },

    /// Plain conversational output.
    Reply { text: String },

    /// Ask whether to continue the current task after empty input.
    ConfirmContinue,

    /// Surface the stack and offer the extend-or-cancel depth choice.
    OfferDepthExtension { snapshot: StackSnapshot },

    /// Terminal outcome of a workflow, observable exactly once.
    EmitOutcome { outcome: WorkflowOutcome },
}

impl Effect {
    pub fn reply(text: impl Into<String>) -> Self {
        Effect::Reply { text: text.into() }
    }

    pub fn completed(value: serde_json::Value) -> Self {
        Effect::EmitOutcome {
            outcome: WorkflowOutcome::Completed(value),
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Effect::EmitOutcome {
            outcome: WorkflowOutcome::Cancelled(reason.into()),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Effect::EmitOutcome {
            outcome: WorkflowOutcome::Failed(error.into()),
        }
    }
}
