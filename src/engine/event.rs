//! Events that drive engine transitions
//!
//! User-originated events come straight from the chat session driver.
//! Collaborator- and tool-originated events are born on spawned tasks and
//! pass through the driver's generation filter before reaching the
//! transition function.

use crate::registry::{ParamMap, ToolResult};

/// Events that trigger state transitions.
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    /// A fresh request while no workflow is active.
    UserRequest { text: String },
    /// Text supplied toward the active frame's first missing parameter.
    ParameterValue { text: String },
    /// Free text arriving while a workflow is active; routed through a
    /// topic-continuity judgment before being treated as a parameter value.
    CheckContinuity { text: String },
    /// Empty input during a workflow.
    EmptyInput,
    /// Answer to the continue-or-abandon confirmation.
    ConfirmResume { resume: bool },
    /// Answer to the depth-limit choice point.
    DepthDecision { extend: bool },
    /// Explicit abandonment.
    Cancel,
    /// Fire the active frame (valid only when it has no missing parameters).
    Execute,

    // Collaborator events
    Selection { decision: SelectionDecision },
    Continuity { verdict: ContinuityVerdict },
    CollaboratorFailed { message: String },

    // Tool events
    ToolFinished { result: ToolResult },
}

/// The collaborator's tool-selection decision.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionDecision {
    /// Plain conversational reply, no workflow started.
    NoToolNeeded { reply: String },
    /// Start a workflow with the named tool and any already-known arguments.
    UseTool { name: String, args: ParamMap },
}

/// The collaborator's topic-continuity judgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuityVerdict {
    /// The text belongs to the current workflow step.
    Related,
    /// The user has moved on; abandon and re-select.
    Unrelated,
}
