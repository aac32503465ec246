//! Engine state types: the tool stack, frames, and workflow outcomes

use crate::registry::ParamMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Collected-parameter key used to deliver a child tool's result when the
/// parent did not declare a parameter binding for it.
pub const CHILD_RESULT_KEY: &str = "_child_result";

/// Default stack depth ceiling, and the size of each user-approved extension.
pub const DEFAULT_DEPTH_LIMIT: usize = 20;

/// One tool's in-progress invocation context.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolFrame {
    pub tool_name: String,
    /// Grows monotonically within the frame as parameters are collected.
    pub collected: ParamMap,
    /// Still-required parameter names, in schema declaration order.
    pub missing: Vec<String>,
    /// Diagnostics only, never used for expiry.
    pub created_at: DateTime<Utc>,
    /// Set while this frame is paused waiting on a requested sub-tool.
    pub pending_child: Option<PendingChild>,
}

impl ToolFrame {
    pub fn new(tool_name: impl Into<String>, collected: ParamMap, missing: Vec<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            collected,
            missing,
            created_at: Utc::now(),
            pending_child: None,
        }
    }

    /// A frame with no missing parameters is eligible for execution.
    pub fn is_ready(&self) -> bool {
        self.missing.is_empty()
    }
}

/// A sub-tool this frame has requested, with the tool-declared projection
/// describing where the child's result lands when it completes.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChild {
    pub tool_name: String,
    pub assign_to: Option<String>,
}

/// A child push that has been requested but not yet applied, either because
/// it is mid-transition or because it is blocked on a depth decision.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPush {
    pub tool_name: String,
    pub seed_args: ParamMap,
    pub assign_to: Option<String>,
}

/// Ordered nesting of frames; the last element is the active frame.
///
/// The stack is a bounded arena: growth happens only through depth-checked
/// pushes in the transition function, never through call-frame recursion.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolStack {
    frames: Vec<ToolFrame>,
}

impl ToolStack {
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn top(&self) -> Option<&ToolFrame> {
        self.frames.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut ToolFrame> {
        self.frames.last_mut()
    }

    pub fn push(&mut self, frame: ToolFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<ToolFrame> {
        self.frames.pop()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolFrame> {
        self.frames.iter()
    }
}

/// Bounds on stack growth. Extending requires explicit user consent, one
/// increment at a time, with no cap on the number of extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthPolicy {
    pub limit: usize,
    pub increment: usize,
}

impl Default for DepthPolicy {
    fn default() -> Self {
        Self {
            limit: DEFAULT_DEPTH_LIMIT,
            increment: DEFAULT_DEPTH_LIMIT,
        }
    }
}

impl DepthPolicy {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            increment: limit,
        }
    }

    pub fn extend(&mut self) {
        self.limit += self.increment;
    }
}

/// Engine state. `Idle` holds exactly when the stack is empty and no
/// decision is outstanding.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineState {
    /// Normal conversation, stack empty.
    Idle,
    /// A selection query is in flight with the reasoning collaborator.
    AwaitingSelection,
    /// The top frame has missing parameters; `retried` marks that the
    /// current parameter has already consumed its single validation retry.
    CollectingParameters { retried: bool },
    /// The top frame has no missing parameters.
    ReadyToExecute,
    /// A tool invocation is in flight.
    Executing,
    /// A requested child push hit the depth ceiling; the stack is untouched
    /// until the user chooses to extend the budget or cancel.
    AwaitingDepthDecision { child: PendingPush },
    /// Empty input during a workflow; waiting on continue-or-abandon. An
    /// affirmative restores `resume` verbatim.
    ConfirmingAbandon { resume: Box<EngineState> },
    /// A topic-continuity judgment is in flight for `text`.
    JudgingContinuity {
        text: String,
        resume: Box<EngineState>,
    },
}

impl EngineState {
    /// Human-readable name for rejections and logging.
    pub fn name(&self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::AwaitingSelection => "awaiting_selection",
            EngineState::CollectingParameters { .. } => "collecting_parameters",
            EngineState::ReadyToExecute => "ready_to_execute",
            EngineState::Executing => "executing",
            EngineState::AwaitingDepthDecision { .. } => "awaiting_depth_decision",
            EngineState::ConfirmingAbandon { .. } => "confirming_abandon",
            EngineState::JudgingContinuity { .. } => "judging_continuity",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, EngineState::Idle)
    }
}

/// Terminal result of a stack unwinding, produced exactly once per
/// non-empty-to-empty stack transition.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowOutcome {
    Completed(Value),
    Cancelled(String),
    Failed(String),
}

/// The orchestration engine: stack, phase, and the request that started
/// the current workflow. Scoped per chat session, never process-global.
#[derive(Debug, Clone, PartialEq)]
pub struct Engine {
    pub state: EngineState,
    pub stack: ToolStack,
    /// The user utterance that caused the stack to go non-empty; cleared
    /// exactly when the stack empties again.
    pub original_request: Option<String>,
    pub depth: DepthPolicy,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(DepthPolicy::default())
    }
}

impl Engine {
    pub fn new(depth: DepthPolicy) -> Self {
        Self {
            state: EngineState::Idle,
            stack: ToolStack::default(),
            original_request: None,
            depth,
        }
    }

    /// Read-only snapshot for `status()` and depth-limit prompts.
    pub fn snapshot(&self) -> StackSnapshot {
        let depth = self.stack.depth();
        StackSnapshot {
            frames: self
                .stack
                .iter()
                .enumerate()
                .map(|(i, f)| FrameStatus {
                    tool_name: f.tool_name.clone(),
                    is_top: i + 1 == depth,
                    missing_parameter_count: f.missing.len(),
                })
                .collect(),
            original_request: self.original_request.clone(),
            depth_limit: self.depth.limit,
        }
    }
}

/// Read-only view of one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameStatus {
    pub tool_name: String,
    pub is_top: bool,
    pub missing_parameter_count: usize,
}

/// Read-only view of the whole stack, bottom first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct StackSnapshot {
    pub frames: Vec<FrameStatus>,
    pub original_request: Option<String>,
    pub depth_limit: usize,
}

impl StackSnapshot {
    /// Indented tree rendering, used by the `/stack` command and the
    /// depth-limit prompt.
    pub fn render(&self) -> String {
        if self.frames.is_empty() {
            return "No active tool workflow".to_string();
        }
        let mut lines = vec!["Tool stack:".to_string()];
        for (i, frame) in self.frames.iter().enumerate() {
            let status = if frame.is_top {
                if frame.missing_parameter_count > 0 {
                    format!("collecting, {} missing", frame.missing_parameter_count)
                } else {
                    "active".to_string()
                }
            } else {
                "paused".to_string()
            };
            lines.push(format!(
                "{}└─ {} [{}]",
                "  ".repeat(i),
                frame.tool_name,
                status
            ));
        }
        if let Some(request) = &self.original_request {
            lines.push(format!("\nOriginal request: {request}"));
        }
        lines.join("\n")
    }
}
