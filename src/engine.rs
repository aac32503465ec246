//! Conversational tool orchestration engine
//!
//! Implements the Elm Architecture pattern with pure state transitions. All
//! I/O (collaborator queries, tool invocations, user prompts) is described by
//! effects and executed by the session driver.

pub mod effect;
pub mod event;
pub mod state;
pub mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::{ContinuityVerdict, Event, SelectionDecision};
pub use state::{
    DepthPolicy, Engine, EngineState, StackSnapshot, ToolFrame, WorkflowOutcome,
    DEFAULT_DEPTH_LIMIT,
};
pub use transition::{transition, TransitionError, TransitionResult};
