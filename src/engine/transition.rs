//! Pure state transition function
//!
//! Given the current engine value, a schema catalog, and one event, produce
//! the next engine value plus the effects to execute. No I/O happens here;
//! the same inputs always produce the same outputs.

use super::effect::Effect;
use super::event::{ContinuityVerdict, Event, SelectionDecision};
use super::state::{
    Engine, EngineState, PendingChild, PendingPush, ToolFrame, CHILD_RESULT_KEY,
};
use crate::registry::{Catalog, ParamMap, ToolResult};
use serde_json::Value;
use thiserror::Error;

/// Result of a state transition.
#[derive(Debug)]
pub struct TransitionResult {
    pub next: Engine,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    fn new(next: Engine) -> Self {
        Self {
            next,
            effects: vec![],
        }
    }

    fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that reject an event without changing state.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("a tool workflow is active; finish the current step or cancel first")]
    WorkflowActive,
    #[error("operation '{operation}' is not valid in state '{state}'")]
    InvalidOperation {
        operation: &'static str,
        state: &'static str,
    },
}

fn invalid(operation: &'static str, state: &EngineState) -> TransitionError {
    TransitionError::InvalidOperation {
        operation,
        state: state.name(),
    }
}

/// Pure transition function.
#[allow(clippy::too_many_lines)]
pub fn transition(
    engine: &Engine,
    catalog: &Catalog,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (&engine.state, event) {
        // ============================================================
        // New requests and tool selection
        // ============================================================
        (EngineState::Idle, Event::UserRequest { text }) => {
            let mut next = engine.clone();
            next.state = EngineState::AwaitingSelection;
            next.original_request = Some(text.clone());
            Ok(TransitionResult::new(next).with_effect(Effect::QuerySelection { request: text }))
        }

        (EngineState::AwaitingSelection, Event::Selection { decision }) => match decision {
            SelectionDecision::NoToolNeeded { reply } => {
                let mut next = engine.clone();
                next.state = EngineState::Idle;
                next.original_request = None;
                Ok(TransitionResult::new(next).with_effect(Effect::reply(reply)))
            }
            SelectionDecision::UseTool { name, args } => {
                if !catalog.contains(&name) {
                    // Unknown tool: surface it, leave the (empty) stack as-is.
                    let mut next = engine.clone();
                    next.state = EngineState::Idle;
                    next.original_request = None;
                    return Ok(TransitionResult::new(next).with_effect(Effect::reply(format!(
                        "I wanted to use a tool named '{name}', but it isn't available. \
                         Could you rephrase your request?"
                    ))));
                }
                let mut next = engine.clone();
                let mut frame = build_frame(catalog, &name, args);
                seed_prompt_from_request(&mut frame, next.original_request.as_deref());
                next.stack.push(frame);
                let effects = enter_top(&mut next, catalog);
                Ok(TransitionResult::new(next).with_effects(effects))
            }
        },

        // The selection never started a workflow, so there is no outcome to
        // emit; the stack stays empty and the request can be retried as-is.
        (EngineState::AwaitingSelection, Event::CollaboratorFailed { message }) => {
            let mut next = engine.clone();
            next.state = EngineState::Idle;
            next.original_request = None;
            Ok(TransitionResult::new(next).with_effect(Effect::reply(format!(
                "I couldn't reach the reasoning backend ({message}). Please try again."
            ))))
        }

        // ============================================================
        // Parameter collection
        // ============================================================
        (EngineState::CollectingParameters { retried }, Event::ParameterValue { text }) => {
            let retried = *retried;
            let mut next = engine.clone();
            let Some(frame) = next.stack.top_mut() else {
                return Err(invalid("supply_parameter_value", &engine.state));
            };
            let Some(param) = frame.missing.first().cloned() else {
                return Err(invalid("supply_parameter_value", &engine.state));
            };

            let validated = match catalog.parameter(&frame.tool_name, &param) {
                Some(spec) => (spec.validator)(&text),
                // Unknown to the schema (should not happen): accept as text.
                None => Ok(Value::String(text.clone())),
            };

            match validated {
                Ok(value) => {
                    frame.collected.insert(param, value);
                    frame.missing.remove(0);
                    let effects = enter_top(&mut next, catalog);
                    Ok(TransitionResult::new(next).with_effects(effects))
                }
                Err(guidance) if !retried => {
                    let tool = frame.tool_name.clone();
                    let question = parameter_question(catalog, &tool, &param);
                    next.state = EngineState::CollectingParameters { retried: true };
                    Ok(TransitionResult::new(next).with_effect(Effect::PromptParameter {
                        tool,
                        parameter: param,
                        question,
                        guidance: Some(guidance),
                    }))
                }
                // Second consecutive failure on the same parameter escalates
                // to a tool failure for the whole workflow.
                Err(guidance) => {
                    let tool = frame.tool_name.clone();
                    Ok(unwind(
                        engine,
                        Effect::failed(format!(
                            "parameter '{param}' for tool '{tool}' failed validation twice: {guidance}"
                        )),
                    ))
                }
            }
        }

        // ============================================================
        // Execution and tool outcomes
        // ============================================================
        (EngineState::ReadyToExecute, Event::Execute) => {
            let Some(frame) = engine.stack.top() else {
                return Err(invalid("execute_active_tool", &engine.state));
            };
            let mut next = engine.clone();
            next.state = EngineState::Executing;
            Ok(TransitionResult::new(next).with_effect(Effect::InvokeTool {
                name: frame.tool_name.clone(),
                params: frame.collected.clone(),
            }))
        }

        (EngineState::Executing, Event::ToolFinished { result }) => match result {
            ToolResult::Value(value) => {
                let mut next = engine.clone();
                next.stack.pop();
                if next.stack.is_empty() {
                    next.state = EngineState::Idle;
                    next.original_request = None;
                    Ok(TransitionResult::new(next).with_effect(Effect::completed(value)))
                } else {
                    inject_child_result(&mut next, value);
                    let effects = enter_top(&mut next, catalog);
                    Ok(TransitionResult::new(next).with_effects(effects))
                }
            }
            ToolResult::NeedsTool {
                name,
                seed_args,
                assign_to,
            } => {
                if !catalog.contains(&name) {
                    // The parent is already mid-workflow; an unknown child
                    // invalidates its assumptions, so the whole stack goes.
                    return Ok(unwind(
                        engine,
                        Effect::failed(format!(
                            "tool '{top}' requested unknown tool '{name}'",
                            top = engine.stack.top().map_or("?", |f| f.tool_name.as_str()),
                        )),
                    ));
                }
                let child = PendingPush {
                    tool_name: name,
                    seed_args,
                    assign_to,
                };
                if engine.stack.depth() + 1 > engine.depth.limit {
                    // Stack untouched until the user chooses.
                    let mut next = engine.clone();
                    let snapshot = next.snapshot();
                    next.state = EngineState::AwaitingDepthDecision { child };
                    Ok(TransitionResult::new(next)
                        .with_effect(Effect::OfferDepthExtension { snapshot }))
                } else {
                    let mut next = engine.clone();
                    push_child(&mut next, catalog, child);
                    let effects = enter_top(&mut next, catalog);
                    Ok(TransitionResult::new(next).with_effects(effects))
                }
            }
            ToolResult::Error { kind, message } => Ok(unwind(
                engine,
                Effect::failed(format!(
                    "tool '{top}' failed ({kind}): {message}",
                    top = engine.stack.top().map_or("?", |f| f.tool_name.as_str()),
                )),
            )),
        },

        // ============================================================
        // Depth-limit choice point
        // ============================================================
        (EngineState::AwaitingDepthDecision { child }, Event::DepthDecision { extend }) => {
            if extend {
                let mut next = engine.clone();
                next.depth.extend();
                push_child(&mut next, catalog, child.clone());
                let mut effects = vec![Effect::reply(format!(
                    "Depth budget extended to {} frames.",
                    next.depth.limit
                ))];
                effects.extend(enter_top(&mut next, catalog));
                Ok(TransitionResult::new(next).with_effects(effects))
            } else {
                Ok(unwind(engine, Effect::cancelled("depth_limit")))
            }
        }

        // ============================================================
        // Abandonment: explicit cancel, empty input, context switch
        // ============================================================
        (EngineState::Idle, Event::Cancel) => {
            // Idempotent: cancelling with nothing active is a no-op.
            Ok(TransitionResult::new(engine.clone()))
        }

        (_, Event::Cancel) => Ok(unwind(engine, Effect::cancelled("explicit"))),

        (EngineState::Idle, Event::EmptyInput) => Ok(TransitionResult::new(engine.clone())),

        (_, Event::EmptyInput) => {
            let mut next = engine.clone();
            next.state = EngineState::ConfirmingAbandon {
                resume: Box::new(engine.state.clone()),
            };
            Ok(TransitionResult::new(next).with_effect(Effect::ConfirmContinue))
        }

        (EngineState::ConfirmingAbandon { resume }, Event::ConfirmResume { resume: yes }) => {
            if yes {
                let mut next = engine.clone();
                next.state = (**resume).clone();
                let effects = reentry_effects(&next, catalog);
                Ok(TransitionResult::new(next).with_effects(effects))
            } else {
                Ok(unwind(engine, Effect::cancelled("explicit")))
            }
        }

        // A tool result can land while the continue-or-abandon question is
        // still open; the workflow moves forward and the question lapses.
        (EngineState::ConfirmingAbandon { resume }, Event::ToolFinished { result })
            if matches!(**resume, EngineState::Executing) =>
        {
            let mut restored = engine.clone();
            restored.state = EngineState::Executing;
            transition(&restored, catalog, Event::ToolFinished { result })
        }

        (
            EngineState::CollectingParameters { .. } | EngineState::ReadyToExecute,
            Event::CheckContinuity { text },
        ) => {
            let mut next = engine.clone();
            next.state = EngineState::JudgingContinuity {
                text: text.clone(),
                resume: Box::new(engine.state.clone()),
            };
            Ok(TransitionResult::new(next).with_effect(Effect::QueryContinuity { text }))
        }

        (EngineState::JudgingContinuity { text, resume }, Event::Continuity { verdict }) => {
            match verdict {
                ContinuityVerdict::Related => {
                    // The text belongs to the active step: re-dispatch it as
                    // a parameter value against the restored state.
                    let text = text.clone();
                    let mut restored = engine.clone();
                    restored.state = (**resume).clone();
                    match restored.state {
                        EngineState::CollectingParameters { .. } => {
                            transition(&restored, catalog, Event::ParameterValue { text })
                        }
                        // Nothing to collect; treat as a clarifying aside.
                        _ => Ok(TransitionResult::new(restored).with_effect(Effect::reply(
                            "Noted. Continuing with the current task.",
                        ))),
                    }
                }
                ContinuityVerdict::Unrelated => {
                    // Equivalent to cancel() followed by a fresh request.
                    let text = text.clone();
                    let unwound = unwind(engine, Effect::cancelled("context_switch"));
                    let mut next = unwound.next;
                    next.state = EngineState::AwaitingSelection;
                    next.original_request = Some(text.clone());
                    Ok(TransitionResult {
                        next,
                        effects: unwound.effects,
                    }
                    .with_effect(Effect::QuerySelection { request: text }))
                }
            }
        }

        (EngineState::JudgingContinuity { resume, .. }, Event::CollaboratorFailed { message }) => {
            // Transient: the workflow is preserved so nothing re-collects.
            let mut next = engine.clone();
            next.state = (**resume).clone();
            let mut effects = vec![Effect::reply(format!(
                "I couldn't reach the reasoning backend ({message}). \
                 Your current task is unchanged; please repeat that last input."
            ))];
            effects.extend(reentry_effects(&next, catalog));
            Ok(TransitionResult::new(next).with_effects(effects))
        }

        // ============================================================
        // Rejections
        // ============================================================
        (state, Event::UserRequest { .. }) => {
            debug_assert!(!state.is_idle());
            Err(TransitionError::WorkflowActive)
        }

        (state, event) => Err(invalid(event_name(&event), state)),
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Build a frame for `tool`, deriving missing parameters from the schema
/// minus the seeded arguments. Seeds outside the schema are kept as
/// contextual values.
fn build_frame(catalog: &Catalog, tool: &str, seed_args: ParamMap) -> ToolFrame {
    let missing = catalog
        .parameters(tool)
        .iter()
        .map(|p| p.name.clone())
        .filter(|name| !seed_args.contains_key(name))
        .collect();
    ToolFrame::new(tool, seed_args, missing)
}

/// The initial frame of a workflow gets its `prompt` parameter from the
/// original request when the selection did not already supply one.
fn seed_prompt_from_request(frame: &mut ToolFrame, request: Option<&str>) {
    if let Some(request) = request {
        if let Some(pos) = frame.missing.iter().position(|m| m == "prompt") {
            frame.missing.remove(pos);
            frame
                .collected
                .insert("prompt".to_string(), Value::String(request.to_string()));
        }
    }
}

/// Set the engine state from the top frame's readiness and produce the
/// matching entry effect. Ready frames emit nothing; the driver fires
/// `Event::Execute` when it observes readiness.
fn enter_top(engine: &mut Engine, catalog: &Catalog) -> Vec<Effect> {
    let Some(frame) = engine.stack.top() else {
        engine.state = EngineState::Idle;
        return vec![];
    };
    if frame.is_ready() {
        engine.state = EngineState::ReadyToExecute;
        vec![]
    } else {
        let tool = frame.tool_name.clone();
        let param = frame.missing[0].clone();
        let question = parameter_question(catalog, &tool, &param);
        engine.state = EngineState::CollectingParameters { retried: false };
        vec![Effect::PromptParameter {
            tool,
            parameter: param,
            question,
            guidance: None,
        }]
    }
}

fn parameter_question(catalog: &Catalog, tool: &str, param: &str) -> String {
    catalog
        .parameter(tool, param)
        .map_or_else(|| format!("Please provide '{param}'."), |spec| spec.prompt.clone())
}

/// Record the pending child on the requesting frame and push the child's
/// frame. Depth must already have been checked.
fn push_child(engine: &mut Engine, catalog: &Catalog, child: PendingPush) {
    if let Some(parent) = engine.stack.top_mut() {
        parent.pending_child = Some(PendingChild {
            tool_name: child.tool_name.clone(),
            assign_to: child.assign_to.clone(),
        });
    }
    let frame = build_frame(catalog, &child.tool_name, child.seed_args);
    engine.stack.push(frame);
}

/// Deliver a popped child's value into the new top frame, honouring the
/// tool-declared projection.
fn inject_child_result(engine: &mut Engine, value: Value) {
    let Some(parent) = engine.stack.top_mut() else {
        return;
    };
    let assign_to = parent
        .pending_child
        .take()
        .and_then(|child| child.assign_to)
        .unwrap_or_else(|| CHILD_RESULT_KEY.to_string());
    if let Some(pos) = parent.missing.iter().position(|m| *m == assign_to) {
        parent.missing.remove(pos);
    }
    parent.collected.insert(assign_to, value);
}

/// Clear the whole stack and original request, returning to Idle with a
/// single terminal outcome effect. Outcomes exist only for workflows; when
/// the stack never went non-empty (abandoning before a tool was selected),
/// a plain reply is produced instead.
fn unwind(engine: &Engine, outcome: Effect) -> TransitionResult {
    let had_workflow = !engine.stack.is_empty();
    let mut next = engine.clone();
    next.stack.clear();
    next.original_request = None;
    next.state = EngineState::Idle;
    if had_workflow {
        TransitionResult::new(next).with_effect(outcome)
    } else {
        TransitionResult::new(next).with_effect(Effect::reply("Request cancelled."))
    }
}

/// Effects to re-issue when a state is re-entered after a confirmation or a
/// transient collaborator failure, so the user sees the pending question
/// again. In-flight states re-emit nothing; their answers are still coming.
fn reentry_effects(engine: &Engine, catalog: &Catalog) -> Vec<Effect> {
    match &engine.state {
        EngineState::CollectingParameters { .. } => {
            let Some(frame) = engine.stack.top() else {
                return vec![];
            };
            let Some(param) = frame.missing.first() else {
                return vec![];
            };
            vec![Effect::PromptParameter {
                tool: frame.tool_name.clone(),
                parameter: param.clone(),
                question: parameter_question(catalog, &frame.tool_name, param),
                guidance: None,
            }]
        }
        EngineState::AwaitingDepthDecision { .. } => vec![Effect::OfferDepthExtension {
            snapshot: engine.snapshot(),
        }],
        _ => vec![],
    }
}

fn event_name(event: &Event) -> &'static str {
    match event {
        Event::UserRequest { .. } => "submit_user_request",
        Event::ParameterValue { .. } => "supply_parameter_value",
        Event::CheckContinuity { .. } => "detect_context_switch",
        Event::EmptyInput => "handle_empty_input",
        Event::ConfirmResume { .. } => "confirm_resume",
        Event::DepthDecision { .. } => "depth_decision",
        Event::Cancel => "cancel",
        Event::Execute => "execute_active_tool",
        Event::Selection { .. } => "selection_decision",
        Event::Continuity { .. } => "continuity_verdict",
        Event::CollaboratorFailed { .. } => "collaborator_failed",
        Event::ToolFinished { .. } => "tool_finished",
    }
}
