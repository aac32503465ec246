//! Chat session driver
//!
//! Owns one engine instance and executes its effects: collaborator queries
//! and tool invocations run on spawned tasks, everything user-visible is
//! collected as output lines for the REPL to print.
//!
//! Async-born events are tagged with the generation of the stack they were
//! spawned for. The generation advances whenever a workflow ends, so a
//! result racing a cancellation arrives with a stale tag and is dropped
//! instead of mutating the replacement workflow.

use crate::collaborator::{ChatTurn, Collaborator};
use crate::engine::{
    transition, DepthPolicy, Effect, Engine, EngineState, Event, TransitionError, WorkflowOutcome,
};
use crate::registry::{ToolErrorKind, ToolRegistry, ToolResult};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

type TaggedEvent = (u64, Event);

/// Prior turns kept for selection prompts.
const HISTORY_LIMIT: usize = 20;

pub struct ChatSession {
    engine: Engine,
    collaborator: Arc<dyn Collaborator>,
    registry: Arc<ToolRegistry>,
    generation: u64,
    /// Async effects in flight for the current turn.
    outstanding: usize,
    tx: mpsc::UnboundedSender<TaggedEvent>,
    rx: mpsc::UnboundedReceiver<TaggedEvent>,
    output: Vec<String>,
    history: Vec<ChatTurn>,
}

impl ChatSession {
    pub fn new(registry: Arc<ToolRegistry>, collaborator: Arc<dyn Collaborator>) -> Self {
        Self::with_depth(registry, collaborator, DepthPolicy::default())
    }

    pub fn with_depth(
        registry: Arc<ToolRegistry>,
        collaborator: Arc<dyn Collaborator>,
        depth: DepthPolicy,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            engine: Engine::new(depth),
            collaborator,
            registry,
            generation: 0,
            outstanding: 0,
            tx,
            rx,
            output: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Process one line of user input to quiescence and return everything
    /// the session wants printed.
    pub async fn run_turn(&mut self, line: &str) -> Vec<String> {
        let line = line.trim();
        if let Some(command) = line.strip_prefix('/') {
            self.run_command(command);
        } else if let Some(event) = self.event_for_input(line) {
            self.apply(event);
        }
        self.pump().await;

        let output = std::mem::take(&mut self.output);
        if !line.is_empty() && !line.starts_with('/') {
            self.history.push(ChatTurn::user(line));
        }
        self.history
            .extend(output.iter().map(|l| ChatTurn::assistant(l.clone())));
        if self.history.len() > HISTORY_LIMIT {
            self.history.drain(..self.history.len() - HISTORY_LIMIT);
        }
        output
    }

    /// Map raw input to an event given where the conversation stands.
    fn event_for_input(&mut self, line: &str) -> Option<Event> {
        let state = &self.engine.state;
        if line.is_empty() {
            return match state {
                EngineState::Idle => None,
                // The pending question already expects an answer; empty
                // input there declines rather than stacking confirmations.
                EngineState::ConfirmingAbandon { .. } => {
                    Some(Event::ConfirmResume { resume: false })
                }
                EngineState::AwaitingDepthDecision { .. } => {
                    Some(Event::DepthDecision { extend: false })
                }
                _ => Some(Event::EmptyInput),
            };
        }
        if is_cancel_word(line) && !state.is_idle() {
            return Some(Event::Cancel);
        }
        match state {
            EngineState::Idle => Some(Event::UserRequest {
                text: line.to_string(),
            }),
            EngineState::ConfirmingAbandon { .. } => Some(Event::ConfirmResume {
                resume: is_affirmative(line),
            }),
            EngineState::AwaitingDepthDecision { .. } => Some(Event::DepthDecision {
                extend: is_affirmative(line),
            }),
            // Free text mid-collection goes through the continuity judgment;
            // the engine turns a Related verdict into a parameter value.
            EngineState::CollectingParameters { .. } => Some(Event::CheckContinuity {
                text: line.to_string(),
            }),
            _ => {
                self.output
                    .push("One moment, still working on the current step.".to_string());
                None
            }
        }
    }

    fn run_command(&mut self, command: &str) {
        match command {
            "help" => self.output.push(
                "Commands: /help, /tools, /stack, /cancel, /clear, /exit".to_string(),
            ),
            "tools" => self.output.push(self.registry.summary()),
            "stack" => self.output.push(self.engine.snapshot().render()),
            "cancel" => self.apply(Event::Cancel),
            "clear" => {
                self.engine = Engine::new(self.engine.depth);
                self.generation += 1;
                self.history.clear();
                self.output.push("Conversation cleared.".to_string());
            }
            other => self.output.push(format!("Unknown command: /{other}")),
        }
    }

    /// Route one async-born event through the generation filter.
    fn deliver(&mut self, generation: u64, event: Event) -> bool {
        if generation != self.generation {
            debug!(
                stale = generation,
                current = self.generation,
                "dropping event from an abandoned workflow"
            );
            return false;
        }
        self.apply(event);
        true
    }

    fn apply(&mut self, event: Event) {
        let result = match transition(&self.engine, &self.registry.catalog(), event) {
            Ok(result) => result,
            Err(TransitionError::WorkflowActive) => {
                self.output.push(
                    "A tool workflow is active; answer the pending question or say 'cancel'."
                        .to_string(),
                );
                return;
            }
            Err(e @ TransitionError::InvalidOperation { .. }) => {
                warn!(error = %e, "event rejected");
                return;
            }
        };

        let workflow_ended = !self.engine.state.is_idle() && result.next.state.is_idle();
        let emitted_outcome = result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::EmitOutcome { .. }));
        self.engine = result.next;
        if workflow_ended || emitted_outcome {
            self.generation += 1;
            debug!(generation = self.generation, "workflow boundary");
        }

        for effect in result.effects {
            self.execute(effect);
        }

        // Readiness never waits for user input.
        if matches!(self.engine.state, EngineState::ReadyToExecute) {
            self.apply(Event::Execute);
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::QuerySelection { request } => {
                let collaborator = Arc::clone(&self.collaborator);
                let summary = self.registry.summary();
                let history = self.history.clone();
                let tx = self.tx.clone();
                let generation = self.generation;
                self.outstanding += 1;
                tokio::spawn(async move {
                    let event = match collaborator.select_tool(&request, &history, &summary).await {
                        Ok(decision) => Event::Selection { decision },
                        Err(e) => Event::CollaboratorFailed {
                            message: e.to_string(),
                        },
                    };
                    let _ = tx.send((generation, event));
                });
            }
            Effect::QueryContinuity { text } => {
                let collaborator = Arc::clone(&self.collaborator);
                let snapshot = self.engine.snapshot();
                let tx = self.tx.clone();
                let generation = self.generation;
                self.outstanding += 1;
                tokio::spawn(async move {
                    let event = match collaborator.judge_continuity(&text, &snapshot).await {
                        Ok(verdict) => Event::Continuity { verdict },
                        Err(e) => Event::CollaboratorFailed {
                            message: e.to_string(),
                        },
                    };
                    let _ = tx.send((generation, event));
                });
            }
            Effect::InvokeTool { name, params } => {
                info!(tool = %name, "invoking");
                let tool = self.registry.resolve(&name);
                let tx = self.tx.clone();
                let generation = self.generation;
                self.outstanding += 1;
                tokio::spawn(async move {
                    let result = match tool {
                        Some(tool) => tool.invoke(&params).await,
                        None => ToolResult::error(
                            ToolErrorKind::Internal,
                            format!("tool '{name}' disappeared from the registry"),
                        ),
                    };
                    let _ = tx.send((generation, Event::ToolFinished { result }));
                });
            }
            Effect::PromptParameter {
                question, guidance, ..
            } => match guidance {
                Some(guidance) => self.output.push(format!("{guidance} {question}")),
                None => self.output.push(question),
            },
            Effect::Reply { text } => self.output.push(text),
            Effect::ConfirmContinue => {
                let tool = self
                    .engine
                    .stack
                    .top()
                    .map_or_else(|| "this task".to_string(), |f| format!("'{}'", f.tool_name));
                self.output
                    .push(format!("Still want to continue with {tool}? (y/n)"));
            }
            Effect::OfferDepthExtension { snapshot } => {
                self.output.push(format!(
                    "{}\n\nThis chain has reached the depth limit of {} nested tools. \
                     Extend the limit and keep going? (y/n)",
                    snapshot.render(),
                    snapshot.depth_limit
                ));
            }
            Effect::EmitOutcome { outcome } => self.output.push(render_outcome(&outcome)),
        }
    }

    /// Await spawned effects until the turn quiesces.
    async fn pump(&mut self) {
        while self.outstanding > 0 {
            let Some((generation, event)) = self.rx.recv().await else {
                break;
            };
            self.outstanding -= 1;
            self.deliver(generation, event);
        }
    }
}

fn is_affirmative(line: &str) -> bool {
    matches!(
        line.to_lowercase().as_str(),
        "y" | "yes" | "yeah" | "yep" | "ok" | "continue" | "extend" | "sure"
    )
}

fn is_cancel_word(line: &str) -> bool {
    matches!(
        line.to_lowercase().as_str(),
        "cancel" | "nevermind" | "never mind" | "stop" | "forget it"
    )
}

fn render_outcome(outcome: &WorkflowOutcome) -> String {
    match outcome {
        WorkflowOutcome::Completed(value) => match value {
            serde_json::Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other)
                .unwrap_or_else(|_| other.to_string()),
        },
        WorkflowOutcome::Cancelled(reason) => match reason.as_str() {
            "depth_limit" => "Stopped: the tool chain hit its depth limit.".to_string(),
            "context_switch" => "Okay, dropping that task.".to_string(),
            _ => "Cancelled.".to_string(),
        },
        WorkflowOutcome::Failed(error) => format!("Error: {error}"),
    }
}
