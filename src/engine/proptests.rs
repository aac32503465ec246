//! Property-based tests for the orchestration engine
//!
//! These tests verify key invariants hold across all possible inputs.

#![allow(clippy::collapsible_if)]

use super::state::*;
use super::transition::*;
use super::*;
use crate::registry::{validators, Catalog, ParamMap, ParamSpec, ToolErrorKind, ToolResult};
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;

// ============================================================================
// Test Helpers
// ============================================================================

fn test_catalog() -> Catalog {
    let mut entries = BTreeMap::new();
    entries.insert(
        "alpha".to_string(),
        vec![
            ParamSpec::new("first", "First?", validators::text()),
            ParamSpec::new("second", "Second?", validators::number()),
        ],
    );
    entries.insert(
        "beta".to_string(),
        vec![ParamSpec::new("only", "Only?", validators::text())],
    );
    entries.insert("gamma".to_string(), vec![]);
    Catalog::from_entries(entries)
}

const KNOWN_TOOLS: &[&str] = &["alpha", "beta", "gamma"];
const SEED_KEYS: &[&str] = &["first", "second", "only", "extra"];

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_tool_name() -> impl Strategy<Value = String> {
    prop_oneof![
        proptest::sample::select(KNOWN_TOOLS).prop_map(String::from),
        Just("nonexistent".to_string()),
    ]
}

fn arb_seed_args() -> impl Strategy<Value = ParamMap> {
    proptest::collection::btree_map(
        proptest::sample::select(SEED_KEYS).prop_map(String::from),
        "[a-z0-9]{1,8}".prop_map(|s| json!(s)),
        0..3,
    )
}

fn arb_selection_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        "[a-zA-Z ]{1,20}".prop_map(|reply| Event::Selection {
            decision: SelectionDecision::NoToolNeeded { reply },
        }),
        (arb_tool_name(), arb_seed_args()).prop_map(|(name, args)| Event::Selection {
            decision: SelectionDecision::UseTool { name, args },
        }),
    ]
}

fn arb_tool_finished_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        "[a-z0-9 ]{0,20}".prop_map(|s| Event::ToolFinished {
            result: ToolResult::Value(json!(s)),
        }),
        (arb_tool_name(), arb_seed_args(), proptest::option::of("[a-z]{1,8}")).prop_map(
            |(name, seed_args, assign_to)| Event::ToolFinished {
                result: ToolResult::NeedsTool {
                    name,
                    seed_args,
                    assign_to,
                },
            }
        ),
        "[a-z ]{1,20}".prop_map(|m| Event::ToolFinished {
            result: ToolResult::error(ToolErrorKind::Internal, m),
        }),
    ]
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        "[a-zA-Z0-9 ]{1,20}".prop_map(|text| Event::UserRequest { text }),
        "[a-zA-Z0-9 ]{0,20}".prop_map(|text| Event::ParameterValue { text }),
        "[a-zA-Z0-9 ]{1,20}".prop_map(|text| Event::CheckContinuity { text }),
        Just(Event::EmptyInput),
        any::<bool>().prop_map(|resume| Event::ConfirmResume { resume }),
        any::<bool>().prop_map(|extend| Event::DepthDecision { extend }),
        Just(Event::Cancel),
        Just(Event::Execute),
        arb_selection_event(),
        prop_oneof![
            Just(ContinuityVerdict::Related),
            Just(ContinuityVerdict::Unrelated)
        ]
        .prop_map(|verdict| Event::Continuity { verdict }),
        "[a-z ]{1,20}".prop_map(|message| Event::CollaboratorFailed { message }),
        arb_tool_finished_event(),
    ]
}

// ============================================================================
// State Validity Checkers
// ============================================================================

fn is_valid(engine: &Engine) -> bool {
    // Depth never exceeds the (possibly extended) limit.
    if engine.stack.depth() > engine.depth.limit {
        return false;
    }
    match &engine.state {
        // Idle holds exactly when nothing is active.
        EngineState::Idle => engine.stack.is_empty() && engine.original_request.is_none(),
        // A collecting top frame must actually be missing something.
        EngineState::CollectingParameters { .. } => {
            engine.stack.top().is_some_and(|f| !f.missing.is_empty())
        }
        EngineState::ReadyToExecute | EngineState::Executing => {
            engine.stack.top().is_some_and(ToolFrame::is_ready)
        }
        _ => true,
    }
}

fn count_outcomes(effects: &[Effect]) -> usize {
    effects
        .iter()
        .filter(|e| matches!(e, Effect::EmitOutcome { .. }))
        .count()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    // Invariant 1: Valid state after any event sequence, and depth bounded.
    #[test]
    fn prop_transitions_preserve_validity(
        events in proptest::collection::vec(arb_event(), 0..30)
    ) {
        let catalog = test_catalog();
        let mut engine = Engine::default();

        for event in events {
            match transition(&engine, &catalog, event) {
                Ok(result) => {
                    prop_assert!(
                        is_valid(&result.next),
                        "Invalid engine after transition: {:?}",
                        result.next
                    );
                    engine = result.next;
                }
                Err(_) => { /* Rejected events leave state untouched. */ }
            }
        }
    }

    // Invariant 2: An outcome is emitted exactly when the stack empties.
    #[test]
    fn prop_outcome_iff_stack_empties(
        events in proptest::collection::vec(arb_event(), 0..30)
    ) {
        let catalog = test_catalog();
        let mut engine = Engine::default();

        for event in events {
            if let Ok(result) = transition(&engine, &catalog, event) {
                let emptied = !engine.stack.is_empty() && result.next.stack.is_empty();
                let outcomes = count_outcomes(&result.effects);
                prop_assert!(outcomes <= 1, "More than one outcome in one transition");
                prop_assert_eq!(
                    emptied,
                    outcomes == 1,
                    "Outcome emission must coincide with the stack emptying: {:?} -> {:?} ({:?})",
                    engine.state,
                    result.next.state,
                    result.effects
                );
                engine = result.next;
            }
        }
    }

    // Invariant 3: Cancel always reaches Idle and a second cancel is a no-op.
    #[test]
    fn prop_cancel_reaches_idle_idempotently(
        events in proptest::collection::vec(arb_event(), 0..20)
    ) {
        let catalog = test_catalog();
        let mut engine = Engine::default();
        for event in events {
            if let Ok(result) = transition(&engine, &catalog, event) {
                engine = result.next;
            }
        }

        let cancelled = transition(&engine, &catalog, Event::Cancel).unwrap();
        prop_assert!(cancelled.next.state.is_idle());
        prop_assert!(cancelled.next.stack.is_empty());

        let again = transition(&cancelled.next, &catalog, Event::Cancel).unwrap();
        prop_assert!(again.next.state.is_idle());
        prop_assert!(again.effects.is_empty(), "Second cancel must emit nothing");
    }

    // Invariant 4: Any state with an active workflow rejects a fresh request.
    #[test]
    fn prop_active_workflow_rejects_new_requests(
        events in proptest::collection::vec(arb_event(), 0..20),
        text in "[a-z ]{1,20}"
    ) {
        let catalog = test_catalog();
        let mut engine = Engine::default();
        for event in events {
            if let Ok(result) = transition(&engine, &catalog, event) {
                engine = result.next;
            }
        }

        let result = transition(&engine, &catalog, Event::UserRequest { text });
        if engine.state.is_idle() {
            prop_assert!(result.is_ok());
        } else {
            prop_assert!(result.is_err(), "Busy engine accepted a new request");
        }
    }

    // Invariant 5: Collection follows schema declaration order.
    #[test]
    fn prop_parameters_prompted_in_order(request in "[a-z ]{1,20}") {
        let catalog = test_catalog();
        let engine = transition(
            &Engine::default(),
            &catalog,
            Event::UserRequest { text: request },
        )
        .unwrap()
        .next;
        let mut engine = transition(
            &engine,
            &catalog,
            Event::Selection {
                decision: SelectionDecision::UseTool {
                    name: "alpha".to_string(),
                    args: ParamMap::new(),
                },
            },
        )
        .unwrap()
        .next;

        let mut prompted = vec![];
        for value in ["hello", "42"] {
            let frame = engine.stack.top().unwrap();
            prompted.push(frame.missing[0].clone());
            engine = transition(
                &engine,
                &catalog,
                Event::ParameterValue { text: value.to_string() },
            )
            .unwrap()
            .next;
        }
        prop_assert_eq!(prompted, vec!["first".to_string(), "second".to_string()]);
        prop_assert!(matches!(engine.state, EngineState::ReadyToExecute));
    }

    // Invariant 6: Depth decisions either grow the budget or unwind fully.
    #[test]
    fn prop_depth_decision_extends_or_unwinds(extend in any::<bool>()) {
        let catalog = test_catalog();
        let mut engine = Engine::new(DepthPolicy::with_limit(1));
        engine.original_request = Some("deep".to_string());
        engine.stack.push(ToolFrame::new("gamma", ParamMap::new(), vec![]));
        engine.state = EngineState::Executing;

        let offered = transition(
            &engine,
            &catalog,
            Event::ToolFinished {
                result: ToolResult::NeedsTool {
                    name: "gamma".to_string(),
                    seed_args: ParamMap::new(),
                    assign_to: None,
                },
            },
        )
        .unwrap()
        .next;
        prop_assert!(
            matches!(offered.state, EngineState::AwaitingDepthDecision { .. }),
            "expected AwaitingDepthDecision, got {:?}",
            offered.state
        );

        let result = transition(&offered, &catalog, Event::DepthDecision { extend }).unwrap();
        if extend {
            prop_assert_eq!(result.next.depth.limit, 2);
            prop_assert_eq!(result.next.stack.depth(), 2);
        } else {
            prop_assert!(result.next.state.is_idle());
            prop_assert!(
                matches!(
                    result.effects.as_slice(),
                    [Effect::EmitOutcome { outcome: WorkflowOutcome::Cancelled(ref r) }] if r == "depth_limit"
                ),
                "expected Cancelled(depth_limit) outcome, got {:?}",
                result.effects
            );
        }
    }

    // Invariant 7: Empty-input confirmation restores the exact prior state.
    #[test]
    fn prop_confirmation_roundtrip_is_lossless(
        events in proptest::collection::vec(arb_event(), 0..20)
    ) {
        let catalog = test_catalog();
        let mut engine = Engine::default();
        for event in events {
            if let Ok(result) = transition(&engine, &catalog, event) {
                engine = result.next;
            }
        }

        if let Ok(confirming) = transition(&engine, &catalog, Event::EmptyInput) {
            if matches!(confirming.next.state, EngineState::ConfirmingAbandon { .. }) {
                let resumed = transition(
                    &confirming.next,
                    &catalog,
                    Event::ConfirmResume { resume: true },
                )
                .unwrap();
                prop_assert_eq!(&resumed.next.state, &engine.state);
                prop_assert_eq!(&resumed.next.stack, &engine.stack);
                prop_assert_eq!(&resumed.next.original_request, &engine.original_request);
            }
        }
    }
}

// ============================================================================
// Sequence Tests - Multi-Step Scenarios
// ============================================================================

/// Drive a full mortgage-style conversation: request, selection, three
/// collected parameters, execution, completion.
#[test]
fn test_collect_and_execute_cycle() {
    let mut entries = BTreeMap::new();
    entries.insert(
        "mortgage".to_string(),
        vec![
            ParamSpec::new("principal", "Loan amount?", validators::number()),
            ParamSpec::new("rate", "Annual rate?", validators::number()),
            ParamSpec::new("years", "Term in years?", validators::number()),
        ],
    );
    let catalog = Catalog::from_entries(entries);
    let mut engine = Engine::default();

    let result = transition(
        &engine,
        &catalog,
        Event::UserRequest {
            text: "how much would my monthly payment be".to_string(),
        },
    )
    .unwrap();
    engine = result.next;
    assert!(matches!(
        result.effects.as_slice(),
        [Effect::QuerySelection { .. }]
    ));

    engine = transition(
        &engine,
        &catalog,
        Event::Selection {
            decision: SelectionDecision::UseTool {
                name: "mortgage".to_string(),
                args: ParamMap::new(),
            },
        },
    )
    .unwrap()
    .next;

    for value in ["$250,000", "5.5%", "30"] {
        engine = transition(
            &engine,
            &catalog,
            Event::ParameterValue {
                text: value.to_string(),
            },
        )
        .unwrap()
        .next;
    }
    assert!(matches!(engine.state, EngineState::ReadyToExecute));

    let result = transition(&engine, &catalog, Event::Execute).unwrap();
    engine = result.next;
    match result.effects.as_slice() {
        [Effect::InvokeTool { name, params }] => {
            assert_eq!(name, "mortgage");
            assert_eq!(params.get("principal"), Some(&json!(250_000.0)));
            assert_eq!(params.get("rate"), Some(&json!(5.5)));
            assert_eq!(params.get("years"), Some(&json!(30.0)));
        }
        other => panic!("expected an invocation, got {other:?}"),
    }

    let result = transition(
        &engine,
        &catalog,
        Event::ToolFinished {
            result: ToolResult::Value(json!({"monthly_payment": 1419.47})),
        },
    )
    .unwrap();
    assert!(result.next.state.is_idle());
    assert!(result.next.stack.is_empty());
    assert!(matches!(
        result.effects.as_slice(),
        [Effect::EmitOutcome {
            outcome: WorkflowOutcome::Completed(_)
        }]
    ));
}

/// Drive a nested chain: a code-creation tool requests a save tool mid-run,
/// the child completes, and its value re-arms the parent.
#[test]
fn test_nested_tool_chain() {
    let mut entries = BTreeMap::new();
    entries.insert(
        "create_code".to_string(),
        vec![
            ParamSpec::new("prompt", "What should the code do?", validators::text()),
            ParamSpec::new("workingdir", "Which directory?", validators::text()),
        ],
    );
    entries.insert(
        "save_file".to_string(),
        vec![ParamSpec::new("path", "Where?", validators::text())],
    );
    let catalog = Catalog::from_entries(entries);
    let mut engine = Engine::default();

    engine = transition(
        &engine,
        &catalog,
        Event::UserRequest {
            text: "create a script that prints fizzbuzz".to_string(),
        },
    )
    .unwrap()
    .next;

    // Selection seeds `prompt` from the original request; only the working
    // directory is collected conversationally.
    let result = transition(
        &engine,
        &catalog,
        Event::Selection {
            decision: SelectionDecision::UseTool {
                name: "create_code".to_string(),
                args: ParamMap::new(),
            },
        },
    )
    .unwrap();
    engine = result.next;
    match result.effects.as_slice() {
        [Effect::PromptParameter { parameter, .. }] => assert_eq!(parameter, "workingdir"),
        other => panic!("expected a workingdir prompt, got {other:?}"),
    }

    engine = transition(
        &engine,
        &catalog,
        Event::ParameterValue {
            text: "/tmp/proj".to_string(),
        },
    )
    .unwrap()
    .next;
    assert!(matches!(engine.state, EngineState::ReadyToExecute));
    engine = transition(&engine, &catalog, Event::Execute).unwrap().next;

    // The tool asks for save_file before it can finish.
    let mut seed = ParamMap::new();
    seed.insert("path".to_string(), json!("/tmp/proj/fizzbuzz.rs"));
    seed.insert("content".to_string(), json!("fn main() {}"));
    engine = transition(
        &engine,
        &catalog,
        Event::ToolFinished {
            result: ToolResult::NeedsTool {
                name: "save_file".to_string(),
                seed_args: seed,
                assign_to: Some("saved".to_string()),
            },
        },
    )
    .unwrap()
    .next;
    assert_eq!(engine.stack.depth(), 2);
    assert!(matches!(engine.state, EngineState::ReadyToExecute));

    engine = transition(&engine, &catalog, Event::Execute).unwrap().next;
    engine = transition(
        &engine,
        &catalog,
        Event::ToolFinished {
            result: ToolResult::Value(json!({"path": "/tmp/proj/fizzbuzz.rs"})),
        },
    )
    .unwrap()
    .next;

    // Back to the parent with the child's value injected.
    assert_eq!(engine.stack.depth(), 1);
    let parent = engine.stack.top().unwrap();
    assert_eq!(parent.tool_name, "create_code");
    assert!(parent.collected.contains_key("saved"));
    assert!(matches!(engine.state, EngineState::ReadyToExecute));

    // The re-invoked parent now completes the whole workflow.
    engine = transition(&engine, &catalog, Event::Execute).unwrap().next;
    let result = transition(
        &engine,
        &catalog,
        Event::ToolFinished {
            result: ToolResult::Value(json!("Created fizzbuzz.rs in /tmp/proj")),
        },
    )
    .unwrap();
    assert!(result.next.state.is_idle());
    assert!(matches!(
        result.effects.as_slice(),
        [Effect::EmitOutcome {
            outcome: WorkflowOutcome::Completed(_)
        }]
    ));
}

/// A context switch mid-collection cancels the workflow and immediately
/// re-selects for the new topic.
#[test]
fn test_context_switch_cancels_and_reselects() {
    let catalog = test_catalog();
    let mut engine = Engine::default();

    engine = transition(
        &engine,
        &catalog,
        Event::UserRequest {
            text: "do the alpha thing".to_string(),
        },
    )
    .unwrap()
    .next;
    engine = transition(
        &engine,
        &catalog,
        Event::Selection {
            decision: SelectionDecision::UseTool {
                name: "alpha".to_string(),
                args: ParamMap::new(),
            },
        },
    )
    .unwrap()
    .next;

    engine = transition(
        &engine,
        &catalog,
        Event::CheckContinuity {
            text: "actually, what's the weather".to_string(),
        },
    )
    .unwrap()
    .next;

    let result = transition(
        &engine,
        &catalog,
        Event::Continuity {
            verdict: ContinuityVerdict::Unrelated,
        },
    )
    .unwrap();

    assert!(matches!(result.next.state, EngineState::AwaitingSelection));
    assert!(result.next.stack.is_empty());
    assert_eq!(
        result.next.original_request.as_deref(),
        Some("actually, what's the weather")
    );
    assert_eq!(count_outcomes(&result.effects), 1);
}
