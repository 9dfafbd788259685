//! Scheduler tests: phase sequencing in both cycle modes, lifecycle hooks,
//! the I/O adapter seams, and the run drivers.

use std::cell::RefCell;
use std::rc::Rc;

use sia::agent::Agent;
use sia::error::SiaResult;
use sia::events::{Event, EventKind};
use sia::goal::ContextKind;
use sia::io::{InputContext, IoAdapter, OutputChange};
use sia::matcher::{Assertion, MatchOutput, Matcher, PreferenceSpec, WmeBatch};
use sia::pref::PreferenceKind;
use sia::scheduler::{Phase, RunOutcome};
use sia::symbol::{SymbolId, SymbolTable, TOP_GOAL_LEVEL};

/// Engine traces show up under `RUST_LOG=sia=debug`.
fn trace_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn phase_recorder(agent: &mut Agent) -> Rc<RefCell<Vec<Phase>>> {
    trace_init();
    let phases = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&phases);
    agent.register_handler(
        EventKind::BeforePhase,
        Box::new(move |event| {
            if let Event::Phase { phase } = event {
                sink.borrow_mut().push(*phase);
            }
        }),
    );
    phases
}

#[test]
fn propose_apply_mode_cycles_through_five_phases() {
    let mut agent = Agent::new().unwrap();
    let phases = phase_recorder(&mut agent);
    agent.run_for_phases(5).unwrap();
    assert_eq!(
        *phases.borrow(),
        vec![
            Phase::Input,
            Phase::Propose,
            Phase::Decision,
            Phase::Apply,
            Phase::Output,
        ]
    );
    agent.run_for_phases(1).unwrap();
    assert_eq!(phases.borrow().last(), Some(&Phase::Input));
}

#[test]
fn single_cycle_mode_loops_preference_and_working_memory() {
    let mut agent = Agent::new().unwrap();
    agent.set_option("elaboration-mode", 1).unwrap();
    let phases = phase_recorder(&mut agent);
    agent.run_for_phases(5).unwrap();
    assert_eq!(
        *phases.borrow(),
        vec![
            Phase::Input,
            Phase::Preference,
            Phase::WorkingMemory,
            Phase::Decision,
            Phase::Output,
        ]
    );
}

#[test]
fn decision_hooks_bracket_the_decision_phase() {
    let mut agent = Agent::new().unwrap();
    let log = Rc::new(RefCell::new(Vec::new()));
    for (kind, tag) in [
        (EventKind::BeforeDecision, "before"),
        (EventKind::AfterDecision, "after"),
        (EventKind::GoalCreated, "goal"),
    ] {
        let sink = Rc::clone(&log);
        agent.register_handler(kind, Box::new(move |_| sink.borrow_mut().push(tag)));
    }
    agent.run_for_decisions(1).unwrap();
    assert_eq!(*log.borrow(), vec!["before", "goal", "after"]);
}

#[test]
fn set_option_fires_param_changed() {
    let mut agent = Agent::new().unwrap();
    let seen = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&seen);
    agent.register_handler(
        EventKind::ParamChanged,
        Box::new(move |event| {
            if let Event::Param { name, value } = event {
                *sink.borrow_mut() = Some((name.clone(), *value));
            }
        }),
    );
    agent.set_option("trace-phases", 1).unwrap();
    assert_eq!(*seen.borrow(), Some(("trace-phases".to_string(), 1)));
    assert!(agent.set_option("no-such-option", 1).is_err());
}

#[test]
fn halted_agent_refuses_to_run() {
    let mut agent = Agent::new().unwrap();
    agent.halt();
    assert_eq!(agent.run_forever().unwrap(), RunOutcome::Halted);
    assert_eq!(agent.run_for_decisions(3).unwrap(), RunOutcome::Halted);
}

#[test]
fn stop_is_observed_at_the_next_phase_boundary() {
    let mut agent = Agent::new().unwrap();
    agent.run_for_phases(1).unwrap();
    agent.stop("host requested");
    // A new driver resets the stop request and keeps going.
    let outcome = agent.run_for_phases(2).unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
}

struct CountingAdapter {
    inputs: Rc<RefCell<u32>>,
    outputs: Rc<RefCell<Vec<OutputChange>>>,
}

impl IoAdapter for CountingAdapter {
    fn input_cycle(&mut self, input: &mut InputContext<'_, '_>) -> SiaResult<()> {
        let mut count = self.inputs.borrow_mut();
        *count += 1;
        if *count == 1 {
            let s = input.top_state().unwrap();
            let io = input.sym_constant("io");
            let val = input.sym_constant("val");
            let out = input.create_identifier('X');
            input.designate_output(out)?;
            input.add_wme(s, io, out)?;
            let answer = input.int_constant(42);
            input.add_wme(out, val, answer)?;
        }
        Ok(())
    }

    fn output_cycle(&mut self, changes: &[OutputChange]) -> SiaResult<()> {
        self.outputs.borrow_mut().extend_from_slice(changes);
        Ok(())
    }
}

#[test]
fn output_designated_changes_reach_the_adapter() {
    let mut agent = Agent::new().unwrap();
    let inputs = Rc::new(RefCell::new(0));
    let outputs = Rc::new(RefCell::new(Vec::new()));
    agent.set_io(Box::new(CountingAdapter {
        inputs: Rc::clone(&inputs),
        outputs: Rc::clone(&outputs),
    }));
    agent.run_for_phases(5).unwrap();

    assert_eq!(*inputs.borrow(), 1);
    let outputs = outputs.borrow();
    assert_eq!(outputs.len(), 1);
    assert!(outputs[0].added);
    assert!(outputs[0].wme.timetag > 0);
}

#[test]
fn nil_output_budget_stops_the_run() {
    let mut agent = Agent::new().unwrap();
    let inputs = Rc::new(RefCell::new(10));
    let outputs = Rc::new(RefCell::new(Vec::new()));
    agent.set_io(Box::new(CountingAdapter {
        inputs,
        outputs,
    }));
    agent.set_option("max-nil-output-cycles", 3).unwrap();
    let outcome = agent.run_forever().unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Stopped {
            reason: "maximum nil output cycles reached".to_string()
        }
    );
}

#[test]
fn run_until_decision_counts_filtered_context_decisions() {
    let mut agent = Agent::new().unwrap();
    // Every idle decision opens one state subgoal.
    let outcome = agent
        .run_until_decision(3, ContextKind::State, None)
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(agent.stack_depth(), 4);
}

/// Proposes an operator while `(s ^go t)` is in working memory and retracts
/// the firing when it leaves.
struct GoProposer {
    operator: Option<SymbolId>,
}

impl Matcher for GoProposer {
    fn update(&mut self, batch: &WmeBatch, syms: &mut SymbolTable) -> MatchOutput {
        let go = syms.sym_constant("go");
        let mut out = MatchOutput::default();
        for added in &batch.added {
            if added.attr == go {
                let operator = syms.sym_constant("operator");
                let op = *self
                    .operator
                    .get_or_insert_with(|| syms.make_identifier('O', TOP_GOAL_LEVEL));
                out.assertions.push(Assertion {
                    token: 1,
                    match_goal: Some(added.id),
                    preferences: vec![PreferenceSpec {
                        kind: PreferenceKind::Acceptable,
                        id: added.id,
                        attr: operator,
                        value: op,
                        referent: None,
                        o_supported: false,
                    }],
                });
            }
        }
        for removed in &batch.removed {
            if removed.attr == go {
                out.retractions.push(1);
            }
        }
        out
    }
}

#[test]
fn matcher_firings_flow_through_the_elaboration_loop() {
    let mut agent = Agent::with_matcher(Box::new(GoProposer { operator: None })).unwrap();
    let top = agent.top_state().unwrap();
    let operator = agent.sym_constant("operator");
    let wme = agent
        .manual_input(|input| {
            let s = input.top_state().unwrap();
            let go = input.sym_constant("go");
            let t = input.sym_constant("t");
            input.add_wme(s, go, t)
        })
        .unwrap();
    agent.run_for_decisions(1).unwrap();
    let op = agent.current_operator(top).expect("operator selected");
    assert_eq!(agent.slot_wme_values(top, operator), vec![op]);

    // Removing the trigger retracts the firing and deselects the operator.
    agent.manual_input(|input| input.remove_wme(wme)).unwrap();
    agent.run_for_decisions(1).unwrap();
    assert_eq!(agent.current_operator(top), None);
}

#[test]
fn stats_snapshot_serializes() {
    let mut agent = Agent::new().unwrap();
    agent.run_for_decisions(2).unwrap();
    let stats = agent.stats();
    assert_eq!(stats.decisions, 2);
    assert!(stats.phases >= 2);
    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["decisions"], 2);
    assert!(json["wme_count"].as_u64().unwrap() > 0);
}
