//! Goal-stack tests: impasse subgoaling, marker WMEs, tie resolution,
//! dependency-set violations, and the depth guard.

use std::cell::RefCell;
use std::rc::Rc;

use sia::agent::Agent;
use sia::decide::ImpasseKind;
use sia::events::{Event, EventKind};
use sia::matcher::PreferenceSpec;
use sia::pref::PreferenceKind;
use sia::scheduler::RunOutcome;
use sia::symbol::SymbolId;

fn acceptable(id: SymbolId, attr: SymbolId, value: SymbolId) -> PreferenceSpec {
    PreferenceSpec {
        kind: PreferenceKind::Acceptable,
        id,
        attr,
        value,
        referent: None,
        o_supported: false,
    }
}

#[test]
fn idle_decision_opens_a_state_no_change_subgoal() {
    let mut agent = Agent::new().unwrap();
    let top = agent.top_state().unwrap();
    agent.run_for_decisions(1).unwrap();

    let sub = agent.bottom_goal().unwrap();
    assert_ne!(sub, top);
    assert_eq!(agent.goal_stack(), vec![top, sub]);
    assert_eq!(agent.identifier_level(sub), Some(2));
    assert_eq!(agent.impasse_kind_of(sub), Some(ImpasseKind::NoChange));

    let superstate = agent.sym_constant("superstate");
    let impasse = agent.sym_constant("impasse");
    let no_change = agent.sym_constant("no-change");
    let quiescence = agent.sym_constant("quiescence");
    let t = agent.sym_constant("t");
    assert!(agent.wme_exists(sub, superstate, top));
    assert!(agent.wme_exists(sub, impasse, no_change));
    assert!(agent.wme_exists(sub, quiescence, t));
}

#[test]
fn operator_selection_resolves_without_impasse() {
    let mut agent = Agent::new().unwrap();
    let top = agent.top_state().unwrap();
    let operator = agent.sym_constant("operator");
    let o1 = agent.create_identifier('O');
    agent
        .assert_instantiation(Some(top), &[acceptable(top, operator, o1)])
        .unwrap();
    agent.run_for_decisions(1).unwrap();

    assert_eq!(agent.bottom_goal(), Some(top));
    assert_eq!(agent.current_operator(top), Some(o1));
    assert_eq!(agent.slot_wme_values(top, operator), vec![o1]);
}

#[test]
fn tie_impasse_carries_the_candidates_as_items() {
    let mut agent = Agent::new().unwrap();
    let top = agent.top_state().unwrap();
    let operator = agent.sym_constant("operator");
    let o1 = agent.create_identifier('O');
    let o2 = agent.create_identifier('O');
    agent
        .assert_instantiation(
            Some(top),
            &[
                acceptable(top, operator, o1),
                acceptable(top, operator, o2),
            ],
        )
        .unwrap();
    agent.run_for_decisions(1).unwrap();

    let sub = agent.bottom_goal().unwrap();
    assert_ne!(sub, top);
    assert_eq!(agent.impasse_kind_of(sub), Some(ImpasseKind::Tie));
    let item = agent.sym_constant("item");
    assert!(agent.wme_exists(sub, item, o1));
    assert!(agent.wme_exists(sub, item, o2));
}

#[test]
fn new_ordering_knowledge_resolves_a_tie() {
    let mut agent = Agent::new().unwrap();
    let top = agent.top_state().unwrap();
    let operator = agent.sym_constant("operator");
    let o1 = agent.create_identifier('O');
    let o2 = agent.create_identifier('O');
    agent
        .assert_instantiation(
            Some(top),
            &[
                acceptable(top, operator, o1),
                acceptable(top, operator, o2),
            ],
        )
        .unwrap();
    agent.run_for_decisions(1).unwrap();
    let sub = agent.bottom_goal().unwrap();
    assert_eq!(agent.impasse_kind_of(sub), Some(ImpasseKind::Tie));

    agent
        .assert_instantiation(
            Some(top),
            &[PreferenceSpec {
                kind: PreferenceKind::Better,
                id: top,
                attr: operator,
                value: o2,
                referent: Some(o1),
                o_supported: false,
            }],
        )
        .unwrap();
    agent.run_for_decisions(1).unwrap();

    assert_eq!(agent.bottom_goal(), Some(top));
    assert_eq!(agent.current_operator(top), Some(o2));
    assert_eq!(agent.symbol_refcount(sub), None);
}

#[test]
fn selected_operator_with_no_progress_impasses_on_operator_no_change() {
    let mut agent = Agent::new().unwrap();
    let top = agent.top_state().unwrap();
    let operator = agent.sym_constant("operator");
    let o1 = agent.create_identifier('O');
    agent
        .assert_instantiation(Some(top), &[acceptable(top, operator, o1)])
        .unwrap();
    agent.run_for_decisions(2).unwrap();

    let sub = agent.bottom_goal().unwrap();
    assert_ne!(sub, top);
    assert_eq!(agent.impasse_kind_of(sub), Some(ImpasseKind::NoChange));
    let item = agent.sym_constant("item");
    let attribute = agent.sym_constant("attribute");
    assert!(agent.wme_exists(sub, item, o1));
    assert!(agent.wme_exists(sub, attribute, operator));
}

#[test]
fn reconsider_forces_a_fresh_decision() {
    let mut agent = Agent::new().unwrap();
    let top = agent.top_state().unwrap();
    let operator = agent.sym_constant("operator");
    let o1 = agent.create_identifier('O');
    let o2 = agent.create_identifier('O');
    agent
        .assert_instantiation(Some(top), &[acceptable(top, operator, o1)])
        .unwrap();
    agent.run_for_decisions(1).unwrap();
    assert_eq!(agent.current_operator(top), Some(o1));

    // A reconsider on the installed value plus a better alternative.
    agent
        .assert_instantiation(
            Some(top),
            &[
                PreferenceSpec {
                    kind: PreferenceKind::Reconsider,
                    id: top,
                    attr: operator,
                    value: o1,
                    referent: None,
                    o_supported: false,
                },
                acceptable(top, operator, o2),
                PreferenceSpec {
                    kind: PreferenceKind::Better,
                    id: top,
                    attr: operator,
                    value: o2,
                    referent: Some(o1),
                    o_supported: false,
                },
            ],
        )
        .unwrap();
    agent.run_for_decisions(1).unwrap();
    assert_eq!(agent.current_operator(top), Some(o2));
}

#[test]
fn operator_retracted_before_the_decision_leaves_the_slot_decidable() {
    let mut agent = Agent::new().unwrap();
    let top = agent.top_state().unwrap();
    let operator = agent.sym_constant("operator");
    let o1 = agent.create_identifier('O');
    let inst = agent
        .assert_instantiation(Some(top), &[acceptable(top, operator, o1)])
        .unwrap();
    agent.retract_instantiation(inst).unwrap();
    agent.run_for_decisions(1).unwrap();

    assert_eq!(agent.current_operator(top), None);
    // The emptied context slot survives and resolves to no candidates.
    let d = agent.resolve(top, operator).unwrap();
    assert_eq!(d.impasse, ImpasseKind::None);
    assert!(d.candidates.is_empty());
    let sub = agent.bottom_goal().unwrap();
    assert_eq!(agent.impasse_kind_of(sub), Some(ImpasseKind::NoChange));
}

#[test]
fn deselecting_the_only_operator_reverts_to_a_state_no_change() {
    let mut agent = Agent::new().unwrap();
    let top = agent.top_state().unwrap();
    let operator = agent.sym_constant("operator");
    let o1 = agent.create_identifier('O');
    let inst = agent
        .assert_instantiation(Some(top), &[acceptable(top, operator, o1)])
        .unwrap();
    agent.run_for_decisions(1).unwrap();
    assert_eq!(agent.current_operator(top), Some(o1));

    agent.retract_instantiation(inst).unwrap();
    agent.run_for_decisions(1).unwrap();
    assert_eq!(agent.current_operator(top), None);
    let sub = agent.bottom_goal().unwrap();
    assert_ne!(sub, top);
    assert_eq!(agent.impasse_kind_of(sub), Some(ImpasseKind::NoChange));

    // An idle decision after the deselection walks the stack cleanly.
    agent.run_for_decisions(1).unwrap();
    assert_eq!(agent.stack_depth(), 3);
}

#[test]
fn gds_violation_retracts_the_goal() {
    let mut agent = Agent::new().unwrap();
    let retractions = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&retractions);
    agent.register_handler(
        EventKind::BeforeGoalRetraction,
        Box::new(move |event| {
            if let Event::GoalRetraction { goal, gds } = event {
                seen.borrow_mut().push((*goal, gds.len()));
            }
        }),
    );

    let wme = agent
        .manual_input(|input| {
            let s = input.top_state().unwrap();
            let flag = input.sym_constant("flag");
            let t = input.sym_constant("t");
            input.add_wme(s, flag, t)
        })
        .unwrap();
    agent.run_for_decisions(1).unwrap();
    let sub = agent.bottom_goal().unwrap();
    agent.add_wme_to_gds(sub, wme).unwrap();

    agent.manual_input(|input| input.remove_wme(wme)).unwrap();
    agent.run_for_decisions(1).unwrap();

    assert_ne!(agent.bottom_goal(), Some(sub));
    assert_eq!(agent.symbol_refcount(sub), None);
    let seen = retractions.borrow();
    assert!(seen.iter().any(|(g, n)| *g == sub && *n == 1));
}

#[test]
fn runaway_subgoaling_stops_at_the_depth_limit() {
    let mut agent = Agent::new().unwrap();
    agent.set_option("max-goal-depth", 5).unwrap();
    let outcome = agent.run_forever().unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Stopped {
            reason: "maximum goal stack depth exceeded".to_string()
        }
    );
    assert_eq!(agent.stack_depth(), 5);
    // The stack is intact and the agent can keep running.
    assert!(!agent.is_halted());
}

#[test]
fn attribute_impasse_on_an_undecidable_ordinary_slot() {
    let mut agent = Agent::new().unwrap();
    let top = agent.top_state().unwrap();
    let attr = agent.sym_constant("value");
    let a = agent.sym_constant("a");
    let b = agent.sym_constant("b");
    agent
        .assert_instantiation(
            Some(top),
            &[acceptable(top, attr, a), acceptable(top, attr, b)],
        )
        .unwrap();
    agent.run_for_elaborations(1).unwrap();

    let impasse = agent.attribute_impasse(top, attr).expect("impasse raised");
    assert!(agent.slot_wme_values(top, attr).is_empty());
    let kind_attr = agent.sym_constant("impasse");
    let tie = agent.sym_constant("tie");
    assert!(agent.wme_exists(impasse, kind_attr, tie));

    // Breaking the tie releases the impasse and installs the winner.
    agent
        .assert_instantiation(
            Some(top),
            &[PreferenceSpec {
                kind: PreferenceKind::Better,
                id: top,
                attr,
                value: a,
                referent: Some(b),
                o_supported: false,
            }],
        )
        .unwrap();
    agent.run_for_elaborations(1).unwrap();
    assert!(agent.attribute_impasse(top, attr).is_none());
    assert_eq!(agent.slot_wme_values(top, attr), vec![a]);
}
