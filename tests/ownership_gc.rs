//! Ownership and garbage-collection tests: link counting, promotion,
//! demotion, and cascading reclamation of disconnected subgraphs.

use sia::agent::Agent;
use sia::matcher::PreferenceSpec;
use sia::pref::PreferenceKind;
use sia::symbol::{SymbolId, TOP_GOAL_LEVEL};

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
fn input_wmes_count_links() {
    let mut agent = Agent::new().unwrap();
    let s = agent.top_state().unwrap();
    let x = agent.sym_constant("x");
    let i1 = agent
        .manual_input(|input| {
            let i1 = input.create_identifier('I');
            let x = input.sym_constant("x");
            let s = input.top_state().unwrap();
            input.add_wme(s, x, i1)?;
            Ok(i1)
        })
        .unwrap();
    assert!(agent.wme_exists(s, x, i1));
    assert_eq!(agent.link_count(i1), Some(1));
}

#[test]
fn removing_the_last_link_collects_the_subgraph() {
    let mut agent = Agent::new().unwrap();
    let s = agent.top_state().unwrap();
    let x = agent.sym_constant("x");
    let y = agent.sym_constant("y");
    let five = agent.int_constant(5);
    let (i1, top_wme) = agent
        .manual_input(|input| {
            let i1 = input.create_identifier('I');
            let x = input.sym_constant("x");
            let y = input.sym_constant("y");
            let five = input.int_constant(5);
            let s = input.top_state().unwrap();
            let top_wme = input.add_wme(s, x, i1)?;
            input.add_wme(i1, y, five)?;
            Ok((i1, top_wme))
        })
        .unwrap();
    assert!(agent.wme_exists(s, x, i1));
    assert!(agent.wme_exists(i1, y, five));

    agent
        .manual_input(|input| input.remove_wme(top_wme))
        .unwrap();

    assert!(!agent.wme_exists(s, x, i1));
    assert!(!agent.wme_exists(i1, y, five));
    assert!(agent.wmes_of(i1).is_empty());
    assert_eq!(agent.link_count(i1), Some(0));
}

#[test]
fn demotion_pass_is_idempotent() {
    let mut agent = Agent::new().unwrap();
    let top_wme = agent
        .manual_input(|input| {
            let i1 = input.create_identifier('I');
            let x = input.sym_constant("x");
            let y = input.sym_constant("y");
            let five = input.int_constant(5);
            let s = input.top_state().unwrap();
            let top_wme = input.add_wme(s, x, i1)?;
            input.add_wme(i1, y, five)?;
            Ok(top_wme)
        })
        .unwrap();
    agent
        .manual_input(|input| input.remove_wme(top_wme))
        .unwrap();

    let wmes = agent.wme_count();
    let symbols = agent.symbol_count();
    // A flush with no intervening link changes must collect nothing more.
    agent.flush().unwrap();
    assert_eq!(agent.wme_count(), wmes);
    assert_eq!(agent.symbol_count(), symbols);
}

#[test]
fn promotion_pulls_the_transitive_closure_up() {
    let mut agent = Agent::new().unwrap();
    let top = agent.top_state().unwrap();

    // Reach a subgoal, then build a chain that belongs to it.
    agent.run_for_decisions(1).unwrap();
    let sub = agent.bottom_goal().unwrap();
    assert_ne!(sub, top);
    assert_eq!(agent.identifier_level(sub), Some(2));

    let thing = agent.sym_constant("thing");
    let part = agent.sym_constant("part");
    let x = agent.create_identifier_at('X', 2);
    let y = agent.create_identifier_at('Y', 2);
    agent
        .assert_instantiation(
            Some(sub),
            &[acceptable(sub, thing, x), acceptable(x, part, y)],
        )
        .unwrap();
    agent.run_for_elaborations(1).unwrap();
    assert_eq!(agent.identifier_level(x), Some(2));
    assert_eq!(agent.identifier_level(y), Some(2));

    // Linking the chain from the top state promotes it, transitively.
    let up = agent.sym_constant("up");
    agent
        .assert_instantiation(Some(top), &[acceptable(top, up, x)])
        .unwrap();
    agent.run_for_elaborations(1).unwrap();
    assert!(agent.wme_exists(top, up, x));
    assert_eq!(agent.identifier_level(x), Some(TOP_GOAL_LEVEL));
    assert_eq!(agent.identifier_level(y), Some(TOP_GOAL_LEVEL));
}

#[test]
fn closing_a_goal_reclaims_everything_it_owned() {
    let mut agent = Agent::new().unwrap();
    let top = agent.top_state().unwrap();
    let operator = agent.sym_constant("operator");

    // One decision with nothing to do opens a state no-change subgoal.
    agent.run_for_decisions(1).unwrap();
    let sub = agent.bottom_goal().unwrap();
    assert_ne!(sub, top);

    // Populate the subgoal with local structure.
    let local = agent.sym_constant("local");
    let x = agent.create_identifier_at('X', 2);
    agent
        .assert_instantiation(Some(sub), &[acceptable(sub, local, x)])
        .unwrap();
    agent.run_for_elaborations(1).unwrap();
    assert!(agent.wme_exists(sub, local, x));

    // Resolving the top impasse removes the subgoal at the next decision.
    let o1 = agent.create_identifier('O');
    agent
        .assert_instantiation(Some(top), &[acceptable(top, operator, o1)])
        .unwrap();
    agent.run_for_decisions(1).unwrap();

    assert_eq!(agent.bottom_goal(), Some(top));
    assert_eq!(agent.current_operator(top), Some(o1));
    // The subgoal identifier and everything reachable only from it are gone.
    assert_eq!(agent.symbol_refcount(sub), None);
    assert!(agent.wmes_of(sub).is_empty());
}

#[test]
fn reinitialize_drops_all_input_structure() {
    let mut agent = Agent::new().unwrap();
    agent
        .manual_input(|input| {
            let i1 = input.create_identifier('I');
            let x = input.sym_constant("x");
            let s = input.top_state().unwrap();
            input.add_wme(s, x, i1)?;
            Ok(())
        })
        .unwrap();
    let before = agent.wme_count();
    assert!(before > 0);
    agent.reinitialize().unwrap();
    let top = agent.top_state().unwrap();
    // Only the fresh top state's marker WMEs remain.
    assert_eq!(agent.wme_count(), agent.wmes_of(top).len());
}
