//! Benchmarks for preference resolution and the decision cycle.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use sia::agent::Agent;
use sia::matcher::PreferenceSpec;
use sia::pref::PreferenceKind;
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

fn bench_resolve_indifferent(c: &mut Criterion) {
    let mut agent = Agent::new().unwrap();
    let top = agent.top_state().unwrap();
    let attr = agent.sym_constant("candidate");
    let mut specs = Vec::new();
    for _ in 0..64 {
        let v = agent.create_identifier('C');
        specs.push(acceptable(top, attr, v));
        specs.push(PreferenceSpec {
            kind: PreferenceKind::UnaryIndifferent,
            id: top,
            attr,
            value: v,
            referent: None,
            o_supported: false,
        });
    }
    agent.assert_instantiation(Some(top), &specs).unwrap();

    c.bench_function("resolve_indifferent_64", |bench| {
        bench.iter(|| black_box(agent.resolve(top, attr).unwrap()))
    });
}

fn bench_resolve_ordered(c: &mut Criterion) {
    let mut agent = Agent::new().unwrap();
    let top = agent.top_state().unwrap();
    let attr = agent.sym_constant("candidate");
    let values: Vec<_> = (0..64).map(|_| agent.create_identifier('C')).collect();
    let mut specs: Vec<_> = values.iter().map(|&v| acceptable(top, attr, v)).collect();
    // A total order: each value is better than its predecessor.
    for pair in values.windows(2) {
        specs.push(PreferenceSpec {
            kind: PreferenceKind::Better,
            id: top,
            attr,
            value: pair[1],
            referent: Some(pair[0]),
            o_supported: false,
        });
    }
    agent.assert_instantiation(Some(top), &specs).unwrap();

    c.bench_function("resolve_ordered_64", |bench| {
        bench.iter(|| black_box(agent.resolve(top, attr).unwrap()))
    });
}

fn bench_decision_cycle(c: &mut Criterion) {
    c.bench_function("idle_decision_cycle", |bench| {
        bench.iter_with_setup(
            || Agent::new().unwrap(),
            |mut agent| {
                agent.run_for_decisions(5).unwrap();
                black_box(agent.stats().decisions)
            },
        )
    });
}

criterion_group!(
    benches,
    bench_resolve_indifferent,
    bench_resolve_ordered,
    bench_decision_cycle
);
criterion_main!(benches);
