use criterion::{black_box, criterion_group, criterion_main, Criterion};

use strand_core::atoms::{AtomStore, StateAtom, SubscriptionContainer, ValueAtom};
use strand_core::config::EngineConfig;
use strand_core::hooks::{EnvironmentValues, HookDispatcher};

fn stable_hook_pass(c: &mut Criterion) {
    let mut dispatcher = HookDispatcher::new(|| {});
    let env = EnvironmentValues::new(EngineConfig::lenient());

    c.bench_function("stable_hook_pass_16", |b| {
        b.iter(|| {
            dispatcher.scoped(env.clone(), |scope| {
                for i in 0..8 {
                    scope.use_state(move || i);
                    scope.use_memo(i, move || i * 2);
                }
            })
        });
    });
}

fn set_and_read_chain(c: &mut Criterion) {
    let store = AtomStore::with_config(EngineConfig::lenient());
    let base = StateAtom::new(|_| 0_u64);
    let mut tail = {
        let source = base.clone();
        ValueAtom::new(move |ctx| ctx.read(&source) + 1)
    };
    for depth in 1..16_u32 {
        let source = tail.clone();
        tail = ValueAtom::new(move |ctx| ctx.read(&source) + 1).keyed(depth);
    }
    let consumer = SubscriptionContainer::new(|| {});
    store.watch(&tail, &consumer);

    let mut next = 0;
    c.bench_function("set_then_read_chain_16", |b| {
        b.iter(|| {
            next += 1;
            store.set(&base, next);
            black_box(store.read(&tail))
        });
    });
}

criterion_group!(benches, stable_hook_pass, set_and_read_chain);
criterion_main!(benches);
