use criterion::{criterion_group, criterion_main, Criterion};

use sluice::prelude::*;

/// One action invocation plus the full round that delivers its property
/// change to a connected reaction.
fn bench_dispatch(c: &mut Criterion) {
    let mut stage = Stage::new();
    stage
        .add_class(
            ClassBuilder::new("Counter")
                .prop(Property::int("count").settable())
                .action("inc", |stage, this, _args| {
                    let count = stage.peek(this, "count")?.as_int().unwrap_or(0);
                    stage.mutate(this, "count", count + 1)
                })
                .reaction("observe", &["count"], |_stage, _this, events| {
                    criterion::black_box(events);
                    Ok(())
                })
                .build()
                .unwrap(),
        )
        .unwrap();
    let counter = stage.create("Counter", Init::new()).unwrap();
    stage.iter();

    c.bench_function("invoke_and_round", |b| {
        b.iter(|| {
            stage.invoke(counter, "inc", vec![]).unwrap();
            stage.iter();
        })
    });

    c.bench_function("emit_coalesced_round", |b| {
        b.iter(|| {
            for _ in 0..16 {
                stage.invoke(counter, "inc", vec![]).unwrap();
            }
            stage.iter();
        })
    });
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
