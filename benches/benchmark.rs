use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flowbot::expression::ExpressionEvaluator;
use flowbot::{Value, ValueMap};

fn scope() -> ValueMap {
    let value = Value::from(serde_json::json!({
        "args": {"value": 15, "name": "ann", "items": [3, 1, 2]},
        "user": {"id": "9", "name": "ann"}
    }));
    match value {
        Value::Map(map) => map,
        _ => ValueMap::new(),
    }
}

fn bench_evaluator(c: &mut Criterion) {
    let scope = scope();
    let cached = ExpressionEvaluator::new();
    let uncached = ExpressionEvaluator::with_cache_capacity(0);

    c.bench_function("evaluate condition (cached)", |b| {
        b.iter(|| cached.condition(black_box("args.value > 10 && user.id == '9'"), &scope))
    });
    c.bench_function("evaluate condition (uncached)", |b| {
        b.iter(|| uncached.condition(black_box("args.value > 10 && user.id == '9'"), &scope))
    });
    c.bench_function("interpolate template", |b| {
        b.iter(|| {
            cached.interpolate(
                black_box("hi ${upper(args.name)}, you have ${len(args.items)} items"),
                &scope,
            )
        })
    });
}

criterion_group!(benches, bench_evaluator);
criterion_main!(benches);
