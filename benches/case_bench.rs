use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};

use tvdiag_admin::case_convert::{into_camel, keys_to_camel, keys_to_snake};

fn step_page(rows: usize) -> Value {
    let items: Vec<Value> = (0..rows)
        .map(|i| {
            json!({
                "id": i,
                "problem_id": 7,
                "tv_interface_id": 3,
                "step_number": i + 1,
                "highlight_button": "ok",
                "estimated_seconds": 30,
                "actions": [
                    { "action_type": "press_button", "button": "menu", "is_active": true },
                    { "action_type": "wait", "custom_field_name": "x" }
                ],
                "created_at": 1_700_000_000,
                "updated_at": 1_700_000_000
            })
        })
        .collect();
    json!({ "items": items, "pagination": { "total_pages": 1, "total": rows } })
}

fn bench_case(c: &mut Criterion) {
    let mut group = c.benchmark_group("case_convert");
    for rows in [10, 100] {
        let snake = step_page(rows);
        let camel = keys_to_camel(&snake);

        group.bench_function(BenchmarkId::new("keys_to_camel", rows), |b| {
            b.iter(|| keys_to_camel(black_box(&snake)))
        });
        group.bench_function(BenchmarkId::new("keys_to_snake", rows), |b| {
            b.iter(|| keys_to_snake(black_box(&camel)))
        });
        group.bench_function(BenchmarkId::new("into_camel", rows), |b| {
            b.iter(|| into_camel(black_box(snake.clone())))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_case);
criterion_main!(benches);
