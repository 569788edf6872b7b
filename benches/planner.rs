/// Benchmarks for usage query planning and request parsing.
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use usage_forecasts::models::ForecastRequest;
use usage_forecasts::planner;

fn criterion_benchmark(c: &mut Criterion) {
    for count in [1, 16, 256] {
        let prefixes: Vec<String> = (0..count).map(|i| format!("{:02}", i % 100)).collect();
        let name = format!("municipality_pattern({})", count);
        c.bench_function(&name, |b| {
            b.iter(|| planner::municipality_pattern(black_box(&prefixes)))
        });

        let query = prefixes
            .iter()
            .map(|prefix| format!("key={prefix}&consumerGroup=A{prefix}"))
            .collect::<Vec<_>>()
            .join("&");
        let name = format!("parse_request({})", count);
        c.bench_function(&name, |b| {
            b.iter(|| ForecastRequest::parse("linreg", black_box(Some(query.as_str()))).unwrap())
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
