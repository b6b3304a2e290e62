//! 📊 How long does it take to unpack a runner's result? base64, then zlib, then protobuf.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rflow::codec::{decode_compressed, decode_structured, encode_compressed};
use rflow::codec::structured::StructValue;
use rflow::schema::requests::PlanProperties;
use rflow::schema::results::{Autotest, RunnerResult, TestCase, TestCaseVerdict};
use serde_json::json;

fn runner_result(cases: usize) -> RunnerResult {
    RunnerResult {
        autotest_result: Some(Autotest {
            test_cases: (0..cases)
                .map(|n| {
                    let verdict = if n % 7 == 0 { TestCaseVerdict::Fail } else { TestCaseVerdict::Pass };
                    TestCase {
                        name: format!("suite/case-{n}"),
                        verdict: verdict as i32,
                        human_readable_summary: "🦆".repeat(n % 5),
                    }
                })
                .collect(),
            incomplete: false,
        }),
        ..RunnerResult::default()
    }
}

fn compressed_result_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_compressed");
    for cases in [1_usize, 100, 1_000] {
        let blob = match encode_compressed(&runner_result(cases)) {
            Ok(blob) => blob,
            Err(_) => continue,
        };
        group.bench_with_input(BenchmarkId::from_parameter(cases), &blob, |b, blob| {
            b.iter(|| {
                let decoded = decode_compressed::<RunnerResult>(black_box(blob)).ok();
                black_box(decoded);
            });
        });
    }
    group.finish();
}

fn structured_request_benchmark(c: &mut Criterion) {
    let requests: serde_json::Map<String, serde_json::Value> = (0..20)
        .map(|n| {
            (
                format!("request-{n}"),
                json!({
                    "params": {
                        "scheduling": {"managedPool": "MANAGED_POOL_CQ"},
                        "softwareAttributes": {"buildTarget": {"name": "nami"}},
                        "softwareDependencies": [{"chromeosBuild": "nami-release/R83-13020.67.0"}]
                    },
                    "testPlan": {"suite": [{"name": "bvt-inline"}]}
                }),
            )
        })
        .collect();
    let value = StructValue::from(json!({ "requests": requests }));

    c.bench_function("decode_structured_plan_20_requests", |b| {
        b.iter(|| {
            let decoded = decode_structured::<PlanProperties>(black_box(&value)).ok();
            black_box(decoded);
        });
    });
}

criterion_group!(benches, compressed_result_benchmark, structured_request_benchmark);
criterion_main!(benches);
