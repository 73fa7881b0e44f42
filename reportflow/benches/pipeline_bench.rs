//! Benchmarks for run summary rendering and CSV serialization.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use reportflow::core::{
    Artifact, ArtifactKind, FailureRecord, RunMode, RunReport, RunStatus, StageName,
    StageResult, StageStatus,
};
use reportflow::pipeline::PipelineState;
use reportflow::stages::{build_payload, summary_text};
use reportflow::utils::{header_of, to_csv};
use serde_json::{json, Map, Value};
use uuid::Uuid;

fn sample_report() -> RunReport {
    let started = Utc::now();
    let artifacts = (0..20)
        .map(|i| Artifact::new(ArtifactKind::Extract, format!("query_{i}"), format!("/data/query_{i}.csv")))
        .collect();
    let failures = (0..5)
        .map(|i| FailureRecord::new(format!("query {i}"), "HTTP 502", 3))
        .collect();

    RunReport {
        run_id: Uuid::new_v4(),
        mode: RunMode::Full,
        tasks: vec!["daily".into(), "weekly".into()],
        started_at: started,
        finished_at: started,
        stages: vec![
            StageResult::succeeded(StageName::Extract, started, artifacts).with_failures(failures),
            StageResult::succeeded(StageName::Publish, started, Vec::new()),
            StageResult::succeeded(StageName::Notify, started, Vec::new()),
        ],
        states: vec![
            PipelineState::Idle,
            PipelineState::Extracting,
            PipelineState::Publishing,
            PipelineState::Notifying,
            PipelineState::Completed,
        ],
        overall: RunStatus::Succeeded,
    }
}

fn sample_rows(count: usize) -> Vec<Map<String, Value>> {
    (0..count)
        .map(|i| {
            let row = json!({
                "wh_hub_id": i % 40,
                "orders": i * 3,
                "note": if i % 7 == 0 { "late, \"rush\"" } else { "ok" },
                "datetime_run": "2026-01-05 08:00:00",
            });
            row.as_object().cloned().unwrap_or_default()
        })
        .collect()
}

fn summary_benchmark(c: &mut Criterion) {
    let report = sample_report();

    c.bench_function("build_payload", |b| b.iter(|| build_payload(black_box(&report))));
    c.bench_function("summary_text", |b| b.iter(|| summary_text(black_box(&report))));
    c.bench_function("run_status_derive", |b| {
        let statuses = [StageStatus::Succeeded, StageStatus::Failed, StageStatus::Skipped];
        b.iter(|| RunStatus::derive(black_box(&statuses), black_box(false)));
    });
}

fn csv_benchmark(c: &mut Criterion) {
    let rows = sample_rows(5_000);
    let columns = header_of(&[], &rows);

    c.bench_function("to_csv_5000_rows", |b| {
        b.iter(|| to_csv(black_box(&columns), black_box(&rows)));
    });
}

criterion_group!(benches, summary_benchmark, csv_benchmark);
criterion_main!(benches);
