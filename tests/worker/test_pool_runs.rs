// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use fabstir_sim_node::simulation::{
    IterationOutcome, IterationRunner, RotationCatalog, SimulationError,
};
use fabstir_sim_node::worker::{
    PoolConfig, PoolProgress, RunHooks, RunOutcome, RunRequest, RunSummary, WorkerPoolRunner, SAMPLE_LIMIT,
};
use tokio_util::sync::CancellationToken;

/// Fails every seed divisible by 10
struct Flaky;

impl IterationRunner for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    fn run_iteration(&self, seed: u64) -> Result<IterationOutcome, SimulationError> {
        if seed % 10 == 0 {
            return Err(SimulationError::Iteration {
                seed,
                message: "boom".to_string(),
            });
        }
        Ok(IterationOutcome {
            casts: 3,
            damage: 300.0,
            duration_secs: 10.0,
        })
    }
}

fn pool(runner: Arc<dyn IterationRunner>, workers: i32) -> WorkerPoolRunner {
    WorkerPoolRunner::new(
        runner,
        PoolConfig {
            workers,
            ..PoolConfig::default()
        },
    )
}

async fn completed(pool: &WorkerPoolRunner, request: RunRequest) -> RunSummary {
    match pool
        .run(request, CancellationToken::new(), RunHooks::default())
        .await
        .unwrap()
    {
        RunOutcome::Completed(summary) => summary,
        RunOutcome::Interrupted => panic!("run should complete"),
    }
}

#[tokio::test]
async fn test_builtin_rotation_is_deterministic_across_worker_counts() {
    let runner = RotationCatalog::builtin().build("fire-mage", 60.0).unwrap();
    let request = RunRequest {
        iterations: 3_000,
        batch_size: 37,
        seed_base: 11,
    };
    let single = completed(&pool(runner.clone(), 0), request).await;
    let many = completed(&pool(runner, 4), request).await;

    assert_eq!(single.completed_sims, 3_000);
    assert_eq!(single.total_casts, many.total_casts);
    assert!((single.mean_dps - many.mean_dps).abs() < 1e-6);
    assert!((single.std_dps - many.std_dps).abs() < 1e-6);
    assert_eq!(single.min_dps, many.min_dps);
    assert_eq!(single.max_dps, many.max_dps);
}

#[tokio::test]
async fn test_seed_offsets_partition_a_run() {
    let runner = RotationCatalog::builtin().build("fire-mage", 30.0).unwrap();
    let p = pool(runner, 2);
    let whole = completed(
        &p,
        RunRequest {
            iterations: 2_000,
            batch_size: 100,
            seed_base: 0,
        },
    )
    .await;
    let head = completed(
        &p,
        RunRequest {
            iterations: 1_000,
            batch_size: 100,
            seed_base: 0,
        },
    )
    .await;
    let tail = completed(
        &p,
        RunRequest {
            iterations: 1_000,
            batch_size: 100,
            seed_base: 1_000,
        },
    )
    .await;

    assert_eq!(whole.total_casts, head.total_casts + tail.total_casts);
    let recombined = (head.mean_dps + tail.mean_dps) / 2.0;
    assert!((whole.mean_dps - recombined).abs() < 1e-6);
}

#[tokio::test]
async fn test_failures_are_collected_not_fatal() {
    let summary = completed(
        &pool(Arc::new(Flaky), 3),
        RunRequest {
            iterations: 1_000,
            batch_size: 25,
            seed_base: 0,
        },
    )
    .await;
    assert_eq!(summary.failed_sims, 100);
    assert_eq!(summary.completed_sims, 900);
    assert_eq!(summary.errors.len(), SAMPLE_LIMIT);
    assert!(summary.errors[0].contains("boom"));
    assert_eq!(summary.mean_dps, 30.0);

    let chunk = summary.to_chunk_result();
    assert_eq!(chunk.iterations, 900);
    assert_eq!(chunk.failed_iterations, 100);
}

#[tokio::test]
async fn test_retained_state_is_bounded() {
    let runner = RotationCatalog::builtin().build("scorch-only", 15.0).unwrap();
    let summary = completed(
        &pool(runner, 2),
        RunRequest {
            iterations: 20_000,
            batch_size: 500,
            seed_base: 0,
        },
    )
    .await;
    assert_eq!(summary.completed_sims, 20_000);
    assert_eq!(summary.samples.len(), SAMPLE_LIMIT);
    assert_eq!(summary.avg_casts, 10.0);
}

#[tokio::test]
async fn test_on_complete_and_progress_hooks() {
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let progress_calls = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&progress_calls);
    let hooks = RunHooks {
        on_progress: Some(Arc::new(move |p: PoolProgress| {
            assert!(p.completed <= p.total);
            counter.fetch_add(1, Ordering::SeqCst);
        })),
        on_complete: Some(Box::new(move |summary: &RunSummary| {
            *sink.lock().unwrap() = Some(summary.completed_sims);
        })),
    };
    let outcome = pool(Arc::new(Flaky), 2)
        .run(
            RunRequest {
                iterations: 30_000,
                batch_size: 1_000,
                seed_base: 1,
            },
            CancellationToken::new(),
            hooks,
        )
        .await
        .unwrap();

    assert!(matches!(outcome, RunOutcome::Completed(_)));
    assert_eq!(*seen.lock().unwrap(), Some(27_000));
    assert_eq!(progress_calls.load(Ordering::SeqCst), 3);
}
