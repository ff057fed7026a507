// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fabstir_sim_node::simulation::{IterationOutcome, IterationRunner, SimulationError};
use fabstir_sim_node::worker::{
    PoolConfig, RunHooks, RunOutcome, RunRegistry, RunRequest, RunSummary, WorkerPoolRunner,
};

/// Sleeps per iteration so runs stay in flight long enough to cancel
struct Slow {
    executed: AtomicU64,
}

impl IterationRunner for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    fn run_iteration(&self, _seed: u64) -> Result<IterationOutcome, SimulationError> {
        std::thread::sleep(Duration::from_millis(1));
        self.executed.fetch_add(1, Ordering::SeqCst);
        Ok(IterationOutcome {
            casts: 1,
            damage: 1.0,
            duration_secs: 1.0,
        })
    }
}

fn slow() -> Arc<Slow> {
    Arc::new(Slow {
        executed: AtomicU64::new(0),
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_through_registry_interrupts_run() {
    let runner = slow();
    let registry = RunRegistry::new();
    let handle = registry.start("chunk-42");
    let completed_hook = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&completed_hook);

    let pool = WorkerPoolRunner::new(
        runner.clone(),
        PoolConfig {
            workers: 2,
            ..PoolConfig::default()
        },
    );
    let token = handle.token();
    let task = tokio::spawn(async move {
        pool.run(
            RunRequest {
                iterations: 100_000,
                batch_size: 10,
                seed_base: 0,
            },
            token,
            RunHooks {
                on_progress: None,
                on_complete: Some(Box::new(move |_: &RunSummary| {
                    flag.store(true, Ordering::SeqCst)
                })),
            },
        )
        .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(registry.cancel("chunk-42"));

    let outcome = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("cancelled run should stop promptly")
        .unwrap()
        .unwrap();
    assert_eq!(outcome, RunOutcome::Interrupted);
    assert!(!completed_hook.load(Ordering::SeqCst));
    assert!(runner.executed.load(Ordering::SeqCst) < 100_000);

    drop(handle);
    assert!(!registry.is_active("chunk-42"));
    // Late cancel is a no-op
    assert!(!registry.cancel("chunk-42"));
}

#[tokio::test]
async fn test_inline_run_honours_cancellation() {
    let runner = slow();
    let registry = RunRegistry::new();
    let handle = registry.start("inline");
    let pool = WorkerPoolRunner::new(
        runner.clone(),
        PoolConfig {
            workers: 0,
            ..PoolConfig::default()
        },
    );
    let token = handle.token();
    let task = tokio::spawn(async move {
        pool.run(RunRequest::new(100_000), token, RunHooks::default())
            .await
    });

    tokio::time::sleep(Duration::from_millis(30)).await;
    registry.cancel_all();
    let outcome = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("inline run should stop promptly")
        .unwrap()
        .unwrap();
    assert_eq!(outcome, RunOutcome::Interrupted);
}

#[tokio::test]
async fn test_cancelling_finished_run_is_harmless() {
    let registry = RunRegistry::new();
    let handle = registry.start("done");
    let pool = WorkerPoolRunner::new(
        slow(),
        PoolConfig {
            workers: 1,
            ..PoolConfig::default()
        },
    );
    let outcome = pool
        .run(RunRequest::new(5), handle.token(), RunHooks::default())
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(_)));
    drop(handle);

    assert!(!registry.cancel("done"));
    assert_eq!(registry.active_count(), 0);
}

#[tokio::test]
async fn test_registries_are_independent() {
    let a = RunRegistry::new();
    let b = RunRegistry::new();
    let handle = a.start("shared-id");
    assert!(!b.cancel("shared-id"));
    assert!(!handle.token().is_cancelled());
    assert!(a.cancel("shared-id"));
    assert!(handle.token().is_cancelled());
}

/// One iteration outlasts the test; only the pool's own cancel path can end the run
struct Stuck;

impl IterationRunner for Stuck {
    fn name(&self) -> &str {
        "stuck"
    }

    fn run_iteration(&self, _seed: u64) -> Result<IterationOutcome, SimulationError> {
        std::thread::sleep(Duration::from_secs(3));
        Ok(IterationOutcome {
            casts: 1,
            damage: 1.0,
            duration_secs: 1.0,
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_does_not_wait_for_running_iteration() {
    let registry = RunRegistry::new();
    let handle = registry.start("stuck");
    let token = handle.token();
    let pool = WorkerPoolRunner::new(
        Arc::new(Stuck),
        PoolConfig {
            workers: 2,
            ..PoolConfig::default()
        },
    );
    let task = tokio::spawn(async move {
        let _registered = handle;
        pool.run(
            RunRequest {
                iterations: 4,
                batch_size: 1,
                seed_base: 0,
            },
            token,
            RunHooks::default(),
        )
        .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(registry.active_count(), 1);
    registry.cancel_all();

    let outcome = tokio::time::timeout(Duration::from_millis(1_000), task)
        .await
        .expect("cancel should not block on worker threads")
        .unwrap()
        .unwrap();
    assert_eq!(outcome, RunOutcome::Interrupted);
    assert_eq!(registry.active_count(), 0);
}
