// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use fabstir_sim_node::jobs::{content_hash, plan_chunks, JobStatus, SchedulerError};
use serde_json::json;
use uuid::Uuid;

use crate::common::{sim_config, Harness};

#[test]
fn test_chunk_plan_covers_every_iteration_once() {
    for (total, size) in [(1, 1000), (999, 1000), (1000, 1000), (1001, 1000), (12_345, 77)] {
        let plan = plan_chunks(total, size);
        assert_eq!(plan.len() as u64, total.div_ceil(size));
        let mut next_seed = 0;
        for (i, chunk) in plan.iter().enumerate() {
            assert_eq!(chunk.seq as usize, i);
            assert_eq!(chunk.seed_offset, next_seed);
            assert!(chunk.iterations >= 1 && chunk.iterations <= size);
            next_seed += chunk.iterations;
        }
        assert_eq!(next_seed, total);
    }
}

#[tokio::test]
async fn test_config_hash_ignores_key_order() {
    let h = Harness::new().await;
    let a = h
        .configs
        .upsert(json!({"rotation": "fire-mage", "duration": 60, "extra": {"b": 1, "a": 2}}))
        .await
        .unwrap();
    let b = h
        .configs
        .upsert(json!({"extra": {"a": 2, "b": 1}, "duration": 60, "rotation": "fire-mage"}))
        .await
        .unwrap();
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);
    assert_eq!(a, content_hash(&json!({"duration": 60, "rotation": "fire-mage", "extra": {"a": 2, "b": 1}})));

    let fetched = h.configs.fetch(&a).await.unwrap();
    assert_eq!(fetched["rotation"], "fire-mage");
}

#[tokio::test]
async fn test_config_must_be_an_object() {
    let h = Harness::new().await;
    assert!(matches!(
        h.configs.upsert(json!(["fire-mage"])).await,
        Err(SchedulerError::Validation(_))
    ));
    assert!(matches!(
        h.configs.fetch("deadbeef").await,
        Err(SchedulerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_create_job_validation() {
    let h = Harness::new().await;
    let hash = h.configs.upsert(sim_config("fire-mage")).await.unwrap();

    assert!(matches!(
        h.scheduler.create_job("alice", &hash, 0).await,
        Err(SchedulerError::Validation(_))
    ));
    assert!(matches!(
        h.scheduler.create_job("alice", &hash, 10_000_001).await,
        Err(SchedulerError::Validation(_))
    ));
    assert!(matches!(
        h.scheduler.create_job("alice", "missing", 100).await,
        Err(SchedulerError::Validation(_))
    ));

    let unknown = h.configs.upsert(sim_config("no-such-rotation")).await.unwrap();
    assert!(matches!(
        h.scheduler.create_job("alice", &unknown, 100).await,
        Err(SchedulerError::Validation(_))
    ));
}

#[tokio::test]
async fn test_new_job_is_pending_and_fully_chunked() {
    let h = Harness::with_chunk_size(400).await;
    let created = h.job("alice", 1_000).await;
    assert_eq!(created.chunks, 3);

    let progress = h.scheduler.job_progress("alice", created.job_id).await.unwrap();
    assert_eq!(progress.status, JobStatus::Pending);
    assert_eq!(progress.total_iterations, 1_000);
    assert_eq!(progress.completed_iterations, 0);
    assert_eq!(progress.chunks_total, 3);
    assert!(progress.result.is_none());

    let chunks = h.store.list_chunks(created.job_id).await.unwrap();
    let iterations: Vec<u64> = chunks.iter().map(|c| c.iterations).collect();
    assert_eq!(iterations, vec![400, 400, 200]);
    let job = h.store.get_job(created.job_id).await.unwrap().unwrap();
    assert!(chunks.iter().all(|c| c.config_hash == job.config_hash));
}

#[tokio::test]
async fn test_job_status_is_private_to_owner() {
    let h = Harness::new().await;
    let created = h.job("alice", 1_000).await;
    assert!(matches!(
        h.scheduler.job_progress("bob", created.job_id).await,
        Err(SchedulerError::NotFound(_))
    ));
    assert!(matches!(
        h.scheduler.job_progress("alice", Uuid::new_v4()).await,
        Err(SchedulerError::NotFound(_))
    ));
}
