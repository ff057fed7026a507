// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use std::sync::Arc;

use fabstir_sim_node::jobs::{ChunkStatus, JobStatus};
use fabstir_sim_node::result_submission::CompletionError;
use uuid::Uuid;

use crate::common::{chunk_result, Harness};

#[tokio::test]
async fn test_job_runs_to_completion_across_uneven_chunks() {
    let h = Harness::new().await;
    let node = h.linked_node("alice").await;
    let job = h.job("alice", 2_500).await;
    assert_eq!(job.chunks, 3);

    let mut batch = h.claims.claim(&node, None).await.unwrap().chunks;
    batch.sort_by_key(|c| c.seed_offset);
    let shape: Vec<(u64, u64)> = batch.iter().map(|c| (c.iterations, c.seed_offset)).collect();
    assert_eq!(shape, vec![(1000, 0), (1000, 1000), (500, 2000)]);

    let means = [100.0, 200.0, 400.0];
    let mut last_completed = 0;
    for (i, chunk) in batch.iter().enumerate() {
        let report = h
            .completions
            .complete(&node, chunk.id, chunk_result(chunk.iterations, means[i]))
            .await
            .unwrap();
        assert!(report.success);
        assert!(!report.already_completed);
        assert_eq!(report.job_complete, i == 2);

        let progress = h.scheduler.job_progress("alice", job.job_id).await.unwrap();
        assert!(progress.completed_iterations > last_completed);
        last_completed = progress.completed_iterations;
    }

    let progress = h.scheduler.job_progress("alice", job.job_id).await.unwrap();
    assert_eq!(progress.status, JobStatus::Completed);
    assert_eq!(progress.completed_iterations, 2_500);
    assert_eq!(progress.chunks_completed, 3);
    let summary = progress.result.expect("completed job has a summary");
    assert_eq!(summary.total_iterations, 2_500);
    assert_eq!(summary.chunks_completed, 3);
    // (1000*100 + 1000*200 + 500*400) / 2500
    assert!((summary.mean_dps - 200.0).abs() < 1e-9);
    assert_eq!(summary.min_dps, 95.0);
    assert_eq!(summary.max_dps, 405.0);

    let stored = h.store.get_job(job.job_id).await.unwrap().unwrap();
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn test_duplicate_completion_counts_once() {
    let h = Harness::new().await;
    let node = h.linked_node("alice").await;
    let job = h.job("alice", 2_000).await;
    let chunk = h.claims.claim(&node, Some(1)).await.unwrap().chunks[0].clone();

    let first = h
        .completions
        .complete(&node, chunk.id, chunk_result(1000, 50.0))
        .await
        .unwrap();
    let again = h
        .completions
        .complete(&node, chunk.id, chunk_result(1000, 999.0))
        .await
        .unwrap();

    assert!(!first.already_completed);
    assert!(again.success);
    assert!(again.already_completed);
    assert!(!again.job_complete);

    let progress = h.scheduler.job_progress("alice", job.job_id).await.unwrap();
    assert_eq!(progress.completed_iterations, 1_000);
    assert_eq!(progress.status, JobStatus::Running);

    let stored = h.store.get_chunk(chunk.id).await.unwrap().unwrap();
    assert_eq!(stored.result.unwrap().mean_dps, 50.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_completions_record_one_result() {
    let h = Arc::new(Harness::new().await);
    let node = h.linked_node("alice").await;
    let job = h.job("alice", 1_000).await;
    let chunk = h.claims.claim(&node, None).await.unwrap().chunks[0].clone();

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let h = Arc::clone(&h);
        let id = chunk.id;
        tasks.push(tokio::spawn(async move {
            h.completions
                .complete(&node, id, chunk_result(1000, 10.0))
                .await
                .unwrap()
        }));
    }
    let mut fresh = 0;
    let mut finished = 0;
    for task in tasks {
        let report = task.await.unwrap();
        if !report.already_completed {
            fresh += 1;
        }
        if report.job_finalized {
            finished += 1;
        }
    }
    assert_eq!(fresh, 1);
    assert_eq!(finished, 1);

    let progress = h.scheduler.job_progress("alice", job.job_id).await.unwrap();
    assert_eq!(progress.completed_iterations, 1_000);
    assert_eq!(progress.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_other_node_cannot_complete() {
    let h = Harness::new().await;
    let owner = h.linked_node("alice").await;
    let intruder = h.linked_node("alice").await;
    h.job("alice", 1_000).await;
    let chunk = h.claims.claim(&owner, None).await.unwrap().chunks[0].clone();

    assert!(matches!(
        h.completions
            .complete(&intruder, chunk.id, chunk_result(1000, 1.0))
            .await,
        Err(CompletionError::Ownership(_))
    ));
    let stored = h.store.get_chunk(chunk.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ChunkStatus::Running);
}

#[tokio::test]
async fn test_unclaimed_chunk_cannot_be_completed() {
    let h = Harness::new().await;
    let node = h.linked_node("alice").await;
    let job = h.job("alice", 1_000).await;
    let pending = h.store.list_chunks(job.job_id).await.unwrap()[0].id;

    assert!(matches!(
        h.completions
            .complete(&node, pending, chunk_result(1000, 1.0))
            .await,
        Err(CompletionError::Ownership(_))
    ));
}

#[tokio::test]
async fn test_unknown_chunk() {
    let h = Harness::new().await;
    let node = h.linked_node("alice").await;
    assert!(matches!(
        h.completions
            .complete(&node, Uuid::new_v4(), chunk_result(10, 1.0))
            .await,
        Err(CompletionError::ChunkNotFound)
    ));
}

#[tokio::test]
async fn test_invalid_statistics_are_rejected() {
    let h = Harness::new().await;
    let node = h.linked_node("alice").await;
    h.job("alice", 1_000).await;
    let chunk = h.claims.claim(&node, None).await.unwrap().chunks[0].clone();

    let mut result = chunk_result(1000, 10.0);
    result.mean_dps = f64::NAN;
    assert!(matches!(
        h.completions.complete(&node, chunk.id, result).await,
        Err(CompletionError::Validation(_))
    ));
    // Still completable afterwards
    assert!(h
        .completions
        .complete(&node, chunk.id, chunk_result(1000, 10.0))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_failures_roll_up_into_summary() {
    let h = Harness::new().await;
    let node = h.linked_node("alice").await;
    let job = h.job("alice", 2_000).await;
    let chunks = h.claims.claim(&node, None).await.unwrap().chunks;

    for chunk in &chunks {
        let mut result = chunk_result(990, 100.0);
        result.failed_iterations = 10;
        result.errors = vec!["iteration 7 failed: boom".to_string()];
        h.completions.complete(&node, chunk.id, result).await.unwrap();
    }

    let summary = h
        .scheduler
        .job_progress("alice", job.job_id)
        .await
        .unwrap()
        .result
        .unwrap();
    assert_eq!(summary.failures, 20);
}
