// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use fabstir_sim_node::client::CoordinatorClient;
use fabstir_sim_node::crypto::NodeKeypair;
use fabstir_sim_node::nodes::NodeStatus;

use crate::common::{chunk_result, metadata, sim_config, spawn_server, verified};

#[tokio::test]
async fn test_signed_calls_end_to_end() {
    let (base_url, state) = spawn_server().await;
    let keypair = NodeKeypair::generate();
    let client = CoordinatorClient::new(&base_url, keypair.clone()).unwrap();

    let health = client.health().await.unwrap();
    assert_eq!(health["status"], "ok");

    let registration = client.register(&metadata()).await.unwrap();
    assert_eq!(registration.claim_code, keypair.claim_code());
    assert!(!registration.claimed);

    let err = client.heartbeat(NodeStatus::Online).await.unwrap_err();
    assert!(err.is_not_found());

    state
        .registry
        .link_to_account(&registration.claim_code, "alice")
        .await
        .unwrap();
    let beat = client.heartbeat(NodeStatus::Online).await.unwrap();
    assert_eq!(beat.id, registration.id);
    assert_eq!(beat.status, NodeStatus::Online);

    let hash = state.configs.upsert(sim_config("fire-mage")).await.unwrap();
    let job = state.scheduler.create_job("alice", &hash, 1500).await.unwrap();
    assert_eq!(job.chunks, 2);

    let batch = client.claim(Some(1)).await.unwrap();
    assert_eq!(batch.chunks.len(), 1);
    assert_eq!(batch.config_hash.as_deref(), Some(hash.as_str()));

    let config = client.fetch_config(&hash).await.unwrap();
    assert_eq!(config["rotation"], "fire-mage");

    let chunk = &batch.chunks[0];
    let report = client
        .complete(chunk.id, chunk_result(chunk.iterations, 120.0))
        .await
        .unwrap();
    assert!(report.success);
    assert!(!report.job_complete);

    // Node is still recognised with the same key
    assert!(state
        .registry
        .resolve_node(&verified(&keypair))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_missing_config_is_not_found() {
    let (base_url, _state) = spawn_server().await;
    let client = CoordinatorClient::new(&base_url, NodeKeypair::generate()).unwrap();
    let err = client.fetch_config(&"a".repeat(64)).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_unreachable_coordinator_is_retryable() {
    let client = CoordinatorClient::new("http://127.0.0.1:9", NodeKeypair::generate()).unwrap();
    let err = client.register(&metadata()).await.unwrap_err();
    assert!(err.is_retryable());
}
