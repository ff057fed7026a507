// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Shared fixtures for the integration suites
#![allow(dead_code)]

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, Response};
use axum::Router;
use serde_json::{json, Value};

use fabstir_sim_node::api::{build_router, AccountKeys, AppState, RpcState};
use fabstir_sim_node::config::CoordinatorConfig;
use fabstir_sim_node::crypto::{NodeKeypair, RequestSigner, VerifiedNode};
use fabstir_sim_node::job_claim::{ChunkClaimCoordinator, ClaimConfig};
use fabstir_sim_node::jobs::{ChunkResult, CreatedJob, JobConfigStore, JobScheduler};
use fabstir_sim_node::nodes::{NodeMetadata, NodeRegistry};
use fabstir_sim_node::result_submission::ChunkCompletionAggregator;
use fabstir_sim_node::simulation::RotationCatalog;
use fabstir_sim_node::storage::{CoordinatorStore, MemoryStore};

pub const TEST_SECRET: &str = "integration-account-secret";

pub fn verified(keypair: &NodeKeypair) -> VerifiedNode {
    VerifiedNode {
        public_key: keypair.public_key_bytes(),
    }
}

pub fn metadata() -> NodeMetadata {
    NodeMetadata {
        hostname: Some("test-host".to_string()),
        total_cores: Some(8),
        enabled_cores: Some(4),
        platform: Some("linux".to_string()),
        version: Some("1.0.0".to_string()),
    }
}

pub fn sim_config(rotation: &str) -> Value {
    json!({ "rotation": rotation, "duration": 30 })
}

pub fn chunk_result(iterations: u64, mean_dps: f64) -> ChunkResult {
    ChunkResult {
        mean_dps,
        std_dps: 1.0,
        min_dps: mean_dps - 5.0,
        max_dps: mean_dps + 5.0,
        iterations,
        total_casts: iterations * 10,
        failed_iterations: 0,
        errors: Vec::new(),
    }
}

pub async fn seeded_store() -> Arc<dyn CoordinatorStore> {
    let store: Arc<dyn CoordinatorStore> = Arc::new(MemoryStore::new());
    for name in RotationCatalog::builtin().names() {
        store.insert_rotation(&name).await.unwrap();
    }
    store
}

/// Coordinator services wired over one in-memory store
pub struct Harness {
    pub store: Arc<dyn CoordinatorStore>,
    pub registry: NodeRegistry,
    pub configs: JobConfigStore,
    pub scheduler: JobScheduler,
    pub claims: ChunkClaimCoordinator,
    pub completions: ChunkCompletionAggregator,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_chunk_size(1000).await
    }

    pub async fn with_chunk_size(chunk_size: u64) -> Self {
        let store = seeded_store().await;
        let registry = NodeRegistry::new(store.clone());
        Self {
            configs: JobConfigStore::new(store.clone()),
            scheduler: JobScheduler::new(store.clone(), chunk_size),
            claims: ChunkClaimCoordinator::new(
                store.clone(),
                registry.clone(),
                ClaimConfig::default(),
            ),
            completions: ChunkCompletionAggregator::new(store.clone(), registry.clone()),
            registry,
            store,
        }
    }

    /// A registered node already linked to `account`
    pub async fn linked_node(&self, account: &str) -> VerifiedNode {
        let keypair = NodeKeypair::generate();
        let node = verified(&keypair);
        let (registration, _) = self.registry.register(&node, &metadata()).await.unwrap();
        self.registry
            .link_to_account(&registration.claim_code, account)
            .await
            .unwrap();
        node
    }

    pub async fn job(&self, account: &str, iterations: u64) -> CreatedJob {
        self.job_with_config(account, iterations, sim_config("scorch-only"))
            .await
    }

    pub async fn job_with_config(&self, account: &str, iterations: u64, config: Value) -> CreatedJob {
        let hash = self.configs.upsert(config).await.unwrap();
        self.scheduler
            .create_job(account, &hash, iterations)
            .await
            .unwrap()
    }
}

/// Full router over a seeded store, with account tokens enabled
pub async fn test_app() -> (Router, AppState) {
    test_app_with(CoordinatorConfig::default()).await
}

pub async fn test_app_with(config: CoordinatorConfig) -> (Router, AppState) {
    let config = CoordinatorConfig {
        account_jwt_secret: Some(TEST_SECRET.to_string()),
        rpc_workers: 2,
        ..config
    };
    let state = AppState::new(seeded_store().await, &config).unwrap();
    let rpc = RpcState::new(RotationCatalog::builtin(), config.rpc_workers);
    (build_router(state.clone(), rpc), state)
}

pub fn signed_post(keypair: &NodeKeypair, path: &str, body: &Value) -> Request<Body> {
    let bytes = serde_json::to_vec(body).unwrap();
    let headers = RequestSigner::new(keypair.clone()).sign_request("POST", path, &bytes);
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    for (name, value) in headers.as_pairs() {
        builder = builder.header(name, value);
    }
    builder.body(Body::from(bytes)).unwrap()
}

pub fn account_token(account: &str) -> String {
    AccountKeys::from_secret(TEST_SECRET.as_bytes())
        .issue(account, 3600)
        .unwrap()
}

pub fn account_post(account: &str, path: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", account_token(account)))
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

pub fn account_get(account: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", account_token(account)))
        .body(Body::empty())
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

/// Serve the full router on an ephemeral port; returns its base URL
pub async fn spawn_server() -> (String, AppState) {
    spawn_server_with(CoordinatorConfig::default()).await
}

pub async fn spawn_server_with(config: CoordinatorConfig) -> (String, AppState) {
    let (app, state) = test_app_with(config).await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state)
}
