// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::auth::{require_node_auth, AccountKeys};
use super::handlers;
use super::rpc::{rpc_router, RpcState};
use crate::config::CoordinatorConfig;
use crate::crypto::NodeAuthVerifier;
use crate::job_claim::{ChunkClaimCoordinator, ClaimConfig};
use crate::jobs::{JobConfigStore, JobScheduler};
use crate::monitoring::CoordinatorMetrics;
use crate::nodes::NodeRegistry;
use crate::result_submission::ChunkCompletionAggregator;
use crate::simulation::RotationCatalog;
use crate::storage::CoordinatorStore;

/// Shared handles for every coordinator request handler
#[derive(Clone)]
pub struct AppState {
    pub verifier: NodeAuthVerifier,
    pub registry: NodeRegistry,
    pub configs: JobConfigStore,
    pub scheduler: JobScheduler,
    pub claims: ChunkClaimCoordinator,
    pub completions: ChunkCompletionAggregator,
    pub metrics: CoordinatorMetrics,
    pub account_keys: Option<Arc<AccountKeys>>,
}

impl AppState {
    pub fn new(store: Arc<dyn CoordinatorStore>, config: &CoordinatorConfig) -> Result<Self> {
        let registry = NodeRegistry::new(store.clone());
        let claim_config = ClaimConfig {
            default_batch_size: config.default_batch_size,
            max_batch_size: config.max_batch_size,
        };
        Ok(Self {
            verifier: NodeAuthVerifier::new(config.max_clock_skew_secs),
            configs: JobConfigStore::new(store.clone()),
            scheduler: JobScheduler::new(store.clone(), config.chunk_size)
                .with_max_iterations(config.max_job_iterations),
            claims: ChunkClaimCoordinator::new(store.clone(), registry.clone(), claim_config),
            completions: ChunkCompletionAggregator::new(store, registry.clone()),
            registry,
            metrics: CoordinatorMetrics::new()?,
            account_keys: config
                .account_jwt_secret
                .as_ref()
                .map(|secret| Arc::new(AccountKeys::from_secret(secret.as_bytes()))),
        })
    }
}

/// Coordinator routes without the RPC peer endpoints
pub fn coordinator_router(state: AppState) -> Router {
    let node_routes = Router::new()
        .route("/functions/v1/node-register", post(handlers::node_register))
        .route("/functions/v1/node-heartbeat", post(handlers::node_heartbeat))
        .route("/functions/v1/chunk-claim", post(handlers::chunk_claim))
        .route("/functions/v1/chunk-complete", post(handlers::chunk_complete))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_node_auth,
        ));

    let account_routes = Router::new()
        .route("/functions/v1/job-create", post(handlers::job_create))
        .route("/functions/v1/job-status", get(handlers::job_status))
        .route("/functions/v1/config-upsert", post(handlers::config_upsert))
        .route("/functions/v1/node-claim", post(handlers::node_claim))
        .route("/functions/v1/node-permission", post(handlers::node_permission));

    Router::new()
        .merge(node_routes)
        .merge(account_routes)
        // Content-addressed, so readable without credentials
        .route("/functions/v1/config-fetch", get(handlers::config_fetch))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
}

/// Full server: coordinator plus RPC peer, with CORS and request tracing
pub fn build_router(state: AppState, rpc: RpcState) -> Router {
    coordinator_router(state)
        .merge(rpc_router(rpc))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Seed reference data, start background sweeps and serve until `shutdown`
pub async fn start_server(
    config: CoordinatorConfig,
    store: Arc<dyn CoordinatorStore>,
    shutdown: CancellationToken,
) -> Result<()> {
    let catalog = RotationCatalog::builtin();
    for name in catalog.names() {
        store.insert_rotation(&name).await?;
    }

    let state = AppState::new(store, &config)?;
    if let Some(lease_secs) = config.chunk_lease_secs {
        info!(lease_secs, "Stale chunk requeue enabled");
        state.claims.spawn_requeue_sweeper(
            Duration::from_secs(lease_secs),
            Duration::from_secs(config.requeue_interval_secs.max(1)),
            shutdown.clone(),
        );
    }

    let rpc = RpcState::new(catalog, config.rpc_workers).with_metrics(state.metrics.clone());
    let app = build_router(state, rpc);

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen address {}", config.listen_addr))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Coordinator listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("Coordinator stopped");
    Ok(())
}
