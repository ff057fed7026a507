// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Run-simulation RPC peer
//!
//! `POST /rpc/run` executes a whole run on this machine's worker pool and
//! streams NDJSON frames back. The run is registered under a fresh id and is
//! cancelled as soon as the response body is dropped, which is what happens
//! when the client disconnects.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use super::errors::{ApiError, ApiJson};
use crate::monitoring::CoordinatorMetrics;
use crate::simulation::{RotationCatalog, MAX_DURATION_SECS};
use crate::worker::{
    HealthStatus, PoolConfig, RemoteRunRequest, RunFrame, RunHooks, RunOutcome, RunRegistry,
    RunRequest, WorkerPoolRunner,
};

/// Frames buffered per stream before progress frames start being dropped
const FRAME_BUFFER: usize = 64;
pub const MAX_RPC_ITERATIONS: u64 = 10_000_000;

#[derive(Clone)]
pub struct RpcState {
    catalog: Arc<RotationCatalog>,
    runs: RunRegistry,
    pool: PoolConfig,
    started: Instant,
    metrics: Option<CoordinatorMetrics>,
}

impl RpcState {
    pub fn new(catalog: RotationCatalog, workers: i32) -> Self {
        Self {
            catalog: Arc::new(catalog),
            runs: RunRegistry::new(),
            pool: PoolConfig {
                workers,
                ..PoolConfig::default()
            },
            started: Instant::now(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: CoordinatorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn runs(&self) -> &RunRegistry {
        &self.runs
    }
}

pub fn rpc_router(state: RpcState) -> Router {
    Router::new()
        .route("/rpc/run", post(run_simulation))
        .route("/rpc/health", get(health_check))
        .route("/rpc/rotations", get(list_rotations))
        .with_state(state)
}

async fn health_check(State(state): State<RpcState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        uptime_ms: state.started.elapsed().as_millis() as u64,
    })
}

async fn list_rotations(State(state): State<RpcState>) -> Json<Vec<String>> {
    Json(state.catalog.names())
}

async fn run_simulation(
    State(state): State<RpcState>,
    ApiJson(request): ApiJson<RemoteRunRequest>,
) -> Result<Response, ApiError> {
    if request.iterations == 0 || request.iterations > MAX_RPC_ITERATIONS {
        return Err(ApiError::ValidationError {
            field: "iterations".to_string(),
            message: format!("iterations must be between 1 and {}", MAX_RPC_ITERATIONS),
        });
    }
    if !(request.duration > 0.0 && request.duration <= MAX_DURATION_SECS) {
        return Err(ApiError::ValidationError {
            field: "duration".to_string(),
            message: format!("duration must be in (0, {}] seconds", MAX_DURATION_SECS),
        });
    }
    let runner = state.catalog.build(&request.rotation, request.duration)?;

    let run_id = Uuid::new_v4().to_string();
    let handle = state.runs.start(run_id.clone());
    let cancel = handle.token();
    // Dropping the response body (client gone) cancels the run
    let disconnect = cancel.clone().drop_guard();
    info!(
        run_id = %run_id,
        rotation = %request.rotation,
        iterations = request.iterations,
        "RPC run started"
    );

    let (tx, rx) = mpsc::channel::<RunFrame>(FRAME_BUFFER);
    let progress_tx = tx.clone();
    let hooks = RunHooks {
        on_progress: Some(Arc::new(move |progress| {
            // Progress is advisory; a slow reader just misses some
            let _ = progress_tx.try_send(RunFrame::Progress(progress));
        })),
        on_complete: None,
    };
    let pool = WorkerPoolRunner::new(runner, state.pool);
    let run = RunRequest {
        iterations: request.iterations,
        batch_size: request.batch_size.max(1),
        seed_base: 0,
    };
    let metrics = state.metrics.clone();

    tokio::spawn(async move {
        let _registered = handle;
        if let Some(m) = &metrics {
            m.active_remote_runs.inc();
        }
        let frame = match pool.run(run, cancel, hooks).await {
            Ok(RunOutcome::Completed(summary)) => Some(RunFrame::Result(summary)),
            Ok(RunOutcome::Interrupted) => {
                info!(run_id = %run_id, "RPC run cancelled by client");
                None
            }
            Err(e) => {
                warn!(run_id = %run_id, "RPC run failed: {}", e);
                Some(RunFrame::Error {
                    message: e.to_string(),
                })
            }
        };
        if let Some(frame) = frame {
            let _ = tx.send(frame).await;
        }
        if let Some(m) = &metrics {
            m.active_remote_runs.dec();
        }
    });

    let stream = ReceiverStream::new(rx).map(move |frame| {
        let _disconnect = &disconnect;
        Ok::<_, Infallible>(Bytes::from(frame.to_line()))
    });

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
        .into_response())
}
