// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Node daemon
//!
//! Registers with the coordinator, heartbeats on an interval and, once an
//! account has linked the node, keeps claiming chunks and running them on the
//! local worker pool. Transient coordinator failures (401, 5xx, transport)
//! are retried with exponential backoff. A 404 on heartbeat means the
//! coordinator no longer knows this node as claimed, so it re-registers and
//! stops claiming until a heartbeat succeeds again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::api_client::{ClientError, CoordinatorClient};
use crate::config::NodeSettings;
use crate::job_claim::{ClaimedBatch, ClaimedChunk};
use crate::jobs::{ChunkResult, SimulationSpec};
use crate::nodes::{NodeMetadata, NodeStatus};
use crate::simulation::RotationCatalog;
use crate::worker::{
    resolve_worker_count, PoolConfig, RunHooks, RunOutcome, RunRegistry, RunRequest,
    WorkerPoolRunner,
};

/// Exponential backoff between retries of transient failures
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        Self {
            base,
            max: max.max(base),
            current: base,
        }
    }

    /// Delay to wait now; doubles the next one up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

/// Where the daemon stands with the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Unregistered,
    /// Registered but no account has entered the claim code yet
    AwaitingClaim { node_id: Uuid, claim_code: String },
    Linked { node_id: Uuid },
}

pub struct NodeDaemon {
    settings: NodeSettings,
    client: CoordinatorClient,
    catalog: Arc<RotationCatalog>,
    runs: RunRegistry,
    metadata: NodeMetadata,
    state: LinkState,
    configs: HashMap<String, SimulationSpec>,
    backoff: Backoff,
    chunks_completed: u64,
}

impl NodeDaemon {
    pub fn new(
        settings: NodeSettings,
        client: CoordinatorClient,
        catalog: RotationCatalog,
        runs: RunRegistry,
    ) -> Self {
        let backoff = Backoff::new(
            Duration::from_secs(settings.poll_secs.max(1)),
            Duration::from_secs(settings.max_backoff_secs),
        );
        let metadata = local_metadata(settings.workers);
        Self {
            settings,
            client,
            catalog: Arc::new(catalog),
            runs,
            metadata,
            state: LinkState::Unregistered,
            configs: HashMap::new(),
            backoff,
            chunks_completed: 0,
        }
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    pub fn chunks_completed(&self) -> u64 {
        self.chunks_completed
    }

    /// Run until `shutdown` fires. In-flight chunks are cancelled and left to
    /// the coordinator's requeue sweep.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        info!(
            version = %crate::version::get_version_string(),
            api_url = %self.settings.api_url,
            public_key = %self.client.keypair().public_key_base64(),
            "Node daemon starting"
        );

        let mut heartbeat = interval(Duration::from_secs(self.settings.heartbeat_secs.max(1)));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut poll = interval(Duration::from_secs(self.settings.poll_secs.max(1)));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = heartbeat.tick() => {
                    if let Err(e) = self.beat().await {
                        self.pause_after(&e, &shutdown).await;
                    }
                }
                _ = poll.tick(), if matches!(self.state, LinkState::Linked { .. }) => {
                    match self.poll_once(&shutdown).await {
                        Ok(_) => self.backoff.reset(),
                        Err(e) => self.pause_after(&e, &shutdown).await,
                    }
                }
            }
        }

        self.runs.cancel_all();
        if matches!(self.state, LinkState::Linked { .. }) {
            if let Err(e) = self.client.heartbeat(NodeStatus::Offline).await {
                debug!("Final offline heartbeat failed: {}", e);
            }
        }
        info!(chunks_completed = self.chunks_completed, "Node daemon stopped");
        Ok(())
    }

    /// Register (idempotent), returning the claim code to show the operator
    pub async fn register(&mut self) -> Result<String, ClientError> {
        let registration = self.client.register(&self.metadata).await?;
        if registration.claimed {
            info!(node_id = %registration.id, "Node registered and linked");
        } else {
            info!(
                node_id = %registration.id,
                claim_code = %registration.claim_code,
                "Node registered; enter the claim code to link it to an account"
            );
        }
        self.state = LinkState::AwaitingClaim {
            node_id: registration.id,
            claim_code: registration.claim_code.clone(),
        };
        Ok(registration.claim_code)
    }

    /// One heartbeat. Registers first when needed; a 404 means the node is
    /// unclaimed or unknown, so it registers again and waits.
    pub async fn beat(&mut self) -> Result<(), ClientError> {
        if self.state == LinkState::Unregistered {
            self.register().await?;
        }
        match self.client.heartbeat(NodeStatus::Online).await {
            Ok(response) => {
                if !matches!(self.state, LinkState::Linked { .. }) {
                    info!(node_id = %response.id, name = %response.name, "Node linked, claiming work");
                }
                self.state = LinkState::Linked {
                    node_id: response.id,
                };
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                if matches!(self.state, LinkState::Linked { .. }) {
                    warn!("Coordinator no longer recognises this node, re-registering");
                }
                self.register().await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    /// Claim one batch and run every chunk in it. Returns how many chunks
    /// were reported.
    pub async fn poll_once(&mut self, shutdown: &CancellationToken) -> Result<usize, ClientError> {
        let batch = match self.client.claim(self.settings.claim_batch_size).await {
            Ok(batch) => batch,
            Err(e) if e.is_not_found() => {
                warn!("Claim rejected as unknown node, re-registering");
                self.register().await?;
                return Ok(0);
            }
            Err(e) => return Err(e),
        };
        if batch.is_empty() {
            debug!("No work available");
            return Ok(0);
        }
        self.process_batch(batch, shutdown).await
    }

    async fn process_batch(
        &mut self,
        batch: ClaimedBatch,
        shutdown: &CancellationToken,
    ) -> Result<usize, ClientError> {
        let Some(config_hash) = batch.config_hash else {
            warn!(chunks = batch.chunks.len(), "Claimed chunks without a config hash");
            return Ok(0);
        };
        info!(chunks = batch.chunks.len(), config_hash = %config_hash, "Claimed work");

        let mut reported = 0;
        for chunk in batch.chunks {
            if shutdown.is_cancelled() {
                break;
            }
            let result = match self.spec_for(&config_hash).await {
                Ok(spec) => match self.execute(&spec, &chunk, shutdown).await {
                    Some(result) => result,
                    None => break,
                },
                Err(SpecError::Client(e)) => return Err(e),
                Err(SpecError::Invalid(message)) => failed_chunk(&chunk, message),
            };
            self.report(&chunk, result, shutdown).await?;
            reported += 1;
        }
        Ok(reported)
    }

    /// Cached by hash; configs are immutable once stored
    async fn spec_for(&mut self, hash: &str) -> Result<SimulationSpec, SpecError> {
        if let Some(spec) = self.configs.get(hash) {
            return Ok(spec.clone());
        }
        let config = self
            .client
            .fetch_config(hash)
            .await
            .map_err(SpecError::Client)?;
        let spec = SimulationSpec::from_config(&config)
            .map_err(|e| SpecError::Invalid(format!("invalid config {}: {}", hash, e)))?;
        debug!(config_hash = %hash, rotation = %spec.rotation, "Config cached");
        self.configs.insert(hash.to_string(), spec.clone());
        Ok(spec)
    }

    /// Run one chunk locally. `None` when cancelled, either by id or by
    /// daemon shutdown.
    async fn execute(
        &self,
        spec: &SimulationSpec,
        chunk: &ClaimedChunk,
        shutdown: &CancellationToken,
    ) -> Option<ChunkResult> {
        let runner = match self.catalog.build(&spec.rotation, spec.duration) {
            Ok(runner) => runner,
            Err(e) => return Some(failed_chunk(chunk, e.to_string())),
        };
        let pool = WorkerPoolRunner::new(
            runner,
            PoolConfig {
                workers: self.settings.workers,
                ..PoolConfig::default()
            },
        );
        let handle = self.runs.start_linked(chunk.id.to_string(), shutdown);
        let request = RunRequest {
            iterations: chunk.iterations,
            batch_size: self.settings.batch_size.max(1),
            seed_base: chunk.seed_offset,
        };
        debug!(chunk_id = %chunk.id, iterations = chunk.iterations, "Running chunk");

        match pool.run(request, handle.token(), RunHooks::default()).await {
            Ok(RunOutcome::Completed(summary)) => Some(summary.to_chunk_result()),
            Ok(RunOutcome::Interrupted) => {
                info!(chunk_id = %chunk.id, "Chunk run cancelled");
                None
            }
            Err(e) => {
                error!(chunk_id = %chunk.id, "Worker pool failed: {}", e);
                Some(failed_chunk(chunk, e.to_string()))
            }
        }
    }

    async fn report(
        &mut self,
        chunk: &ClaimedChunk,
        result: ChunkResult,
        shutdown: &CancellationToken,
    ) -> Result<(), ClientError> {
        loop {
            match self.client.complete(chunk.id, result.clone()).await {
                Ok(report) => {
                    self.chunks_completed += 1;
                    self.backoff.reset();
                    if report.already_completed {
                        debug!(chunk_id = %chunk.id, "Chunk was already recorded");
                    } else if report.job_complete {
                        info!(chunk_id = %chunk.id, "Chunk completed its job");
                    } else {
                        debug!(chunk_id = %chunk.id, "Chunk reported");
                    }
                    return Ok(());
                }
                Err(e) if e.is_retryable() && !shutdown.is_cancelled() => {
                    let delay = self.backoff.next_delay();
                    warn!(chunk_id = %chunk.id, delay_ms = delay.as_millis() as u64, "Completion failed, retrying: {}", e);
                    tokio::select! {
                        _ = shutdown.cancelled() => return Err(e),
                        _ = sleep(delay) => {}
                    }
                }
                Err(e) => {
                    // Ownership and validation failures are final for this chunk
                    warn!(chunk_id = %chunk.id, "Completion rejected: {}", e);
                    return Ok(());
                }
            }
        }
    }

    async fn pause_after(&mut self, e: &ClientError, shutdown: &CancellationToken) {
        if !e.is_retryable() {
            warn!("Coordinator call failed: {}", e);
            return;
        }
        let delay = self.backoff.next_delay();
        warn!(delay_ms = delay.as_millis() as u64, "Coordinator unavailable, backing off: {}", e);
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = sleep(delay) => {}
        }
    }
}

enum SpecError {
    Client(ClientError),
    Invalid(String),
}

/// Result reported for a chunk that could not run at all
fn failed_chunk(chunk: &ClaimedChunk, message: String) -> ChunkResult {
    warn!(chunk_id = %chunk.id, "Chunk failed: {}", message);
    ChunkResult {
        failed_iterations: chunk.iterations,
        errors: vec![message],
        ..Default::default()
    }
}

fn local_metadata(workers: i32) -> NodeMetadata {
    let total_cores = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .ok();
    let enabled = match resolve_worker_count(workers) {
        0 => 1,
        n => n as u32,
    };
    NodeMetadata {
        hostname: sysinfo::System::host_name(),
        total_cores,
        enabled_cores: Some(enabled),
        platform: Some(std::env::consts::OS.to_string()),
        version: Some(crate::version::VERSION_NUMBER.to_string()),
    }
}
