// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::crypto::VerifiedNode;
use crate::jobs::types::{ChunkRecord, JobStatus};
use crate::nodes::{NodeRegistry, RegistryError};
use crate::storage::{CoordinatorStore, StoreError};

pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const MAX_BATCH_SIZE: usize = 20;

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("node not found")]
    NodeNotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RegistryError> for ClaimError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Store(e) => ClaimError::Store(e),
            _ => ClaimError::NodeNotFound,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClaimConfig {
    pub default_batch_size: usize,
    pub max_batch_size: usize,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            default_batch_size: DEFAULT_BATCH_SIZE,
            max_batch_size: MAX_BATCH_SIZE,
        }
    }
}

impl ClaimConfig {
    /// Clamp a requested batch size into `[1, max_batch_size]`
    pub fn clamp_batch_size(&self, requested: Option<i64>) -> usize {
        let max = self.max_batch_size.max(1);
        match requested {
            None => self.default_batch_size.clamp(1, max),
            Some(n) if n < 1 => 1,
            Some(n) => (n as u64).min(max as u64) as usize,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedChunk {
    pub id: Uuid,
    pub iterations: u64,
    pub seed_offset: u64,
}

impl From<&ChunkRecord> for ClaimedChunk {
    fn from(chunk: &ChunkRecord) -> Self {
        Self {
            id: chunk.id,
            iterations: chunk.iterations,
            seed_offset: chunk.seed_offset,
        }
    }
}

/// Chunks won by one claim call. All share `config_hash`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedBatch {
    pub chunks: Vec<ClaimedChunk>,
    pub config_hash: Option<String>,
}

impl ClaimedBatch {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Hands out pending chunks to nodes, at most one winner per chunk
#[derive(Clone)]
pub struct ChunkClaimCoordinator {
    config: ClaimConfig,
    store: Arc<dyn CoordinatorStore>,
    registry: NodeRegistry,
}

impl ChunkClaimCoordinator {
    pub fn new(store: Arc<dyn CoordinatorStore>, registry: NodeRegistry, config: ClaimConfig) -> Self {
        Self {
            config,
            store,
            registry,
        }
    }

    pub fn config(&self) -> &ClaimConfig {
        &self.config
    }

    /// Claim up to `requested` chunks for a verified node.
    ///
    /// Losing a race is routine: the node gets fewer chunks, possibly none,
    /// and polls again later.
    pub async fn claim(
        &self,
        node: &VerifiedNode,
        requested: Option<i64>,
    ) -> Result<ClaimedBatch, ClaimError> {
        let batch_size = self.config.clamp_batch_size(requested);
        let record = self.registry.resolve_node(node).await?;
        let scope = self.registry.claim_scope(&record).await?;
        if scope.is_empty() {
            debug!(node_id = %record.id, "Node has no claim scope");
            return Ok(ClaimedBatch::default());
        }

        let candidates = self.store.pending_chunks_in_scope(&scope, batch_size).await?;
        let Some(config_hash) = candidates.first().map(|c| c.config_hash.clone()) else {
            return Ok(ClaimedBatch::default());
        };
        let ids: Vec<Uuid> = candidates
            .iter()
            .filter(|c| c.config_hash == config_hash)
            .map(|c| c.id)
            .collect();

        let won = self.store.assign_chunks(&ids, record.id, Utc::now()).await?;
        if won.len() < ids.len() {
            debug!(
                node_id = %record.id,
                wanted = ids.len(),
                won = won.len(),
                "Lost part of claim race"
            );
        }
        if won.is_empty() {
            return Ok(ClaimedBatch::default());
        }

        let jobs: BTreeSet<Uuid> = won.iter().map(|c| c.job_id).collect();
        for job_id in jobs {
            if self
                .store
                .transition_job(job_id, &[JobStatus::Pending], JobStatus::Running)
                .await?
            {
                info!(job_id = %job_id, "Job started");
            }
        }

        info!(node_id = %record.id, chunks = won.len(), "Chunks claimed");
        Ok(ClaimedBatch {
            chunks: won.iter().map(ClaimedChunk::from).collect(),
            config_hash: Some(config_hash),
        })
    }

    /// Return chunks held longer than `lease` to the pending pool
    pub async fn requeue_stale(&self, lease: Duration) -> Result<Vec<Uuid>, ClaimError> {
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| StoreError::Backend(format!("invalid lease: {}", e)))?;
        let requeued = self.store.requeue_stale_chunks(Utc::now() - lease).await?;
        if !requeued.is_empty() {
            warn!(count = requeued.len(), "Requeued stale chunks");
        }
        Ok(requeued)
    }

    /// Periodically requeue stale chunks until `shutdown` fires
    pub fn spawn_requeue_sweeper(
        &self,
        lease: Duration,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = coordinator.requeue_stale(lease).await {
                            error!("Stale chunk sweep failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}
