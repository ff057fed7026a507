// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! In-memory coordinator store
//!
//! Each trait method runs inside one write (or read) critical section, which
//! makes every conditional update indivisible in the same way a single SQL
//! `UPDATE ... WHERE` statement is.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CoordinatorStore, OwnerLink, StoreError};
use crate::jobs::types::{
    ChunkRecord, ChunkResult, ChunkStatus, ConfigRecord, JobRecord, JobStatus, JobSummary,
};
use crate::nodes::types::{ClaimScope, NodePermission, NodeRecord, NodeStatus};

#[derive(Default)]
struct Inner {
    nodes: HashMap<Uuid, NodeRecord>,
    nodes_by_key: HashMap<String, Uuid>,
    permissions: Vec<NodePermission>,
    configs: HashMap<String, ConfigRecord>,
    rotations: HashSet<String>,
    jobs: HashMap<Uuid, JobRecord>,
    chunks: HashMap<Uuid, ChunkRecord>,
    chunks_by_job: HashMap<Uuid, Vec<Uuid>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinatorStore for MemoryStore {
    async fn find_node_by_key(&self, public_key: &str) -> Result<Option<NodeRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .nodes_by_key
            .get(public_key)
            .and_then(|id| inner.nodes.get(id))
            .cloned())
    }

    async fn find_node_by_claim_code(&self, code: &str) -> Result<Option<NodeRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .nodes
            .values()
            .find(|n| n.claim_code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn get_node(&self, node_id: Uuid) -> Result<Option<NodeRecord>, StoreError> {
        Ok(self.inner.read().await.nodes.get(&node_id).cloned())
    }

    async fn insert_node_if_absent(
        &self,
        node: NodeRecord,
    ) -> Result<(NodeRecord, bool), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner
            .nodes_by_key
            .get(&node.public_key)
            .and_then(|id| inner.nodes.get(id))
        {
            return Ok((existing.clone(), false));
        }
        inner.nodes_by_key.insert(node.public_key.clone(), node.id);
        inner.nodes.insert(node.id, node.clone());
        Ok((node, true))
    }

    async fn link_node_owner(
        &self,
        node_id: Uuid,
        user_id: &str,
    ) -> Result<Option<OwnerLink>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(node) = inner.nodes.get_mut(&node_id) else {
            return Ok(None);
        };
        if node.user_id.is_some() {
            return Ok(Some(OwnerLink::AlreadyOwned(node.clone())));
        }
        node.user_id = Some(user_id.to_string());
        if node.status == NodeStatus::Pending {
            node.status = NodeStatus::Offline;
        }
        Ok(Some(OwnerLink::Linked(node.clone())))
    }

    async fn touch_claimed_node(
        &self,
        public_key: &str,
        status: NodeStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<NodeRecord>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(id) = inner.nodes_by_key.get(public_key).copied() else {
            return Ok(None);
        };
        match inner.nodes.get_mut(&id) {
            Some(node) if node.user_id.is_some() => {
                node.status = status;
                node.last_seen_at = Some(now);
                Ok(Some(node.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn insert_permission(&self, permission: NodePermission) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let exists = inner
            .permissions
            .iter()
            .any(|p| p.node_id == permission.node_id && p.scope == permission.scope);
        if !exists {
            inner.permissions.push(permission);
        }
        Ok(())
    }

    async fn permissions_for_node(
        &self,
        node_id: Uuid,
    ) -> Result<Vec<NodePermission>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .permissions
            .iter()
            .filter(|p| p.node_id == node_id)
            .cloned()
            .collect())
    }

    async fn insert_config_if_absent(
        &self,
        hash: &str,
        config: Value,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.configs.get_mut(hash) {
            existing.last_used_at = now;
            return Ok(false);
        }
        inner.configs.insert(
            hash.to_string(),
            ConfigRecord {
                hash: hash.to_string(),
                config,
                created_at: now,
                last_used_at: now,
            },
        );
        Ok(true)
    }

    async fn get_config(&self, hash: &str) -> Result<Option<ConfigRecord>, StoreError> {
        Ok(self.inner.read().await.configs.get(hash).cloned())
    }

    async fn insert_rotation(&self, rotation_id: &str) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .rotations
            .insert(rotation_id.to_string());
        Ok(())
    }

    async fn rotation_exists(&self, rotation_id: &str) -> Result<bool, StoreError> {
        Ok(self.inner.read().await.rotations.contains(rotation_id))
    }

    async fn insert_job_with_chunks(
        &self,
        job: JobRecord,
        chunks: Vec<ChunkRecord>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        // Validate everything before the first write so a failure leaves no trace.
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(format!("job {}", job.id)));
        }
        let mut seen = HashSet::with_capacity(chunks.len());
        for chunk in &chunks {
            if chunk.job_id != job.id {
                return Err(StoreError::Integrity(format!(
                    "chunk {} does not belong to job {}",
                    chunk.id, job.id
                )));
            }
            if !seen.insert(chunk.id) || inner.chunks.contains_key(&chunk.id) {
                return Err(StoreError::Duplicate(format!("chunk {}", chunk.id)));
            }
        }

        let ids = chunks.iter().map(|c| c.id).collect();
        inner.chunks_by_job.insert(job.id, ids);
        for chunk in chunks {
            inner.chunks.insert(chunk.id, chunk);
        }
        inner.jobs.insert(job.id, job);
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.inner.read().await.jobs.get(&job_id).cloned())
    }

    async fn get_chunk(&self, chunk_id: Uuid) -> Result<Option<ChunkRecord>, StoreError> {
        Ok(self.inner.read().await.chunks.get(&chunk_id).cloned())
    }

    async fn list_chunks(&self, job_id: Uuid) -> Result<Vec<ChunkRecord>, StoreError> {
        let inner = self.inner.read().await;
        let mut chunks: Vec<ChunkRecord> = inner
            .chunks_by_job
            .get(&job_id)
            .map(|ids| ids.iter().filter_map(|id| inner.chunks.get(id)).cloned().collect())
            .unwrap_or_default();
        chunks.sort_by_key(|c| c.seq);
        Ok(chunks)
    }

    async fn pending_chunks_in_scope(
        &self,
        scope: &ClaimScope,
        limit: usize,
    ) -> Result<Vec<ChunkRecord>, StoreError> {
        let inner = self.inner.read().await;
        let mut candidates: Vec<&ChunkRecord> = inner
            .chunks
            .values()
            .filter(|c| c.status == ChunkStatus::Pending && c.node_id.is_none())
            .filter(|c| {
                inner
                    .jobs
                    .get(&c.job_id)
                    .map(|job| scope.includes(&job.user_id))
                    .unwrap_or(false)
            })
            .collect();
        candidates.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.job_id.cmp(&b.job_id))
                .then(a.seq.cmp(&b.seq))
        });
        Ok(candidates.into_iter().take(limit).cloned().collect())
    }

    async fn assign_chunks(
        &self,
        chunk_ids: &[Uuid],
        node_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<ChunkRecord>, StoreError> {
        let mut inner = self.inner.write().await;
        let mut won = Vec::with_capacity(chunk_ids.len());
        for id in chunk_ids {
            if let Some(chunk) = inner.chunks.get_mut(id) {
                if chunk.node_id.is_none() && chunk.status == ChunkStatus::Pending {
                    chunk.node_id = Some(node_id);
                    chunk.status = ChunkStatus::Running;
                    chunk.claimed_at = Some(now);
                    won.push(chunk.clone());
                }
            }
        }
        Ok(won)
    }

    async fn complete_chunk(
        &self,
        chunk_id: Uuid,
        node_id: Uuid,
        result: ChunkResult,
        now: DateTime<Utc>,
    ) -> Result<Option<ChunkRecord>, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.chunks.get_mut(&chunk_id) {
            Some(chunk)
                if chunk.status == ChunkStatus::Running && chunk.node_id == Some(node_id) =>
            {
                chunk.status = ChunkStatus::Completed;
                chunk.result = Some(result);
                chunk.completed_at = Some(now);
                Ok(Some(chunk.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn count_unfinished_chunks(&self, job_id: Uuid) -> Result<u64, StoreError> {
        let inner = self.inner.read().await;
        let count = inner
            .chunks_by_job
            .get(&job_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.chunks.get(id))
                    .filter(|c| c.status != ChunkStatus::Completed)
                    .count()
            })
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn completed_chunk_results(
        &self,
        job_id: Uuid,
    ) -> Result<Vec<ChunkResult>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .chunks_by_job
            .get(&job_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.chunks.get(id))
                    .filter(|c| c.status == ChunkStatus::Completed)
                    .filter_map(|c| c.result.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn add_completed_iterations(
        &self,
        job_id: Uuid,
        iterations: u64,
    ) -> Result<(), StoreError> {
        if let Some(job) = self.inner.write().await.jobs.get_mut(&job_id) {
            job.completed_iterations = job.completed_iterations.saturating_add(iterations);
        }
        Ok(())
    }

    async fn transition_job(
        &self,
        job_id: Uuid,
        from: &[JobStatus],
        to: JobStatus,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.jobs.get_mut(&job_id) {
            Some(job) if from.contains(&job.status) => {
                job.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_job(
        &self,
        job_id: Uuid,
        summary: JobSummary,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.jobs.get_mut(&job_id) {
            Some(job) if job.status != JobStatus::Completed => {
                job.status = JobStatus::Completed;
                job.result = Some(summary);
                job.completed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn requeue_stale_chunks(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let mut inner = self.inner.write().await;
        let mut requeued = Vec::new();
        for chunk in inner.chunks.values_mut() {
            let stale = chunk.status == ChunkStatus::Running
                && chunk.claimed_at.map(|t| t < cutoff).unwrap_or(false);
            if stale {
                chunk.status = ChunkStatus::Pending;
                chunk.node_id = None;
                chunk.claimed_at = None;
                requeued.push(chunk.id);
            }
        }
        Ok(requeued)
    }
}
