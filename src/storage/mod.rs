// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Coordinator storage
//!
//! Every mutation the coordinator relies on for correctness is expressed as a
//! single conditional operation on the store (claim a chunk only while it is
//! unassigned, complete it only while this node holds it, advance a job only
//! from an expected status). Callers never read-then-write across two calls
//! when the outcome must be exclusive.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::jobs::types::{ChunkRecord, ChunkResult, ConfigRecord, JobRecord, JobStatus, JobSummary};
use crate::nodes::types::{ClaimScope, NodePermission, NodeRecord, NodeStatus};

pub use memory::MemoryStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Outcome of an attempt to set a node's owning account
#[derive(Debug, Clone, PartialEq)]
pub enum OwnerLink {
    /// Owner was unset and is now this account
    Linked(NodeRecord),
    /// Owner was already set; carries the current record untouched
    AlreadyOwned(NodeRecord),
}

#[async_trait]
pub trait CoordinatorStore: Send + Sync {
    // Nodes
    async fn find_node_by_key(&self, public_key: &str) -> Result<Option<NodeRecord>, StoreError>;
    async fn find_node_by_claim_code(&self, code: &str) -> Result<Option<NodeRecord>, StoreError>;
    async fn get_node(&self, node_id: Uuid) -> Result<Option<NodeRecord>, StoreError>;

    /// Insert unless a node with the same public key exists; returns whichever
    /// record is stored afterwards and whether it was newly created.
    async fn insert_node_if_absent(
        &self,
        node: NodeRecord,
    ) -> Result<(NodeRecord, bool), StoreError>;

    /// Set `user_id` only where it is currently unset
    async fn link_node_owner(
        &self,
        node_id: Uuid,
        user_id: &str,
    ) -> Result<Option<OwnerLink>, StoreError>;

    /// Update status and last-seen only where the node has an owner
    async fn touch_claimed_node(
        &self,
        public_key: &str,
        status: NodeStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<NodeRecord>, StoreError>;

    async fn insert_permission(&self, permission: NodePermission) -> Result<(), StoreError>;
    async fn permissions_for_node(&self, node_id: Uuid)
        -> Result<Vec<NodePermission>, StoreError>;

    // Configs and reference data
    /// Store if absent, otherwise refresh `last_used_at`. Returns true when inserted.
    async fn insert_config_if_absent(
        &self,
        hash: &str,
        config: Value,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
    async fn get_config(&self, hash: &str) -> Result<Option<ConfigRecord>, StoreError>;
    async fn insert_rotation(&self, rotation_id: &str) -> Result<(), StoreError>;
    async fn rotation_exists(&self, rotation_id: &str) -> Result<bool, StoreError>;

    // Jobs and chunks
    /// Insert a job and all of its chunks, or nothing
    async fn insert_job_with_chunks(
        &self,
        job: JobRecord,
        chunks: Vec<ChunkRecord>,
    ) -> Result<(), StoreError>;
    async fn get_job(&self, job_id: Uuid) -> Result<Option<JobRecord>, StoreError>;
    async fn get_chunk(&self, chunk_id: Uuid) -> Result<Option<ChunkRecord>, StoreError>;
    async fn list_chunks(&self, job_id: Uuid) -> Result<Vec<ChunkRecord>, StoreError>;

    /// Unassigned pending chunks of in-scope jobs, oldest first
    async fn pending_chunks_in_scope(
        &self,
        scope: &ClaimScope,
        limit: usize,
    ) -> Result<Vec<ChunkRecord>, StoreError>;

    /// Assign each listed chunk to `node_id` where it is still unassigned.
    /// Returns only the chunks this call actually won.
    async fn assign_chunks(
        &self,
        chunk_ids: &[Uuid],
        node_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<ChunkRecord>, StoreError>;

    /// Complete a chunk where it is running and held by `node_id`
    async fn complete_chunk(
        &self,
        chunk_id: Uuid,
        node_id: Uuid,
        result: ChunkResult,
        now: DateTime<Utc>,
    ) -> Result<Option<ChunkRecord>, StoreError>;

    async fn count_unfinished_chunks(&self, job_id: Uuid) -> Result<u64, StoreError>;
    async fn completed_chunk_results(&self, job_id: Uuid) -> Result<Vec<ChunkResult>, StoreError>;

    /// Add to the job's completed iteration counter
    async fn add_completed_iterations(&self, job_id: Uuid, iterations: u64)
        -> Result<(), StoreError>;

    /// Move a job to `to` only if its current status is one of `from`
    async fn transition_job(
        &self,
        job_id: Uuid,
        from: &[JobStatus],
        to: JobStatus,
    ) -> Result<bool, StoreError>;

    /// Mark a job completed with its summary, only from pending or running
    async fn complete_job(
        &self,
        job_id: Uuid,
        summary: JobSummary,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Return running chunks claimed before `cutoff` to the pending pool
    async fn requeue_stale_chunks(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError>;
}
