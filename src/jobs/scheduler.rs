// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::types::{ChunkRecord, ChunkStatus, JobRecord, JobStatus, JobSummary};
use super::SchedulerError;
use crate::storage::CoordinatorStore;

pub const DEFAULT_CHUNK_SIZE: u64 = 1000;
pub const DEFAULT_MAX_JOB_ITERATIONS: u64 = 10_000_000;

/// One slice of a job's iteration space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub seq: u32,
    pub iterations: u64,
    pub seed_offset: u64,
}

/// Split `[0, total)` into consecutive slices of `chunk_size`, last one short
pub fn plan_chunks(total: u64, chunk_size: u64) -> Vec<ChunkPlan> {
    let chunk_size = chunk_size.max(1);
    let count = total.div_ceil(chunk_size);
    (0..count)
        .map(|i| {
            let seed_offset = i * chunk_size;
            ChunkPlan {
                seq: i as u32,
                iterations: chunk_size.min(total - seed_offset),
                seed_offset,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedJob {
    pub job_id: Uuid,
    pub chunks: usize,
}

/// Read model for the job-status endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub id: Uuid,
    pub status: JobStatus,
    pub total_iterations: u64,
    pub completed_iterations: u64,
    pub chunks_completed: usize,
    pub chunks_total: usize,
    pub result: Option<JobSummary>,
}

#[derive(Clone)]
pub struct JobScheduler {
    store: Arc<dyn CoordinatorStore>,
    chunk_size: u64,
    max_iterations: u64,
}

impl JobScheduler {
    pub fn new(store: Arc<dyn CoordinatorStore>, chunk_size: u64) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
            max_iterations: DEFAULT_MAX_JOB_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Create a job and all of its chunks as one unit
    pub async fn create_job(
        &self,
        account: &str,
        config_hash: &str,
        total_iterations: u64,
    ) -> Result<CreatedJob, SchedulerError> {
        if total_iterations == 0 {
            return Err(SchedulerError::Validation(
                "iterations must be positive".to_string(),
            ));
        }
        if total_iterations > self.max_iterations {
            return Err(SchedulerError::Validation(format!(
                "iterations must not exceed {}",
                self.max_iterations
            )));
        }

        let config = self
            .store
            .get_config(config_hash)
            .await?
            .ok_or_else(|| SchedulerError::Validation("config not found".to_string()))?;

        if let Some(rotation) = config.config.get("rotation").and_then(|r| r.as_str()) {
            if !self.store.rotation_exists(rotation).await? {
                return Err(SchedulerError::Validation(format!(
                    "rotation '{}' not found",
                    rotation
                )));
            }
        }

        let now = Utc::now();
        let job = JobRecord {
            id: Uuid::new_v4(),
            user_id: account.to_string(),
            config_hash: config_hash.to_string(),
            total_iterations,
            completed_iterations: 0,
            status: JobStatus::Pending,
            result: None,
            created_at: now,
            completed_at: None,
        };
        let chunks: Vec<ChunkRecord> = plan_chunks(total_iterations, self.chunk_size)
            .into_iter()
            .map(|plan| ChunkRecord {
                id: Uuid::new_v4(),
                job_id: job.id,
                seq: plan.seq,
                config_hash: config_hash.to_string(),
                iterations: plan.iterations,
                seed_offset: plan.seed_offset,
                status: ChunkStatus::Pending,
                node_id: None,
                result: None,
                created_at: now,
                claimed_at: None,
                completed_at: None,
            })
            .collect();

        let created = CreatedJob {
            job_id: job.id,
            chunks: chunks.len(),
        };
        self.store.insert_job_with_chunks(job, chunks).await?;
        info!(
            job_id = %created.job_id,
            iterations = total_iterations,
            chunks = created.chunks,
            "Job created"
        );
        Ok(created)
    }

    /// Progress of a job, visible only to its owner
    pub async fn job_progress(
        &self,
        account: &str,
        job_id: Uuid,
    ) -> Result<JobProgress, SchedulerError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .filter(|job| job.user_id == account)
            .ok_or_else(|| SchedulerError::NotFound("job".to_string()))?;
        let chunks = self.store.list_chunks(job_id).await?;
        Ok(JobProgress {
            id: job.id,
            status: job.status,
            total_iterations: job.total_iterations,
            completed_iterations: job.completed_iterations,
            chunks_completed: chunks
                .iter()
                .filter(|c| c.status == ChunkStatus::Completed)
                .count(),
            chunks_total: chunks.len(),
            result: job.result,
        })
    }
}
