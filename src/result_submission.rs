// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::crypto::VerifiedNode;
use crate::jobs::types::{ChunkResult, ChunkStatus, JobStatus, JobSummary};
use crate::nodes::{NodeRegistry, RegistryError};
use crate::storage::{CoordinatorStore, StoreError};

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("node not found")]
    NodeNotFound,

    #[error("chunk not found")]
    ChunkNotFound,

    #[error("{0}")]
    Ownership(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RegistryError> for CompletionError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Store(e) => CompletionError::Store(e),
            _ => CompletionError::NodeNotFound,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReport {
    pub success: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub already_completed: bool,
    pub job_complete: bool,
    /// Set only on the call that moved the job to completed
    #[serde(skip)]
    pub job_finalized: bool,
}

/// Records chunk results exactly once and rolls them into job status
#[derive(Clone)]
pub struct ChunkCompletionAggregator {
    store: Arc<dyn CoordinatorStore>,
    registry: NodeRegistry,
}

impl ChunkCompletionAggregator {
    pub fn new(store: Arc<dyn CoordinatorStore>, registry: NodeRegistry) -> Self {
        Self { store, registry }
    }

    pub async fn complete(
        &self,
        node: &VerifiedNode,
        chunk_id: Uuid,
        result: ChunkResult,
    ) -> Result<CompletionReport, CompletionError> {
        validate_result(&result)?;
        let record = self.registry.resolve_node(node).await?;

        let Some(chunk) = self
            .store
            .complete_chunk(chunk_id, record.id, result, Utc::now())
            .await?
        else {
            return self.explain_rejected(chunk_id, record.id).await;
        };

        self.store
            .add_completed_iterations(chunk.job_id, chunk.iterations)
            .await?;

        let remaining = self.store.count_unfinished_chunks(chunk.job_id).await?;
        let mut report = CompletionReport {
            success: true,
            job_complete: remaining == 0,
            ..Default::default()
        };

        if remaining == 0 {
            let results = self.store.completed_chunk_results(chunk.job_id).await?;
            let summary = JobSummary::from_chunks(&results);
            report.job_finalized = self
                .store
                .complete_job(chunk.job_id, summary.clone(), Utc::now())
                .await?;
            if report.job_finalized {
                info!(
                    job_id = %chunk.job_id,
                    chunks = summary.chunks_completed,
                    iterations = summary.total_iterations,
                    mean_dps = summary.mean_dps,
                    failures = summary.failures,
                    "Job completed"
                );
            }
        } else if self
            .store
            .transition_job(chunk.job_id, &[JobStatus::Pending], JobStatus::Running)
            .await?
        {
            info!(job_id = %chunk.job_id, "Job started");
        }

        debug!(chunk_id = %chunk_id, node_id = %record.id, remaining, "Chunk completed");
        Ok(report)
    }

    /// The conditional update matched nothing; work out why
    async fn explain_rejected(
        &self,
        chunk_id: Uuid,
        node_id: Uuid,
    ) -> Result<CompletionReport, CompletionError> {
        let chunk = self
            .store
            .get_chunk(chunk_id)
            .await?
            .ok_or(CompletionError::ChunkNotFound)?;

        if chunk.node_id != Some(node_id) {
            warn!(chunk_id = %chunk_id, node_id = %node_id, "Completion for chunk held by another node");
            return Err(CompletionError::Ownership(
                "chunk not owned by this node".to_string(),
            ));
        }
        if chunk.status == ChunkStatus::Completed {
            debug!(chunk_id = %chunk_id, "Duplicate completion ignored");
            return Ok(CompletionReport {
                success: true,
                already_completed: true,
                job_complete: false,
                job_finalized: false,
            });
        }
        Err(CompletionError::Ownership(format!(
            "chunk is {:?}, not running",
            chunk.status
        )))
    }
}

fn validate_result(result: &ChunkResult) -> Result<(), CompletionError> {
    let numbers = [result.mean_dps, result.std_dps, result.min_dps, result.max_dps];
    if numbers.iter().any(|n| !n.is_finite()) {
        return Err(CompletionError::Validation(
            "result statistics must be finite".to_string(),
        ));
    }
    if result.iterations > 0 && result.min_dps > result.max_dps {
        return Err(CompletionError::Validation(
            "minDps exceeds maxDps".to_string(),
        ));
    }
    Ok(())
}
