// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Jobs, chunks and their configurations

pub mod config_store;
pub mod scheduler;
pub mod types;

use thiserror::Error;

use crate::storage::StoreError;

pub use config_store::{canonicalize, content_hash, JobConfigStore};
pub use scheduler::{
    plan_chunks, ChunkPlan, CreatedJob, JobProgress, JobScheduler, DEFAULT_CHUNK_SIZE,
};
pub use types::{
    ChunkRecord, ChunkResult, ChunkStatus, ConfigRecord, JobRecord, JobStatus, JobSummary,
    SimulationSpec, DEFAULT_DURATION_SECS,
};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
