// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Simulated fight length used when a config does not name one
pub const DEFAULT_DURATION_SECS: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
}

impl JobStatus {
    /// Position in the only allowed progression, pending -> running -> completed
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Running => 1,
            JobStatus::Completed => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Running,
    Completed,
}

/// Immutable, content-addressed job configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRecord {
    pub hash: String,
    pub config: Value,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

/// Statistics a node reports for one finished chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResult {
    pub mean_dps: f64,
    #[serde(default)]
    pub std_dps: f64,
    pub min_dps: f64,
    pub max_dps: f64,
    pub iterations: u64,
    #[serde(default)]
    pub total_casts: u64,
    #[serde(default)]
    pub failed_iterations: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Job-level rollup written when the last chunk completes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    /// Iteration-weighted mean over all chunks
    pub mean_dps: f64,
    pub min_dps: f64,
    pub max_dps: f64,
    pub total_iterations: u64,
    pub chunks_completed: u64,
    pub failures: u64,
}

impl JobSummary {
    pub fn from_chunks<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = &'a ChunkResult>,
    {
        let mut summary = JobSummary {
            min_dps: f64::INFINITY,
            max_dps: f64::NEG_INFINITY,
            ..Default::default()
        };
        let mut weighted = 0.0;
        for r in results {
            summary.chunks_completed += 1;
            summary.total_iterations += r.iterations;
            summary.failures += r.failed_iterations;
            weighted += r.mean_dps * r.iterations as f64;
            summary.min_dps = summary.min_dps.min(r.min_dps);
            summary.max_dps = summary.max_dps.max(r.max_dps);
        }
        if summary.chunks_completed == 0 {
            return JobSummary::default();
        }
        if summary.total_iterations > 0 {
            summary.mean_dps = weighted / summary.total_iterations as f64;
        }
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: Uuid,
    pub user_id: String,
    pub config_hash: String,
    pub total_iterations: u64,
    pub completed_iterations: u64,
    pub status: JobStatus,
    pub result: Option<JobSummary>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    pub id: Uuid,
    pub job_id: Uuid,
    /// Position within the job, used to break creation-time ties
    pub seq: u32,
    pub config_hash: String,
    pub iterations: u64,
    pub seed_offset: u64,
    pub status: ChunkStatus,
    pub node_id: Option<Uuid>,
    pub result: Option<ChunkResult>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The parts of a job config a node needs to run a chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSpec {
    pub rotation: String,
    #[serde(default = "default_duration", alias = "durationSecs")]
    pub duration: f64,
}

fn default_duration() -> f64 {
    DEFAULT_DURATION_SECS
}

impl SimulationSpec {
    pub fn from_config(config: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(config.clone())
    }
}
