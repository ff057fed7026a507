// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Streaming run statistics
//!
//! Iteration results are folded into running counters (Welford mean and
//! variance, min/max, totals) as they arrive. Only the first few iterations
//! are kept verbatim for display, so memory does not grow with run length.

use serde::{Deserialize, Serialize};

use crate::jobs::types::ChunkResult;
use crate::simulation::{IterationOutcome, SimulationError};

/// Iterations and errors retained verbatim per run
pub const SAMPLE_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationSample {
    pub seed: u64,
    pub casts: u64,
    pub dps: f64,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    pub completed: u64,
    pub failed: u64,
    pub total_casts: u64,
    mean: f64,
    m2: f64,
    min: Option<f64>,
    max: Option<f64>,
    pub samples: Vec<IterationSample>,
    pub errors: Vec<String>,
    /// Set when a batch stopped early because its run was cancelled
    pub interrupted: bool,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    pub fn record(&mut self, seed: u64, outcome: Result<IterationOutcome, SimulationError>) {
        match outcome {
            Ok(outcome) => {
                let dps = outcome.dps();
                self.completed += 1;
                self.total_casts += outcome.casts;
                let delta = dps - self.mean;
                self.mean += delta / self.completed as f64;
                self.m2 += delta * (dps - self.mean);
                self.min = Some(self.min.map_or(dps, |m| m.min(dps)));
                self.max = Some(self.max.map_or(dps, |m| m.max(dps)));
                if self.samples.len() < SAMPLE_LIMIT {
                    self.samples.push(IterationSample {
                        seed,
                        casts: outcome.casts,
                        dps,
                        duration_secs: outcome.duration_secs,
                    });
                }
            }
            Err(e) => {
                self.failed += 1;
                if self.errors.len() < SAMPLE_LIMIT {
                    self.errors.push(e.to_string());
                }
            }
        }
    }

    /// Fold another partial aggregate into this one
    pub fn merge(&mut self, other: RunStats) {
        if other.completed > 0 {
            let n_a = self.completed as f64;
            let n_b = other.completed as f64;
            let n = n_a + n_b;
            let delta = other.mean - self.mean;
            self.mean += delta * n_b / n;
            self.m2 += other.m2 + delta * delta * n_a * n_b / n;
            self.min = match (self.min, other.min) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            self.max = match (self.max, other.max) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }
        self.completed += other.completed;
        self.failed += other.failed;
        self.total_casts += other.total_casts;
        self.interrupted |= other.interrupted;

        let room = SAMPLE_LIMIT.saturating_sub(self.samples.len());
        self.samples.extend(other.samples.into_iter().take(room));
        let room = SAMPLE_LIMIT.saturating_sub(self.errors.len());
        self.errors.extend(other.errors.into_iter().take(room));
    }

    pub fn mean_dps(&self) -> f64 {
        self.mean
    }

    /// Sample standard deviation of per-iteration DPS
    pub fn std_dps(&self) -> f64 {
        if self.completed > 1 {
            (self.m2 / (self.completed - 1) as f64).sqrt()
        } else {
            0.0
        }
    }

    pub fn summary(&self, elapsed_ms: u64) -> RunSummary {
        let avg_casts = if self.completed > 0 {
            self.total_casts as f64 / self.completed as f64
        } else {
            0.0
        };
        let throughput = if elapsed_ms > 0 {
            self.completed as f64 * 1000.0 / elapsed_ms as f64
        } else {
            0.0
        };
        RunSummary {
            completed_sims: self.completed,
            failed_sims: self.failed,
            total_casts: self.total_casts,
            avg_casts,
            mean_dps: self.mean,
            std_dps: self.std_dps(),
            min_dps: self.min.unwrap_or(0.0),
            max_dps: self.max.unwrap_or(0.0),
            elapsed_ms,
            throughput,
            samples: self.samples.clone(),
            errors: self.errors.clone(),
        }
    }
}

/// Aggregated outcome of a finished run, local or remote
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub completed_sims: u64,
    #[serde(default)]
    pub failed_sims: u64,
    pub total_casts: u64,
    pub avg_casts: f64,
    #[serde(default)]
    pub mean_dps: f64,
    #[serde(default)]
    pub std_dps: f64,
    #[serde(default)]
    pub min_dps: f64,
    #[serde(default)]
    pub max_dps: f64,
    pub elapsed_ms: u64,
    pub throughput: f64,
    #[serde(default)]
    pub samples: Vec<IterationSample>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl RunSummary {
    /// Shape a summary as the result a node reports for a chunk
    pub fn to_chunk_result(&self) -> ChunkResult {
        ChunkResult {
            mean_dps: self.mean_dps,
            std_dps: self.std_dps,
            min_dps: self.min_dps,
            max_dps: self.max_dps,
            iterations: self.completed_sims,
            total_casts: self.total_casts,
            failed_iterations: self.failed_sims,
            errors: self.errors.clone(),
        }
    }
}
