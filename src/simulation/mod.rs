// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Simulation seam
//!
//! The worker pool treats a simulation as an opaque function from a seed to
//! one iteration's counters. Anything implementing [`IterationRunner`] can be
//! driven by the pool; the built-in rotations exist so the node and the CLI
//! are runnable on their own.

pub mod rotations;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use rotations::{PriorityRotation, RotationCatalog, Spell, MAX_DURATION_SECS};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    #[error("unknown rotation: {0}")]
    UnknownRotation(String),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("iteration {seed} failed: {message}")]
    Iteration { seed: u64, message: String },
}

/// Counters produced by a single simulated fight
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationOutcome {
    pub casts: u64,
    pub damage: f64,
    pub duration_secs: f64,
}

impl IterationOutcome {
    pub fn dps(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.damage / self.duration_secs
        } else {
            0.0
        }
    }
}

/// Runs one seeded iteration. Implementations are shared read-only across
/// worker threads.
pub trait IterationRunner: Send + Sync {
    fn name(&self) -> &str;

    fn run_iteration(&self, seed: u64) -> Result<IterationOutcome, SimulationError>;
}
