// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Coordinator counters exported at `/metrics`
#[derive(Clone)]
pub struct CoordinatorMetrics {
    registry: Registry,
    pub nodes_registered: IntCounter,
    pub chunks_claimed: IntCounter,
    pub chunks_completed: IntCounter,
    pub jobs_created: IntCounter,
    pub jobs_completed: IntCounter,
    pub auth_failures: IntCounterVec,
    pub active_remote_runs: IntGauge,
}

impl CoordinatorMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let nodes_registered =
            IntCounter::new("sim_nodes_registered_total", "Nodes registered for the first time")?;
        let chunks_claimed = IntCounter::new("sim_chunks_claimed_total", "Chunks assigned to nodes")?;
        let chunks_completed =
            IntCounter::new("sim_chunks_completed_total", "Chunk results recorded")?;
        let jobs_created = IntCounter::new("sim_jobs_created_total", "Jobs created")?;
        let jobs_completed = IntCounter::new("sim_jobs_completed_total", "Jobs fully completed")?;
        let auth_failures = IntCounterVec::new(
            Opts::new("sim_auth_failures_total", "Rejected node-signed requests"),
            &["category"],
        )?;
        let active_remote_runs =
            IntGauge::new("sim_active_remote_runs", "Runs executing for RPC clients")?;

        registry.register(Box::new(nodes_registered.clone()))?;
        registry.register(Box::new(chunks_claimed.clone()))?;
        registry.register(Box::new(chunks_completed.clone()))?;
        registry.register(Box::new(jobs_created.clone()))?;
        registry.register(Box::new(jobs_completed.clone()))?;
        registry.register(Box::new(auth_failures.clone()))?;
        registry.register(Box::new(active_remote_runs.clone()))?;

        Ok(Self {
            registry,
            nodes_registered,
            chunks_claimed,
            chunks_completed,
            jobs_created,
            jobs_completed,
            auth_failures,
            active_remote_runs,
        })
    }

    pub fn record_auth_failure(&self, category: &str) {
        self.auth_failures.with_label_values(&[category]).inc();
    }

    /// Prometheus text exposition of every registered metric
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
