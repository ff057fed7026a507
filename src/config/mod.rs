// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Coordinator and node configuration
//!
//! Both sides start from defaults, optionally read a TOML file, then apply
//! `SIM_*` environment overrides. `.env` files are loaded by the binaries.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::crypto::{NodeKeypair, DEFAULT_MAX_SKEW_SECS};
use crate::job_claim::{DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE};
use crate::jobs::scheduler::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_JOB_ITERATIONS};

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub listen_addr: String,
    pub chunk_size: u64,
    pub default_batch_size: usize,
    pub max_batch_size: usize,
    pub max_clock_skew_secs: i64,
    pub max_job_iterations: u64,
    /// HMAC secret for account tokens on job and config endpoints
    pub account_jwt_secret: Option<String>,
    /// Requeue chunks running longer than this; unset disables requeue
    pub chunk_lease_secs: Option<u64>,
    pub requeue_interval_secs: u64,
    /// Worker threads for runs served over `/rpc/run`
    pub rpc_workers: i32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            default_batch_size: DEFAULT_BATCH_SIZE,
            max_batch_size: MAX_BATCH_SIZE,
            max_clock_skew_secs: DEFAULT_MAX_SKEW_SECS,
            max_job_iterations: DEFAULT_MAX_JOB_ITERATIONS,
            account_jwt_secret: None,
            chunk_lease_secs: None,
            requeue_interval_secs: 60,
            rpc_workers: -1,
        }
    }
}

impl CoordinatorConfig {
    /// Read the `[coordinator]` table of a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let value: toml::Value = toml::from_str(&content)?;
        match value.get("coordinator") {
            Some(table) => Ok(table.clone().try_into()?),
            None => Ok(Self::default()),
        }
    }

    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_string("SIM_LISTEN_ADDR") {
            self.listen_addr = v;
        }
        if let Some(v) = env_parse("SIM_CHUNK_SIZE") {
            self.chunk_size = v;
        }
        if let Some(v) = env_parse("SIM_DEFAULT_BATCH") {
            self.default_batch_size = v;
        }
        if let Some(v) = env_parse("SIM_MAX_BATCH") {
            self.max_batch_size = v;
        }
        if let Some(v) = env_parse("SIM_MAX_CLOCK_SKEW_SECS") {
            self.max_clock_skew_secs = v;
        }
        if let Some(v) = env_parse("SIM_MAX_JOB_ITERATIONS") {
            self.max_job_iterations = v;
        }
        if let Some(v) = env_string("SIM_ACCOUNT_JWT_SECRET") {
            self.account_jwt_secret = Some(v);
        }
        if let Some(v) = env_parse("SIM_CHUNK_LEASE_SECS") {
            self.chunk_lease_secs = Some(v);
        }
        if let Some(v) = env_parse("SIM_RPC_WORKERS") {
            self.rpc_workers = v;
        }
        self
    }

    /// File (when given) then environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(base.with_env_overrides())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    pub api_url: String,
    pub identity_path: PathBuf,
    pub workers: i32,
    pub batch_size: u64,
    pub claim_batch_size: Option<i64>,
    pub heartbeat_secs: u64,
    pub poll_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8080".to_string(),
            identity_path: PathBuf::from("sim-node-identity.toml"),
            workers: -1,
            batch_size: 100,
            claim_batch_size: None,
            heartbeat_secs: 300,
            poll_secs: 3,
            max_backoff_secs: 60,
        }
    }
}

impl NodeSettings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let value: toml::Value = toml::from_str(&content)?;
        match value.get("node") {
            Some(table) => Ok(table.clone().try_into()?),
            None => Ok(Self::default()),
        }
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_string("SIM_API_URL") {
            self.api_url = v;
        }
        if let Some(v) = env_string("SIM_IDENTITY_PATH") {
            self.identity_path = PathBuf::from(v);
        }
        if let Some(v) = env_parse("SIM_WORKERS") {
            self.workers = v;
        }
        if let Some(v) = env_parse("SIM_BATCH_SIZE") {
            self.batch_size = v;
        }
        if let Some(v) = env_parse("SIM_HEARTBEAT_SECS") {
            self.heartbeat_secs = v;
        }
        if let Some(v) = env_parse("SIM_POLL_SECS") {
            self.poll_secs = v;
        }
        self
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(base.with_env_overrides())
    }
}

/// On-disk node identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeIdentityFile {
    /// Base64 Ed25519 private key
    pub private_key: String,
    pub public_key: String,
    pub claim_code: String,
    pub created_at: DateTime<Utc>,
}

impl NodeIdentityFile {
    pub fn from_keypair(keypair: &NodeKeypair) -> Self {
        Self {
            private_key: keypair.private_key_base64(),
            public_key: keypair.public_key_base64(),
            claim_code: keypair.claim_code(),
            created_at: Utc::now(),
        }
    }

    pub fn keypair(&self) -> Result<NodeKeypair> {
        Ok(NodeKeypair::from_base64(&self.private_key)?)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("writing identity {}", path.display()))?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading identity {}", path.display()))?;
        Ok(toml::from_str(&content)?)
    }

    /// Load the identity at `path`, generating and saving one if absent.
    /// Returns the keypair and whether it was newly created.
    pub fn load_or_create(path: &Path) -> Result<(NodeKeypair, bool)> {
        if path.exists() {
            return Ok((Self::read(path)?.keypair()?, false));
        }
        let keypair = NodeKeypair::generate();
        Self::from_keypair(&keypair).write(path)?;
        info!(path = %path.display(), claim_code = %keypair.claim_code(), "Generated node identity");
        Ok((keypair, true))
    }
}
