// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::client::{CoordinatorClient, NodeDaemon};
use crate::config::{NodeIdentityFile, NodeSettings};
use crate::simulation::RotationCatalog;
use crate::worker::RunRegistry;

#[derive(Args, Debug)]
pub struct NodeArgs {
    /// TOML file with a [node] table
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Coordinator base URL (overrides config and SIM_API_URL)
    #[arg(long)]
    pub api_url: Option<String>,

    /// Identity file, created on first start
    #[arg(long)]
    pub identity: Option<PathBuf>,

    /// Worker threads for chunk runs
    #[arg(long, allow_negative_numbers = true)]
    pub workers: Option<i32>,
}

impl NodeArgs {
    pub fn settings(&self) -> Result<NodeSettings> {
        let mut settings = NodeSettings::load(self.config.as_deref())?;
        if let Some(url) = &self.api_url {
            settings.api_url = url.clone();
        }
        if let Some(path) = &self.identity {
            settings.identity_path = path.clone();
        }
        if let Some(workers) = self.workers {
            settings.workers = workers;
        }
        Ok(settings)
    }
}

pub async fn run_node(args: NodeArgs) -> Result<()> {
    dotenv::dotenv().ok();
    let settings = args.settings()?;

    let (keypair, created) = NodeIdentityFile::load_or_create(&settings.identity_path)?;
    if created {
        println!(
            "🔑 New node identity saved to {}",
            settings.identity_path.display()
        );
    }
    println!("📋 Claim code: {}", keypair.claim_code());

    let client = CoordinatorClient::new(&settings.api_url, keypair)
        .with_context(|| format!("invalid coordinator url {}", settings.api_url))?;
    let daemon = NodeDaemon::new(
        settings,
        client,
        RotationCatalog::builtin(),
        RunRegistry::new(),
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal.cancel();
        }
    });

    daemon.run(shutdown).await
}
