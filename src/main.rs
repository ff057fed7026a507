// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use std::{env, path::PathBuf, sync::Arc};

use anyhow::Result;
use fabstir_sim_node::{
    api::start_server,
    config::CoordinatorConfig,
    storage::{CoordinatorStore, MemoryStore},
    version,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing subscriber for logging
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    println!("🚀 Starting Fabstir Sim Coordinator...\n");
    println!("📦 {}", version::get_version_string());
    println!("🔖 Build: {}", version::VERSION);
    println!();

    let config_path = env::var("SIM_CONFIG").ok().map(PathBuf::from);
    let config = CoordinatorConfig::load(config_path.as_deref())?;
    info!(
        listen_addr = %config.listen_addr,
        chunk_size = config.chunk_size,
        max_batch = config.max_batch_size,
        account_auth = config.account_jwt_secret.is_some(),
        "Coordinator configuration loaded"
    );

    let store: Arc<dyn CoordinatorStore> = Arc::new(MemoryStore::new());
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            println!("\n🛑 Shutting down...");
            signal_token.cancel();
        }
    });

    start_server(config, store, shutdown).await
}
