// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod account;
pub mod keygen;
pub mod node;
pub mod run;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Fabstir Sim Node CLI
#[derive(Parser, Debug)]
#[command(name = "fabstir-sim-cli")]
#[command(version = crate::version::VERSION_NUMBER)]
#[command(about = "Run simulations locally, remotely or as a coordinator node", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a simulation on this machine or on a remote peer
    Run(run::RunArgs),

    /// Start the node daemon and work for a coordinator
    Node(node::NodeArgs),

    /// Generate a node identity file
    Keygen(keygen::KeygenArgs),

    /// Issue an account token for the job and config endpoints
    AccountToken(account::AccountTokenArgs),
}

/// Execute CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run(args) => run::run_simulation(args).await,
        Commands::Node(args) => node::run_node(args).await,
        Commands::Keygen(args) => keygen::generate_identity(args),
        Commands::AccountToken(args) => account::issue_token(args),
    }
}
