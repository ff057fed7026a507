// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Args;

use crate::config::NodeIdentityFile;
use crate::crypto::NodeKeypair;

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Where to write the identity file
    #[arg(long, short, default_value = "sim-node-identity.toml")]
    pub out: PathBuf,

    /// Replace an existing identity file
    #[arg(long)]
    pub force: bool,
}

pub fn generate_identity(args: KeygenArgs) -> Result<()> {
    if args.out.exists() && !args.force {
        return Err(anyhow!(
            "{} already exists; pass --force to replace it",
            args.out.display()
        ));
    }
    let keypair = NodeKeypair::generate();
    let identity = NodeIdentityFile::from_keypair(&keypair);
    identity.write(&args.out)?;

    println!("🔑 Node identity written to {}", args.out.display());
    println!("  Public key:  {}", identity.public_key);
    println!("  Claim code:  {}", identity.claim_code);
    Ok(())
}
