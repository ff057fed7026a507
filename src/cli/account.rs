// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{Context, Result};
use clap::Args;

use crate::api::AccountKeys;

#[derive(Args, Debug)]
pub struct AccountTokenArgs {
    /// Account id placed in the token subject
    #[arg(long)]
    pub account: String,

    /// Coordinator's account token secret
    #[arg(long, env = "SIM_ACCOUNT_JWT_SECRET", hide_env_values = true)]
    pub secret: String,

    /// Token lifetime in seconds
    #[arg(long, default_value_t = 86_400)]
    pub ttl_secs: u64,
}

pub fn issue_token(args: AccountTokenArgs) -> Result<()> {
    let token = AccountKeys::from_secret(args.secret.as_bytes())
        .issue(&args.account, args.ttl_secs)
        .context("failed to sign account token")?;
    println!("{}", token);
    Ok(())
}
