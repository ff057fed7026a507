// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::jobs::DEFAULT_DURATION_SECS;
use crate::simulation::RotationCatalog;
use crate::worker::{
    PoolConfig, PoolProgress, ProgressFn, RemoteRunClient, RemoteRunRequest, RunHooks, RunOutcome,
    RunRequest, RunSummary, WorkerPoolRunner,
};

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Rotation name (see `/rpc/rotations` for a server's list)
    #[arg(long, short)]
    pub rotation: String,

    /// Simulated fight length in seconds
    #[arg(long, short, default_value_t = DEFAULT_DURATION_SECS)]
    pub duration: f64,

    /// Number of iterations
    #[arg(long, short, default_value_t = 1000)]
    pub iterations: u64,

    /// Worker threads: 0 runs single-threaded, negative picks from the CPU count
    #[arg(long, short, default_value_t = -1, allow_negative_numbers = true)]
    pub workers: i32,

    /// Iterations per dispatched batch
    #[arg(long, default_value_t = 100)]
    pub batch_size: u64,

    /// Run on a remote peer instead of locally
    #[arg(long, env = "SIM_RUN_SERVER")]
    pub server: Option<String>,
}

pub async fn run_simulation(args: RunArgs) -> Result<()> {
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let bar = progress_bar(args.iterations);
    let sink_bar = bar.clone();
    let on_progress: ProgressFn = Arc::new(move |progress: PoolProgress| {
        sink_bar.set_position(progress.completed);
    });

    let outcome = match &args.server {
        Some(server) => {
            println!("🌐 Running {} on {}", args.rotation, server);
            let client = RemoteRunClient::new(server)?;
            let request = RemoteRunRequest {
                rotation: args.rotation.clone(),
                duration: args.duration,
                iterations: args.iterations,
                batch_size: args.batch_size,
            };
            client
                .run(&request, cancel, Some(on_progress))
                .await
                .with_context(|| format!("remote run on {} failed", server))?
        }
        None => {
            let runner = RotationCatalog::builtin().build(&args.rotation, args.duration)?;
            let pool = WorkerPoolRunner::new(
                runner,
                PoolConfig {
                    workers: args.workers,
                    ..PoolConfig::default()
                },
            );
            let request = RunRequest {
                iterations: args.iterations,
                batch_size: args.batch_size,
                seed_base: 0,
            };
            let hooks = RunHooks {
                on_progress: Some(on_progress),
                on_complete: None,
            };
            pool.run(request, cancel, hooks).await?
        }
    };

    match outcome {
        RunOutcome::Completed(summary) => {
            bar.finish_and_clear();
            print!("{}", format_summary(&args.rotation, &summary));
            Ok(())
        }
        RunOutcome::Interrupted => {
            bar.abandon();
            println!("⚠️  Run interrupted");
            debug!("Run cancelled before completion");
            Ok(())
        }
    }
}

fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(200));
    bar
}

/// Human summary printed after a run
pub fn format_summary(rotation: &str, summary: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n✅ Simulation complete: {}\n", rotation));
    out.push_str(&format!("  Iterations:   {}\n", summary.completed_sims));
    if summary.failed_sims > 0 {
        out.push_str(&format!("  Failed:       {}\n", summary.failed_sims));
    }
    out.push_str(&format!(
        "  Elapsed:      {:.2}s\n",
        summary.elapsed_ms as f64 / 1000.0
    ));
    out.push_str(&format!("  Total casts:  {}\n", summary.total_casts));
    out.push_str(&format!("  Avg casts:    {:.1}\n", summary.avg_casts));
    out.push_str(&format!(
        "  DPS:          {:.1} ± {:.1} (min {:.1}, max {:.1})\n",
        summary.mean_dps, summary.std_dps, summary.min_dps, summary.max_dps
    ));
    out.push_str(&format!("  Throughput:   {:.0} iter/s\n", summary.throughput));
    for error in &summary.errors {
        out.push_str(&format!("  Error:        {}\n", error));
    }
    out
}
