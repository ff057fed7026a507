// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Local and remote execution of simulation runs

pub mod pool;
pub mod remote;
pub mod runs;
pub mod stats;

pub use pool::{
    resolve_worker_count, PoolConfig, PoolError, PoolProgress, ProgressFn, RunHooks, RunOutcome,
    RunRequest, WorkerPoolRunner, WAVE_FACTOR,
};
pub use remote::{
    FrameDecoder, HealthStatus, RemoteRunClient, RemoteRunError, RemoteRunRequest, RunFrame,
};
pub use runs::{RunHandle, RunRegistry};
pub use stats::{IterationSample, RunStats, RunSummary, SAMPLE_LIMIT};
