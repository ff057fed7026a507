// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Wave-based worker pool
//!
//! A fixed set of OS threads share one command queue. Every thread holds the
//! same read-only [`IterationRunner`] for its whole life. Batches of seeds are
//! dispatched in waves of at most `workers * WAVE_FACTOR`; each batch answers
//! on its own oneshot channel with a partial aggregate, which is merged as
//! soon as it lands. In-flight state is therefore bounded by the wave size,
//! never by the iteration count.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::stats::{RunStats, RunSummary};
use crate::simulation::IterationRunner;

/// In-flight batches per worker within one wave
pub const WAVE_FACTOR: usize = 10;
pub const DEFAULT_BATCH_SIZE: u64 = 100;
/// Runs smaller than this never report progress
pub const DEFAULT_PROGRESS_MIN_ITERATIONS: u64 = 10_000;
pub const DEFAULT_PROGRESS_EVERY: u64 = 10_000;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to start worker thread: {0}")]
    Spawn(String),

    #[error("worker pool is no longer accepting batches")]
    Closed,

    #[error("worker dropped a batch without answering (panicked?)")]
    WorkerLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolProgress {
    pub completed: u64,
    pub total: u64,
    pub elapsed_ms: u64,
}

pub type ProgressFn = Arc<dyn Fn(PoolProgress) + Send + Sync>;
pub type CompleteFn = Box<dyn FnOnce(&RunSummary) + Send>;

/// Optional observers of a run
#[derive(Default)]
pub struct RunHooks {
    pub on_progress: Option<ProgressFn>,
    /// Called once with the summary; never called for an interrupted run
    pub on_complete: Option<CompleteFn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunRequest {
    pub iterations: u64,
    pub batch_size: u64,
    /// Seed of the first iteration; iteration `i` uses `seed_base + i`
    pub seed_base: u64,
}

impl RunRequest {
    pub fn new(iterations: u64) -> Self {
        Self {
            iterations,
            batch_size: DEFAULT_BATCH_SIZE,
            seed_base: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// Cancelled before finishing; partial counters are discarded
    Interrupted,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// 0 runs inline on a blocking task, negative picks from the CPU count
    pub workers: i32,
    pub progress_min_iterations: u64,
    pub progress_every: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: -1,
            progress_min_iterations: DEFAULT_PROGRESS_MIN_ITERATIONS,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

/// Number of threads for a configured worker count. 0 means inline.
pub fn resolve_worker_count(requested: i32) -> usize {
    if requested >= 0 {
        return requested as usize;
    }
    let mut system = sysinfo::System::new();
    system.refresh_cpu();
    let cpus = system.cpus().len();
    let cpus = if cpus == 0 {
        thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    } else {
        cpus
    };
    cpus.saturating_sub(1).max(1)
}

enum WorkerCommand {
    RunBatch {
        start_seed: u64,
        count: u64,
        cancel: CancellationToken,
        result_sender: oneshot::Sender<RunStats>,
    },
    Shutdown,
}

fn run_batch(
    runner: &dyn IterationRunner,
    start_seed: u64,
    count: u64,
    cancel: &CancellationToken,
) -> RunStats {
    let mut stats = RunStats::new();
    for i in 0..count {
        if cancel.is_cancelled() {
            stats.interrupted = true;
            break;
        }
        let seed = start_seed.wrapping_add(i);
        stats.record(seed, runner.run_iteration(seed));
    }
    stats
}

struct Worker {
    id: usize,
    handle: Option<thread::JoinHandle<()>>,
}

impl Worker {
    fn spawn(
        id: usize,
        receiver: Arc<Mutex<mpsc::Receiver<WorkerCommand>>>,
        runner: Arc<dyn IterationRunner>,
    ) -> Result<Self, PoolError> {
        let handle = thread::Builder::new()
            .name(format!("sim-worker-{}", id))
            .spawn(move || loop {
                let command = {
                    let guard = match receiver.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    guard.recv()
                };
                match command {
                    Ok(WorkerCommand::RunBatch {
                        start_seed,
                        count,
                        cancel,
                        result_sender,
                    }) => {
                        let stats = run_batch(runner.as_ref(), start_seed, count, &cancel);
                        let _ = result_sender.send(stats);
                    }
                    Ok(WorkerCommand::Shutdown) | Err(_) => break,
                }
            })
            .map_err(|e| PoolError::Spawn(e.to_string()))?;
        Ok(Self {
            id,
            handle: Some(handle),
        })
    }
}

/// Threads owned by one run. Dropping it never blocks the caller: workers
/// are told to shut down and joined from a detached reaper thread.
struct ThreadPool {
    workers: Vec<Worker>,
    sender: mpsc::Sender<WorkerCommand>,
}

impl ThreadPool {
    fn new(size: usize, runner: Arc<dyn IterationRunner>) -> Result<Self, PoolError> {
        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            workers.push(Worker::spawn(id, Arc::clone(&receiver), Arc::clone(&runner))?);
        }
        Ok(Self { workers, sender })
    }

    fn dispatch(&self, command: WorkerCommand) -> Result<(), PoolError> {
        self.sender.send(command).map_err(|_| PoolError::Closed)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        for _ in &self.workers {
            let _ = self.sender.send(WorkerCommand::Shutdown);
        }
        let handles: Vec<(usize, thread::JoinHandle<()>)> = self
            .workers
            .iter_mut()
            .filter_map(|worker| worker.handle.take().map(|handle| (worker.id, handle)))
            .collect();
        if handles.is_empty() {
            return;
        }
        // Called from async code; a worker may still be finishing its
        // current iteration, so the join must not pin the executor
        let reaper = thread::Builder::new()
            .name("sim-pool-reaper".to_string())
            .spawn(move || {
                for (id, handle) in handles {
                    if handle.join().is_err() {
                        warn!(worker = id, "Worker thread panicked");
                    }
                }
            });
        if let Err(e) = reaper {
            // Handles were moved into the failed closure and dropped, which
            // detaches the workers; they exit on the shutdown command
            warn!("Failed to start pool reaper thread: {}", e);
        }
    }
}

/// Runs a batch of iterations across a fixed pool of worker threads
#[derive(Clone)]
pub struct WorkerPoolRunner {
    config: PoolConfig,
    runner: Arc<dyn IterationRunner>,
}

impl WorkerPoolRunner {
    pub fn new(runner: Arc<dyn IterationRunner>, config: PoolConfig) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub async fn run(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
        hooks: RunHooks,
    ) -> Result<RunOutcome, PoolError> {
        let started = Instant::now();
        let workers = resolve_worker_count(self.config.workers);
        info!(
            rotation = self.runner.name(),
            iterations = request.iterations,
            workers,
            batch_size = request.batch_size,
            "Starting run"
        );

        let stats = if workers == 0 {
            self.run_inline(request, cancel.clone(), hooks.on_progress.clone(), started)
                .await?
        } else {
            self.run_waves(request, workers, cancel.clone(), hooks.on_progress.clone(), started)
                .await?
        };

        let Some(stats) = stats else {
            info!(rotation = self.runner.name(), "Run interrupted");
            return Ok(RunOutcome::Interrupted);
        };

        let summary = stats.summary(started.elapsed().as_millis() as u64);
        info!(
            completed = summary.completed_sims,
            failed = summary.failed_sims,
            elapsed_ms = summary.elapsed_ms,
            throughput = summary.throughput as u64,
            "Run completed"
        );
        if let Some(on_complete) = hooks.on_complete {
            on_complete(&summary);
        }
        Ok(RunOutcome::Completed(summary))
    }

    async fn run_inline(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
        progress: Option<ProgressFn>,
        started: Instant,
    ) -> Result<Option<RunStats>, PoolError> {
        let runner = Arc::clone(&self.runner);
        let config = self.config;
        let handle = tokio::task::spawn_blocking(move || {
            let mut stats = RunStats::new();
            let mut reporter = ProgressReporter::new(&config, request.iterations, progress);
            let batch = request.batch_size.max(1);
            let mut done = 0;
            while done < request.iterations {
                let count = batch.min(request.iterations - done);
                let partial = run_batch(
                    runner.as_ref(),
                    request.seed_base.wrapping_add(done),
                    count,
                    &cancel,
                );
                stats.merge(partial);
                if stats.interrupted {
                    return None;
                }
                done += count;
                reporter.observe(stats.processed(), started);
            }
            Some(stats)
        });
        handle.await.map_err(|_| PoolError::WorkerLost)
    }

    async fn run_waves(
        &self,
        request: RunRequest,
        workers: usize,
        cancel: CancellationToken,
        progress: Option<ProgressFn>,
        started: Instant,
    ) -> Result<Option<RunStats>, PoolError> {
        let pool = ThreadPool::new(workers, Arc::clone(&self.runner))?;
        // Queued batches bail out immediately once this run is abandoned
        let batch_cancel = cancel.child_token();
        let _abandon = batch_cancel.clone().drop_guard();
        let batch = request.batch_size.max(1);
        let wave_size = workers * WAVE_FACTOR;
        let mut reporter = ProgressReporter::new(&self.config, request.iterations, progress);
        let mut stats = RunStats::new();
        let mut dispatched = 0u64;
        let mut wave = 0usize;

        while dispatched < request.iterations {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            let mut in_flight = FuturesUnordered::new();
            while in_flight.len() < wave_size && dispatched < request.iterations {
                let count = batch.min(request.iterations - dispatched);
                let (result_sender, result_receiver) = oneshot::channel();
                pool.dispatch(WorkerCommand::RunBatch {
                    start_seed: request.seed_base.wrapping_add(dispatched),
                    count,
                    cancel: batch_cancel.clone(),
                    result_sender,
                })?;
                in_flight.push(result_receiver);
                dispatched += count;
            }
            debug!(wave, batches = in_flight.len(), dispatched, "Wave dispatched");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(None),
                    next = in_flight.next() => match next {
                        Some(Ok(partial)) => {
                            stats.merge(partial);
                            if stats.interrupted {
                                return Ok(None);
                            }
                            reporter.observe(stats.processed(), started);
                        }
                        Some(Err(_)) => return Err(PoolError::WorkerLost),
                        None => break,
                    },
                }
            }
            wave += 1;
        }

        Ok(Some(stats))
    }
}

/// Emits progress only for large runs and only at a coarse step
struct ProgressReporter {
    sink: Option<ProgressFn>,
    total: u64,
    every: u64,
    next_at: u64,
}

impl ProgressReporter {
    fn new(config: &PoolConfig, total: u64, sink: Option<ProgressFn>) -> Self {
        let enabled = total >= config.progress_min_iterations;
        let every = config.progress_every.max(1);
        Self {
            sink: if enabled { sink } else { None },
            total,
            every,
            next_at: every,
        }
    }

    fn observe(&mut self, completed: u64, started: Instant) {
        let Some(sink) = &self.sink else {
            return;
        };
        if completed < self.next_at {
            return;
        }
        self.next_at = (completed / self.every + 1) * self.every;
        sink(PoolProgress {
            completed,
            total: self.total,
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
    }
}
