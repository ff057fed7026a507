// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod api;
pub mod cli;
pub mod client;
pub mod config;
pub mod crypto;
pub mod job_claim;
pub mod jobs;
pub mod monitoring;
pub mod nodes;
pub mod result_submission;
pub mod simulation;
pub mod storage;
pub mod version;
pub mod worker;

// Re-export the main coordinator and node types
pub use api::{build_router, start_server, AppState, RpcState};
pub use client::{CoordinatorClient, NodeDaemon};
pub use config::{CoordinatorConfig, NodeIdentityFile, NodeSettings};
pub use crypto::{NodeAuthVerifier, NodeKeypair, RequestSigner, VerifiedNode};
pub use job_claim::{ChunkClaimCoordinator, ClaimConfig, ClaimError, ClaimedBatch};
pub use jobs::{JobConfigStore, JobScheduler, SchedulerError};
pub use nodes::{NodeRegistry, RegistryError};
pub use result_submission::{ChunkCompletionAggregator, CompletionError, CompletionReport};
pub use simulation::{IterationRunner, RotationCatalog};
pub use storage::{CoordinatorStore, MemoryStore};
pub use worker::{RemoteRunClient, RunRegistry, WorkerPoolRunner};
