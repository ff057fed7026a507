// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Node-side coordinator client and daemon loop

pub mod api_client;
pub mod daemon;

pub use api_client::{ClientError, CoordinatorClient};
pub use daemon::{Backoff, LinkState, NodeDaemon};
