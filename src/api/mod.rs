// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod auth;
pub mod errors;
pub mod handlers;
pub mod http_server;
pub mod rpc;

pub use auth::{require_node_auth, AccountClaims, AccountIdentity, AccountKeys};
pub use errors::{ApiError, ApiJson, ErrorResponse};
pub use handlers::{
    ClaimRequest, CompleteRequest, CreateJobRequest, HeartbeatRequest, HeartbeatResponse,
    NodeClaimRequest, NodeClaimResponse, PermissionRequest, UpsertConfigRequest,
};
pub use http_server::{build_router, coordinator_router, start_server, AppState};
pub use rpc::{rpc_router, RpcState};
