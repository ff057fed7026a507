// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use super::auth::AccountIdentity;
use super::errors::{ApiError, ApiJson};
use super::http_server::AppState;
use crate::crypto::VerifiedNode;
use crate::job_claim::ClaimedBatch;
use crate::jobs::{ChunkResult, CreatedJob, JobProgress};
use crate::nodes::{NodeMetadata, NodePermission, NodeStatus, PermissionScope, Registration};
use crate::result_submission::CompletionReport;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default = "default_heartbeat_status")]
    pub status: NodeStatus,
}

fn default_heartbeat_status() -> NodeStatus {
    NodeStatus::Online
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub id: Uuid,
    pub name: String,
    pub max_parallel: u32,
    pub status: NodeStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    #[serde(default)]
    pub batch_size: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub chunk_id: Uuid,
    pub result: ChunkResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub config_hash: String,
    pub iterations: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertConfigRequest {
    pub config: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HashQuery {
    pub hash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobQuery {
    pub id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeClaimRequest {
    pub claim_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeClaimResponse {
    pub id: Uuid,
    pub name: String,
    pub status: NodeStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    pub node_id: Uuid,
    pub access_type: String,
    #[serde(default)]
    pub target_id: Option<String>,
}

impl PermissionRequest {
    fn scope(&self) -> Result<PermissionScope, ApiError> {
        match self.access_type.as_str() {
            "public" => Ok(PermissionScope::Public),
            "user" => Ok(PermissionScope::User(
                self.target_id.clone().unwrap_or_default(),
            )),
            other => Err(ApiError::ValidationError {
                field: "accessType".to_string(),
                message: format!("unknown access type '{}'", other),
            }),
        }
    }
}

pub async fn node_register(
    State(state): State<AppState>,
    Extension(node): Extension<VerifiedNode>,
    ApiJson(metadata): ApiJson<NodeMetadata>,
) -> Result<Json<Registration>, ApiError> {
    let (registration, created) = state.registry.register(&node, &metadata).await?;
    if created {
        state.metrics.nodes_registered.inc();
    }
    Ok(Json(registration))
}

pub async fn node_heartbeat(
    State(state): State<AppState>,
    Extension(node): Extension<VerifiedNode>,
    ApiJson(request): ApiJson<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let record = state.registry.heartbeat(&node, request.status).await?;
    Ok(Json(HeartbeatResponse {
        id: record.id,
        name: record.name,
        max_parallel: record.max_parallel,
        status: record.status,
    }))
}

pub async fn chunk_claim(
    State(state): State<AppState>,
    Extension(node): Extension<VerifiedNode>,
    request: Option<ApiJson<ClaimRequest>>,
) -> Result<Json<ClaimedBatch>, ApiError> {
    let requested = request.and_then(|ApiJson(r)| r.batch_size);
    let batch = state.claims.claim(&node, requested).await?;
    state.metrics.chunks_claimed.inc_by(batch.chunks.len() as u64);
    Ok(Json(batch))
}

pub async fn chunk_complete(
    State(state): State<AppState>,
    Extension(node): Extension<VerifiedNode>,
    ApiJson(request): ApiJson<CompleteRequest>,
) -> Result<Json<CompletionReport>, ApiError> {
    let report = state
        .completions
        .complete(&node, request.chunk_id, request.result)
        .await?;
    if !report.already_completed {
        state.metrics.chunks_completed.inc();
    }
    if report.job_finalized {
        state.metrics.jobs_completed.inc();
    }
    Ok(Json(report))
}

pub async fn job_create(
    State(state): State<AppState>,
    AccountIdentity(account): AccountIdentity,
    ApiJson(request): ApiJson<CreateJobRequest>,
) -> Result<Json<CreatedJob>, ApiError> {
    let created = state
        .scheduler
        .create_job(&account, &request.config_hash, request.iterations)
        .await?;
    state.metrics.jobs_created.inc();
    Ok(Json(created))
}

pub async fn job_status(
    State(state): State<AppState>,
    AccountIdentity(account): AccountIdentity,
    Query(query): Query<JobQuery>,
) -> Result<Json<JobProgress>, ApiError> {
    Ok(Json(state.scheduler.job_progress(&account, query.id).await?))
}

pub async fn config_upsert(
    State(state): State<AppState>,
    AccountIdentity(_account): AccountIdentity,
    ApiJson(request): ApiJson<UpsertConfigRequest>,
) -> Result<Json<Value>, ApiError> {
    let hash = state.configs.upsert(request.config).await?;
    Ok(Json(json!({ "success": true, "hash": hash })))
}

pub async fn config_fetch(
    State(state): State<AppState>,
    Query(query): Query<HashQuery>,
) -> Result<Response, ApiError> {
    let config = state.configs.fetch(&query.hash).await?;
    Ok((
        StatusCode::OK,
        [(header::CACHE_CONTROL, "public, max-age=31536000, immutable")],
        Json(config),
    )
        .into_response())
}

pub async fn node_claim(
    State(state): State<AppState>,
    AccountIdentity(account): AccountIdentity,
    ApiJson(request): ApiJson<NodeClaimRequest>,
) -> Result<Json<NodeClaimResponse>, ApiError> {
    let record = state
        .registry
        .link_to_account(&request.claim_code, &account)
        .await?;
    Ok(Json(NodeClaimResponse {
        id: record.id,
        name: record.name,
        status: record.status,
    }))
}

pub async fn node_permission(
    State(state): State<AppState>,
    AccountIdentity(account): AccountIdentity,
    ApiJson(request): ApiJson<PermissionRequest>,
) -> Result<Json<NodePermission>, ApiError> {
    let scope = request.scope()?;
    let permission = state
        .registry
        .grant_permission(&account, request.node_id, scope)
        .await?;
    Ok(Json(permission))
}

pub async fn health() -> impl IntoResponse {
    let mut body = crate::version::get_version_info();
    body["status"] = json!("ok");
    Json(body)
}

pub async fn metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    let body = state
        .metrics
        .export()
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    debug!(bytes = body.len(), "Metrics scraped");
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}
