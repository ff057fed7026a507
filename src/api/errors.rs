// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::error;

use crate::crypto::AuthError;
use crate::job_claim::ClaimError;
use crate::jobs::SchedulerError;
use crate::nodes::RegistryError;
use crate::result_submission::CompletionError;
use crate::simulation::SimulationError;
use crate::storage::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub error_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone)]
pub enum ApiError {
    NotFound(String),
    InvalidRequest(String),
    ValidationError { field: String, message: String },
    Unauthorized(String),
    Forbidden(String),
    ServiceUnavailable(String),
    InternalError(String),
}

impl ApiError {
    pub fn to_response(&self, request_id: Option<String>) -> ErrorResponse {
        let (error_type, message, details) = match self {
            ApiError::NotFound(msg) => ("not_found", msg.clone(), None),
            ApiError::InvalidRequest(msg) => ("invalid_request", msg.clone(), None),
            ApiError::ValidationError { field, message } => {
                let mut details = HashMap::new();
                details.insert(
                    "field".to_string(),
                    serde_json::Value::String(field.clone()),
                );
                ("validation_error", message.clone(), Some(details))
            }
            ApiError::Unauthorized(msg) => ("unauthorized", msg.clone(), None),
            ApiError::Forbidden(msg) => ("forbidden", msg.clone(), None),
            ApiError::ServiceUnavailable(msg) => ("service_unavailable", msg.clone(), None),
            ApiError::InternalError(msg) => ("internal_error", msg.clone(), None),
        };

        ErrorResponse {
            error_type: error_type.to_string(),
            message,
            request_id,
            details,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::NotFound(_) => 404,
            ApiError::InvalidRequest(_) | ApiError::ValidationError { .. } => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::ServiceUnavailable(_) => 503,
            ApiError::InternalError(_) => 500,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ApiError::ValidationError { field, message } => {
                write!(f, "Validation error for {}: {}", field, message)
            }
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_response(None))).into_response()
    }
}

/// JSON body extractor that rejects with [`ApiError`] instead of axum's
/// plain-text 422
#[derive(Debug, Clone, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Unauthorized(format!("node authentication failed: {}", err.category()))
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        error!("Storage error: {}", err);
        ApiError::InternalError("storage error".to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            RegistryError::Ownership(msg) => ApiError::Forbidden(msg),
            RegistryError::Validation(msg) => ApiError::InvalidRequest(msg),
            RegistryError::Store(e) => e.into(),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Validation(msg) => ApiError::InvalidRequest(msg),
            SchedulerError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            SchedulerError::Store(e) => e.into(),
        }
    }
}

impl From<ClaimError> for ApiError {
    fn from(err: ClaimError) -> Self {
        match err {
            ClaimError::NodeNotFound => ApiError::NotFound("node not found".to_string()),
            ClaimError::Store(e) => e.into(),
        }
    }
}

impl From<CompletionError> for ApiError {
    fn from(err: CompletionError) -> Self {
        match err {
            CompletionError::NodeNotFound => ApiError::NotFound("node not found".to_string()),
            CompletionError::ChunkNotFound => ApiError::NotFound("chunk not found".to_string()),
            CompletionError::Ownership(msg) => ApiError::Forbidden(msg),
            CompletionError::Validation(msg) => ApiError::ValidationError {
                field: "result".to_string(),
                message: msg,
            },
            CompletionError::Store(e) => e.into(),
        }
    }
}

impl From<SimulationError> for ApiError {
    fn from(err: SimulationError) -> Self {
        match err {
            SimulationError::UnknownRotation(name) => ApiError::ValidationError {
                field: "rotation".to_string(),
                message: format!("rotation '{}' not found", name),
            },
            SimulationError::InvalidDuration(d) => ApiError::ValidationError {
                field: "duration".to_string(),
                message: format!("invalid duration {}", d),
            },
            SimulationError::Iteration { .. } => ApiError::InternalError(err.to_string()),
        }
    }
}
