// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Request authentication
//!
//! Node endpoints sit behind [`require_node_auth`], which buffers the body,
//! verifies the node signature and stores the [`VerifiedNode`] as a request
//! extension. Account endpoints take an [`AccountIdentity`] extracted from an
//! HS256 bearer token.

use axum::async_trait;
use axum::body::{to_bytes, Body};
use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::errors::ApiError;
use super::http_server::AppState;
use crate::crypto::{HEADER_NODE_KEY, HEADER_NODE_SIG, HEADER_NODE_TS};

/// Largest node request body accepted for signature checking
pub const MAX_SIGNED_BODY_BYTES: usize = 1 << 20;

pub async fn require_node_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (mut parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_SIGNED_BODY_BYTES)
        .await
        .map_err(|_| ApiError::InvalidRequest("request body too large".to_string()))?;

    let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok());
    let verified = state
        .verifier
        .verify(
            header(HEADER_NODE_KEY),
            header(HEADER_NODE_SIG),
            header(HEADER_NODE_TS),
            parts.method.as_str(),
            parts.uri.path(),
            &bytes,
        )
        .map_err(|e| {
            debug!(category = e.category(), path = %parts.uri.path(), "Rejected node request");
            state.metrics.record_auth_failure(e.category());
            ApiError::from(e)
        })?;

    parts.extensions.insert(verified);
    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountClaims {
    /// Account id
    pub sub: String,
    pub exp: usize,
}

/// HS256 keys for account bearer tokens
#[derive(Clone)]
pub struct AccountKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl AccountKeys {
    pub fn from_secret(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    /// Mint a token for `account` valid for `ttl_secs`
    pub fn issue(&self, account: &str, ttl_secs: u64) -> Result<String, jsonwebtoken::errors::Error> {
        let exp = chrono::Utc::now().timestamp().max(0) as u64 + ttl_secs;
        let claims = AccountClaims {
            sub: account.to_string(),
            exp: exp as usize,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }

    pub fn verify(&self, token: &str) -> Result<AccountClaims, jsonwebtoken::errors::Error> {
        let validation = Validation::new(Algorithm::HS256);
        Ok(decode::<AccountClaims>(token, &self.decoding, &validation)?.claims)
    }
}

/// Authenticated account behind a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountIdentity(pub String);

#[async_trait]
impl FromRequestParts<AppState> for AccountIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let keys = state.account_keys.as_ref().ok_or_else(|| {
            ApiError::ServiceUnavailable("account authentication is not configured".to_string())
        })?;
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;
        let claims = keys
            .verify(token.trim())
            .map_err(|_| ApiError::Unauthorized("invalid account token".to_string()))?;
        if claims.sub.trim().is_empty() {
            return Err(ApiError::Unauthorized("invalid account token".to_string()));
        }
        Ok(AccountIdentity(claims.sub))
    }
}
