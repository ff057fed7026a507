// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Signed HTTP client for the coordinator's node endpoints

use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::api::{ClaimRequest, CompleteRequest, HeartbeatRequest, HeartbeatResponse};
use crate::crypto::{NodeKeypair, RequestSigner};
use crate::job_claim::ClaimedBatch;
use crate::jobs::ChunkResult;
use crate::nodes::{NodeMetadata, NodeStatus, Registration};
use crate::result_submission::CompletionReport;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid coordinator url: {0}")]
    InvalidUrl(String),

    #[error("coordinator unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("coordinator returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl ClientError {
    /// Transient failures worth retrying with backoff. 401 is included since
    /// it is most often clock skew that resolves on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(_) => true,
            ClientError::Http { status, .. } => *status == 401 || *status >= 500,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    http: Client,
    base_url: Url,
    signer: RequestSigner,
}

impl CoordinatorClient {
    pub fn new(base_url: &str, keypair: NodeKeypair) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            base_url,
            signer: RequestSigner::new(keypair),
        })
    }

    pub fn keypair(&self) -> &NodeKeypair {
        self.signer.keypair()
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))
    }

    /// POST a JSON body signed over the exact bytes sent
    async fn signed_post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ClientError> {
        let url = self.endpoint(path)?;
        let bytes = serde_json::to_vec(body)?;
        let headers = self.signer.sign_request("POST", url.path(), &bytes);

        let mut request = self
            .http
            .request(Method::POST, url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(bytes);
        for (name, value) in headers.as_pairs() {
            request = request.header(name, value);
        }
        debug!(path = %url.path(), "Signed request");
        decode(request.send().await?).await
    }

    pub async fn register(&self, metadata: &NodeMetadata) -> Result<Registration, ClientError> {
        self.signed_post("/functions/v1/node-register", metadata).await
    }

    pub async fn heartbeat(&self, status: NodeStatus) -> Result<HeartbeatResponse, ClientError> {
        self.signed_post("/functions/v1/node-heartbeat", &HeartbeatRequest { status })
            .await
    }

    pub async fn claim(&self, batch_size: Option<i64>) -> Result<ClaimedBatch, ClientError> {
        self.signed_post("/functions/v1/chunk-claim", &ClaimRequest { batch_size })
            .await
    }

    pub async fn complete(
        &self,
        chunk_id: Uuid,
        result: ChunkResult,
    ) -> Result<CompletionReport, ClientError> {
        self.signed_post(
            "/functions/v1/chunk-complete",
            &CompleteRequest { chunk_id, result },
        )
        .await
    }

    pub async fn fetch_config(&self, hash: &str) -> Result<Value, ClientError> {
        let mut url = self.endpoint("/functions/v1/config-fetch")?;
        url.query_pairs_mut().append_pair("hash", hash);
        decode(self.http.get(url).send().await?).await
    }

    /// Liveness probe; not signed
    pub async fn health(&self) -> Result<Value, ClientError> {
        let response = self.http.get(self.endpoint("/health")?).send().await?;
        decode(response).await
    }
}

async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound(body));
    }
    Err(ClientError::Http {
        status: status.as_u16(),
        body,
    })
}
