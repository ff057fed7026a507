// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Remote run client
//!
//! Delegates a whole run to a peer's `/rpc/run` endpoint. The peer answers
//! with newline-delimited JSON frames: any number of `progress` frames and
//! then exactly one `result` or `error` frame. The caller gets the same
//! [`RunOutcome`] the local pool would produce.

use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use super::pool::{PoolProgress, ProgressFn, RunOutcome};
use super::stats::RunSummary;

#[derive(Debug, Error)]
pub enum RemoteRunError {
    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    #[error("remote server unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("remote server returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("remote run failed: {0}")]
    Remote(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Body of a `/rpc/run` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRunRequest {
    pub rotation: String,
    pub duration: f64,
    pub iterations: u64,
    pub batch_size: u64,
}

/// One line of the `/rpc/run` response stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RunFrame {
    Progress(PoolProgress),
    Result(RunSummary),
    Error { message: String },
}

impl RunFrame {
    /// Encode as one NDJSON line including the trailing newline
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                "{{\"type\":\"error\",\"message\":\"frame encoding failed: {}\"}}",
                e
            )
        });
        line.push('\n');
        line
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub uptime_ms: u64,
}

/// Longest frame line accepted from a peer, newline excluded
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Splits a byte stream into frames on newline boundaries
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<RunFrame>, RemoteRunError> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            if line.len() > MAX_FRAME_BYTES {
                return Err(frame_too_long(line.len()));
            }
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            let frame = serde_json::from_slice(line)
                .map_err(|e| RemoteRunError::Protocol(format!("bad frame: {}", e)))?;
            frames.push(frame);
        }
        if self.buffer.len() > MAX_FRAME_BYTES {
            let pending = self.buffer.len();
            self.buffer.clear();
            return Err(frame_too_long(pending));
        }
        Ok(frames)
    }

    /// Bytes received after the last newline
    pub fn remainder(&self) -> &[u8] {
        &self.buffer
    }
}

fn frame_too_long(len: usize) -> RemoteRunError {
    RemoteRunError::Protocol(format!(
        "frame of {} bytes exceeds the {} byte limit",
        len, MAX_FRAME_BYTES
    ))
}

#[derive(Debug, Clone)]
pub struct RemoteRunClient {
    http: reqwest::Client,
    base_url: Url,
}

impl RemoteRunClient {
    pub fn new(base_url: &str) -> Result<Self, RemoteRunError> {
        let base_url =
            Url::parse(base_url).map_err(|e| RemoteRunError::InvalidUrl(e.to_string()))?;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteRunError> {
        self.base_url
            .join(path)
            .map_err(|e| RemoteRunError::InvalidUrl(e.to_string()))
    }

    pub async fn health(&self) -> Result<HealthStatus, RemoteRunError> {
        let response = self.http.get(self.endpoint("/rpc/health")?).send().await?;
        Ok(check_status(response).await?.json().await?)
    }

    pub async fn rotations(&self) -> Result<Vec<String>, RemoteRunError> {
        let response = self.http.get(self.endpoint("/rpc/rotations")?).send().await?;
        Ok(check_status(response).await?.json().await?)
    }

    /// Run remotely, streaming progress into `on_progress`.
    ///
    /// Cancelling drops the connection, which stops the remote run.
    pub async fn run(
        &self,
        request: &RemoteRunRequest,
        cancel: CancellationToken,
        on_progress: Option<ProgressFn>,
    ) -> Result<RunOutcome, RemoteRunError> {
        info!(
            server = %self.base_url,
            rotation = %request.rotation,
            iterations = request.iterations,
            "Starting remote run"
        );
        let response = tokio::select! {
            _ = cancel.cancelled() => return Ok(RunOutcome::Interrupted),
            sent = self.http.post(self.endpoint("/rpc/run")?).json(request).send() => sent?,
        };
        let response = check_status(response).await?;

        let mut stream = response.bytes_stream();
        let mut decoder = FrameDecoder::new();
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Remote run cancelled, closing stream");
                    return Ok(RunOutcome::Interrupted);
                }
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else {
                return Err(RemoteRunError::Protocol(
                    "stream ended without a result".to_string(),
                ));
            };
            for frame in decoder.push(&chunk?)? {
                match frame {
                    RunFrame::Progress(progress) => {
                        if let Some(sink) = &on_progress {
                            sink(progress);
                        }
                    }
                    RunFrame::Result(summary) => {
                        info!(
                            completed = summary.completed_sims,
                            elapsed_ms = summary.elapsed_ms,
                            "Remote run completed"
                        );
                        return Ok(RunOutcome::Completed(summary));
                    }
                    RunFrame::Error { message } => return Err(RemoteRunError::Remote(message)),
                }
            }
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RemoteRunError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RemoteRunError::Http {
        status: status.as_u16(),
        body,
    })
}
