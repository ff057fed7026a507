// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Signed node requests
//!
//! A node proves its identity on every call with three headers:
//!
//! - `X-Node-Key`: base64 Ed25519 public key (32 bytes)
//! - `X-Node-Sig`: base64 Ed25519 signature (64 bytes)
//! - `X-Node-Ts`: unix timestamp in seconds
//!
//! The signature covers `ts \0 METHOD \0 path \0 hex(sha256(body))`, so the
//! body never needs canonicalising. The verifier answers only with the key
//! it proved; it never touches storage.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use super::error::AuthError;
use super::node_keys::NodeKeypair;

pub const HEADER_NODE_KEY: &str = "x-node-key";
pub const HEADER_NODE_SIG: &str = "x-node-sig";
pub const HEADER_NODE_TS: &str = "x-node-ts";

/// Allowed clock skew in seconds, inclusive
pub const DEFAULT_MAX_SKEW_SECS: i64 = 300;

/// Lower-case hex SHA-256 digest
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Build the exact byte string a node signs
pub fn build_sign_message(timestamp: i64, method: &str, path: &str, body: &[u8]) -> Vec<u8> {
    format!(
        "{}\0{}\0{}\0{}",
        timestamp,
        method.to_uppercase(),
        path,
        sha256_hex(body)
    )
    .into_bytes()
}

/// The three authentication header values for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAuthHeaders {
    pub key: String,
    pub signature: String,
    pub timestamp: String,
}

impl NodeAuthHeaders {
    pub fn as_pairs(&self) -> [(&'static str, &str); 3] {
        [
            (HEADER_NODE_KEY, self.key.as_str()),
            (HEADER_NODE_SIG, self.signature.as_str()),
            (HEADER_NODE_TS, self.timestamp.as_str()),
        ]
    }
}

/// Signs outgoing node requests
#[derive(Debug, Clone)]
pub struct RequestSigner {
    keypair: NodeKeypair,
}

impl RequestSigner {
    pub fn new(keypair: NodeKeypair) -> Self {
        Self { keypair }
    }

    pub fn keypair(&self) -> &NodeKeypair {
        &self.keypair
    }

    /// Sign a request at the current time
    pub fn sign_request(&self, method: &str, path: &str, body: &[u8]) -> NodeAuthHeaders {
        self.sign_request_at(chrono::Utc::now().timestamp(), method, path, body)
    }

    pub fn sign_request_at(
        &self,
        timestamp: i64,
        method: &str,
        path: &str,
        body: &[u8],
    ) -> NodeAuthHeaders {
        let message = build_sign_message(timestamp, method, path, body);
        let signature = self.keypair.sign(&message);
        NodeAuthHeaders {
            key: self.keypair.public_key_base64(),
            signature: STANDARD.encode(signature.to_bytes()),
            timestamp: timestamp.to_string(),
        }
    }
}

/// Identity proven by a valid signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VerifiedNode {
    pub public_key: [u8; 32],
}

impl VerifiedNode {
    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.public_key)
    }
}

/// Server-side verification of node-signed requests
#[derive(Debug, Clone)]
pub struct NodeAuthVerifier {
    max_skew_secs: i64,
}

impl Default for NodeAuthVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SKEW_SECS)
    }
}

impl NodeAuthVerifier {
    pub fn new(max_skew_secs: i64) -> Self {
        Self { max_skew_secs }
    }

    pub fn max_skew_secs(&self) -> i64 {
        self.max_skew_secs
    }

    pub fn verify(
        &self,
        key: Option<&str>,
        signature: Option<&str>,
        timestamp: Option<&str>,
        method: &str,
        path: &str,
        body: &[u8],
    ) -> Result<VerifiedNode, AuthError> {
        self.verify_at(
            chrono::Utc::now().timestamp(),
            key,
            signature,
            timestamp,
            method,
            path,
            body,
        )
    }

    /// Verify against an explicit server clock.
    ///
    /// Checks run in a fixed order and the first failure wins: presence,
    /// freshness, encoding, then the signature itself.
    #[allow(clippy::too_many_arguments)]
    pub fn verify_at(
        &self,
        now: i64,
        key: Option<&str>,
        signature: Option<&str>,
        timestamp: Option<&str>,
        method: &str,
        path: &str,
        body: &[u8],
    ) -> Result<VerifiedNode, AuthError> {
        let (key, signature, timestamp) = match (key, signature, timestamp) {
            (Some(k), Some(s), Some(t)) => (k, s, t),
            _ => return Err(AuthError::MissingHeaders),
        };

        let ts: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| AuthError::BadEncoding { field: "timestamp" })?;
        let skew_secs = now.saturating_sub(ts).saturating_abs();
        if skew_secs > self.max_skew_secs {
            return Err(AuthError::Expired { skew_secs });
        }

        let key_bytes: [u8; 32] = STANDARD
            .decode(key.trim())
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or(AuthError::BadEncoding { field: "key" })?;
        let sig_bytes: [u8; 64] = STANDARD
            .decode(signature.trim())
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or(AuthError::BadEncoding { field: "signature" })?;

        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|_| AuthError::BadEncoding { field: "key" })?;
        let sig = Signature::from_bytes(&sig_bytes);
        let message = build_sign_message(ts, method, path, body);

        verifying_key
            .verify(&message, &sig)
            .map_err(|_| AuthError::BadSignature)?;

        Ok(VerifiedNode {
            public_key: key_bytes,
        })
    }
}
