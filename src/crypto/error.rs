// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Node Authentication Error Types
//!
//! Two families of errors live here:
//!
//! - **AuthError**: why a node-signed request was rejected. Every variant maps
//!   to HTTP 401 and only the category is ever reported back to the caller.
//! - **CryptoError**: local key handling failures (loading a keypair from disk,
//!   decoding a base64 private key).

use thiserror::Error;

/// Rejection reasons for a node-signed request, in verification order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// One or more of `X-Node-Key`, `X-Node-Sig`, `X-Node-Ts` is absent
    #[error("missing node authentication headers")]
    MissingHeaders,

    /// Timestamp is outside the replay window
    #[error("request timestamp outside the allowed window (skew {skew_secs}s)")]
    Expired {
        /// Absolute difference between server time and the signed timestamp
        skew_secs: i64,
    },

    /// Key, signature or timestamp did not decode to the expected shape
    #[error("malformed {field}")]
    BadEncoding {
        /// Which header failed to decode
        field: &'static str,
    },

    /// Signature does not verify against the reconstructed message
    #[error("signature verification failed")]
    BadSignature,
}

impl AuthError {
    /// Short category used in logs and metrics labels
    pub fn category(&self) -> &'static str {
        match self {
            AuthError::MissingHeaders => "missing_headers",
            AuthError::Expired { .. } => "expired",
            AuthError::BadEncoding { .. } => "bad_encoding",
            AuthError::BadSignature => "bad_signature",
        }
    }
}

/// Errors from local keypair operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid private key length: expected 32 bytes, got {0}")]
    InvalidPrivateKeyLength(usize),

    #[error("invalid private key encoding")]
    InvalidPrivateKeyEncoding,

    #[error("invalid public key")]
    InvalidPublicKey,
}
