// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Node Authentication Module
//!
//! Cryptographic primitives for proving node identity to the coordinator:
//!
//! - **Node keys**: Ed25519 keypairs and the claim codes derived from them
//! - **Request signing**: per-request signatures over method, path, body digest
//!   and timestamp, plus the server-side verifier
//!
//! ## Security Considerations
//!
//! - The verifier never consults storage before a signature checks out, so the
//!   auth path cannot be used to probe which keys are registered
//! - Timestamps outside the skew window are rejected regardless of signature
//! - Private keys are only ever held by the node that generated them

pub mod error;
pub mod node_keys;
pub mod request_signing;

pub use error::{AuthError, CryptoError};
pub use node_keys::{derive_claim_code, NodeKeypair, CLAIM_CODE_LEN};
pub use request_signing::{
    build_sign_message, sha256_hex, NodeAuthHeaders, NodeAuthVerifier, RequestSigner,
    VerifiedNode, DEFAULT_MAX_SKEW_SECS, HEADER_NODE_KEY, HEADER_NODE_SIG, HEADER_NODE_TS,
};
