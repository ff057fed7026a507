// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Node identity keys
//!
//! Every node owns a long-lived Ed25519 keypair. The public key is its
//! identity on the coordinator; the private key never leaves the node.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use data_encoding::BASE32_NOPAD;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::{rngs::OsRng, Rng};
use sha2::{Digest, Sha256};

use super::error::CryptoError;

/// Number of characters in a claim code
pub const CLAIM_CODE_LEN: usize = 8;

/// Ed25519 keypair identifying a compute node
#[derive(Clone)]
pub struct NodeKeypair {
    signing_key: SigningKey,
}

impl NodeKeypair {
    /// Generate a fresh random keypair
    pub fn generate() -> Self {
        let mut secret_bytes = [0u8; 32];
        OsRng.fill(&mut secret_bytes);
        Self {
            signing_key: SigningKey::from_bytes(&secret_bytes),
        }
    }

    /// Restore a keypair from its raw 32-byte private key
    pub fn from_private_key(bytes: &[u8]) -> Result<Self, CryptoError> {
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidPrivateKeyLength(bytes.len()))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&secret),
        })
    }

    /// Restore a keypair from a base64-encoded private key
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| CryptoError::InvalidPrivateKeyEncoding)?;
        Self::from_private_key(&bytes)
    }

    pub fn private_key_base64(&self) -> String {
        STANDARD.encode(self.signing_key.to_bytes())
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.public_key_bytes())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Claim code for this node's public key
    pub fn claim_code(&self) -> String {
        derive_claim_code(&self.public_key_bytes())
    }
}

impl std::fmt::Debug for NodeKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKeypair")
            .field("public_key", &self.public_key_base64())
            .finish_non_exhaustive()
    }
}

/// Derive the human-typeable claim code for a public key.
///
/// Base32 of `sha256(pubkey)`, first eight characters, upper case. Deterministic
/// for a given key and reveals only a truncated digest.
pub fn derive_claim_code(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    let mut encoded = BASE32_NOPAD.encode(&digest);
    encoded.truncate(CLAIM_CODE_LEN);
    encoded.to_uppercase()
}
