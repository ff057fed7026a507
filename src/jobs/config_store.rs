// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Content-addressed job configuration
//!
//! A config is identified by the SHA-256 of its canonical JSON encoding
//! (compact, object keys sorted). Identical configs share one record, and a
//! stored config never changes, so fetches can be cached forever.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::debug;

use super::SchedulerError;
use crate::crypto::sha256_hex;
use crate::storage::CoordinatorStore;

/// Rebuild a value with every object's keys in sorted order
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Deterministic content hash of a config
pub fn content_hash(config: &Value) -> String {
    let canonical = canonicalize(config).to_string();
    sha256_hex(canonical.as_bytes())
}

#[derive(Clone)]
pub struct JobConfigStore {
    store: Arc<dyn CoordinatorStore>,
}

impl JobConfigStore {
    pub fn new(store: Arc<dyn CoordinatorStore>) -> Self {
        Self { store }
    }

    /// Store a config if new and return its hash
    pub async fn upsert(&self, config: Value) -> Result<String, SchedulerError> {
        if !config.is_object() {
            return Err(SchedulerError::Validation(
                "config must be a JSON object".to_string(),
            ));
        }
        let hash = content_hash(&config);
        let inserted = self
            .store
            .insert_config_if_absent(&hash, canonicalize(&config), Utc::now())
            .await?;
        debug!(hash = %hash, inserted, "Config upserted");
        Ok(hash)
    }

    pub async fn fetch(&self, hash: &str) -> Result<Value, SchedulerError> {
        self.store
            .get_config(hash)
            .await?
            .map(|record| record.config)
            .ok_or_else(|| SchedulerError::NotFound("config".to_string()))
    }
}
