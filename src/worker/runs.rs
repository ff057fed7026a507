// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Active run registry
//!
//! Maps a run identifier to the cancellation token of the run executing under
//! it. One registry is created per daemon or server and handed to whatever
//! starts runs. Entries are removed when the run's [`RunHandle`] drops, so a
//! late cancel for a finished run finds nothing and does nothing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Entry {
    generation: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct Inner {
    runs: Mutex<HashMap<String, Entry>>,
    next_generation: AtomicU64,
}

impl Inner {
    fn runs(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        match self.runs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[derive(Clone, Default)]
pub struct RunRegistry {
    inner: Arc<Inner>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run. A previous run under the same id is cancelled.
    pub fn start(&self, run_id: impl Into<String>) -> RunHandle {
        self.register(run_id.into(), CancellationToken::new())
    }

    /// Register a run whose token is also cancelled when `parent` is
    pub fn start_linked(&self, run_id: impl Into<String>, parent: &CancellationToken) -> RunHandle {
        self.register(run_id.into(), parent.child_token())
    }

    fn register(&self, run_id: String, token: CancellationToken) -> RunHandle {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let previous = self.inner.runs().insert(
            run_id.clone(),
            Entry {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            debug!(run_id = %run_id, "Replacing active run");
            previous.token.cancel();
        }
        RunHandle {
            run_id,
            generation,
            token,
            registry: self.clone(),
        }
    }

    /// Cancel a run by id. Returns false when no such run is active.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.inner.runs().get(run_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for entry in self.inner.runs().values() {
            entry.token.cancel();
        }
    }

    pub fn is_active(&self, run_id: &str) -> bool {
        self.inner.runs().contains_key(run_id)
    }

    pub fn active_count(&self) -> usize {
        self.inner.runs().len()
    }

    fn finish(&self, run_id: &str, generation: u64) {
        let mut runs = self.inner.runs();
        if runs.get(run_id).map(|e| e.generation) == Some(generation) {
            runs.remove(run_id);
        }
    }
}

/// Ownership of one registered run; deregisters on drop
pub struct RunHandle {
    run_id: String,
    generation: u64,
    token: CancellationToken,
    registry: RunRegistry,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.registry.finish(&self.run_id, self.generation);
    }
}
