//! Per-dispatch-cycle resolution cache.
//!
//! One cache lives for exactly one dispatch cycle. It records every resolved
//! dependency and the releases owed by scoped ones; [`ResolutionCache::teardown`]
//! consumes it, so releases cannot run twice.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;

use crate::scope::dependency::{DependencyId, Release};
use crate::scope::value::DepValue;

/// A resolved dependency and the type its provider declared.
#[derive(Clone)]
pub struct CacheEntry {
    pub value: DepValue,
    pub type_name: &'static str,
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct ResolutionCache {
    entries: HashMap<DependencyId, CacheEntry>,
    releases: Vec<(String, Box<dyn Release>)>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: DependencyId) -> Option<&CacheEntry> {
        self.entries.get(&id)
    }

    pub fn insert(&mut self, id: DependencyId, entry: CacheEntry) {
        self.entries.insert(id, entry);
    }

    /// Queue a scoped resource's release for the end of the cycle.
    pub fn defer_release(&mut self, name: impl Into<String>, release: Box<dyn Release>) {
        self.releases.push((name.into(), release));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_releases(&self) -> usize {
        self.releases.len()
    }

    /// Release every scoped resource, most recently acquired first.
    ///
    /// A panicking release is logged and does not prevent the others from running.
    pub async fn teardown(self) {
        let Self { entries, releases } = self;
        drop(entries);

        for (name, release) in releases.into_iter().rev() {
            match AssertUnwindSafe(release.release()).catch_unwind().await {
                Ok(()) => tracing::trace!(dependency = %name, "Released scoped dependency"),
                Err(_) => tracing::error!(dependency = %name, "Scoped dependency release panicked"),
            }
        }
    }
}

impl std::fmt::Debug for ResolutionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionCache")
            .field("entries", &self.entries.len())
            .field("pending_releases", &self.releases.len())
            .finish()
    }
}
