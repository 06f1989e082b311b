//! Two-level discovery cache (spec.md §4.1): TTL + ETag revalidation for
//! space metadata, TTL-only for tool schemas. Backed by `DashMap`, the same
//! concurrency primitive the teacher uses throughout `registry.rs` and
//! `backend/mod.rs` for lock-free concurrent reads.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::model::{SchemaEntry, SpaceMetadata, SpaceRef};

#[derive(Debug, Default)]
pub struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub etag_revalidations: AtomicU64,
}

impl CacheCounters {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.etag_revalidations.load(Ordering::Relaxed),
        )
    }
}

/// Metadata cache: TTL expiry on read, ETag-aware revalidation support.
pub struct MetadataCache {
    entries: DashMap<SpaceRef, SpaceMetadata>,
    ttl: Duration,
    pub counters: CacheCounters,
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            counters: CacheCounters::default(),
        }
    }

    /// Returns the entry iff it is still fresh (`now - fetched_at < ttl`).
    pub fn get(&self, r#ref: &SpaceRef) -> Option<SpaceMetadata> {
        let hit = self.entries.get(r#ref).and_then(|e| {
            if e.fetched_at.elapsed() < self.ttl {
                Some(e.clone())
            } else {
                None
            }
        });
        if hit.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// Returns the entry regardless of freshness — used to supply
    /// `If-None-Match` on revalidation.
    pub fn get_stale(&self, r#ref: &SpaceRef) -> Option<SpaceMetadata> {
        self.entries.get(r#ref).map(|e| e.clone())
    }

    /// Bumps `fetched_at` to now without replacing the value (304 path).
    pub fn touch(&self, r#ref: &SpaceRef) {
        if let Some(mut e) = self.entries.get_mut(r#ref) {
            e.fetched_at = Instant::now();
        }
        self.counters
            .etag_revalidations
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Unconditional replace, iff the value is not private.
    pub fn put(&self, r#ref: SpaceRef, value: SpaceMetadata) {
        if value.private {
            return;
        }
        self.entries.insert(r#ref, value);
    }
}

/// Schema cache: TTL-only, private spaces are never stored.
pub struct SchemaCache {
    entries: DashMap<SpaceRef, SchemaEntry>,
    ttl: Duration,
    pub counters: CacheCounters,
}

impl SchemaCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            counters: CacheCounters::default(),
        }
    }

    pub fn get(&self, r#ref: &SpaceRef) -> Option<SchemaEntry> {
        let hit = self.entries.get(r#ref).and_then(|e| {
            if e.fetched_at.elapsed() < self.ttl {
                Some(e.clone())
            } else {
                None
            }
        });
        if hit.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// Put, keyed by whether the owning space is private — callers must pass
    /// `private = false` for the write to take effect.
    pub fn put(&self, r#ref: SpaceRef, value: SchemaEntry, private: bool) {
        if private {
            return;
        }
        self.entries.insert(r#ref, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
