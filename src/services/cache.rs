//! In-memory cache of fetched tables, keyed by a fetch fingerprint.
//!
//! Entries expire lazily: a stale entry is dropped on the `get` that finds it.
//! Shared as `Arc<ReconciliationCache>`; two tasks racing to fill the same
//! key just overwrite each other with equivalent data.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::services::sources::{Category, FetchParams, TabularResult};

/// Shared cache handle.
pub type SharedCache = Arc<ReconciliationCache>;

/// Deterministic key for one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Hash of category, source kind, sorted entities, resolved date range
    /// and source extras. Entity order does not matter.
    pub fn new(category: Category, kind: &str, params: &FetchParams, extras: &str) -> Self {
        let mut entities: Vec<&str> = params.entities.iter().map(String::as_str).collect();
        entities.sort_unstable();
        entities.dedup();
        let (start, end) = params.date_range();

        let canonical = format!(
            "{}|{}|{}|{}|{}|{}",
            category.as_str(),
            kind,
            entities.join(","),
            start,
            end,
            extras
        );
        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);
        Fingerprint(hasher.finish())
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
struct Entry {
    stored_at: Instant,
    result: TabularResult,
}

#[derive(Debug)]
pub struct ReconciliationCache {
    ttl: Duration,
    entries: RwLock<HashMap<Fingerprint, Entry>>,
}

impl ReconciliationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn shared(ttl: Duration) -> SharedCache {
        Arc::new(Self::new(ttl))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// A copy of the entry if it is younger than the TTL.
    ///
    /// Reading an expired entry evicts it; `put` overwrites whatever is there.
    pub async fn get(&self, key: &Fingerprint) -> Option<TabularResult> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return None,
                Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                    return Some(entry.result.clone())
                }
                Some(_) => {}
            }
        }

        // Expired: drop it unless someone refreshed it meanwhile
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key) {
            if entry.stored_at.elapsed() >= self.ttl {
                entries.remove(key);
                tracing::debug!("Cache entry {:016x} expired", key.value());
            } else {
                return Some(entry.result.clone());
            }
        }
        None
    }

    pub async fn put(&self, key: Fingerprint, result: TabularResult) {
        let entry = Entry {
            stored_at: Instant::now(),
            result,
        };
        self.entries.write().await.insert(key, entry);
    }

    /// Number of stored entries, including expired ones not yet read.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}
