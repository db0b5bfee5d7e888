//! Fingerprint-keyed memoization of LLM responses.
//!
//! A fingerprint is the SHA-256 of everything that shapes the output:
//! prompt, task type, and sampling parameters. Identical fingerprints must
//! yield the stored response until expiry or eviction. The cache is
//! best-effort end to end: nothing here returns an error to the caller, and
//! a full or disabled cache simply means more provider calls.

use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use super::router::TaskType;

/// Chapter prose is the most expensive output; it stays cached longer.
const CHAPTER_TTL: Duration = Duration::from_secs(4 * 3600);

struct CacheEntry {
    value: String,
    expires_at: Instant,
    last_access: u64,
}

struct CacheInner {
    entries: FxHashMap<String, CacheEntry>,
    access_counter: u64,
}

/// In-memory response cache with per-task TTLs and LRU eviction.
pub struct RequestCache {
    inner: Mutex<CacheInner>,
    default_ttl: Duration,
    capacity: Option<usize>,
    enabled: bool,
}

impl RequestCache {
    /// A cache with the given default TTL and optional entry cap.
    #[must_use]
    pub fn new(enabled: bool, default_ttl: Duration, capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: FxHashMap::default(),
                access_counter: 0,
            }),
            default_ttl,
            capacity,
            enabled,
        }
    }

    /// Deterministic cache key for a request's identity.
    #[must_use]
    pub fn fingerprint(
        prompt: &str,
        task: TaskType,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        hasher.update([0]);
        hasher.update(task.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(format!("{max_tokens:?}").as_bytes());
        hasher.update([0]);
        hasher.update(format!("{temperature:?}").as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    fn ttl_for(&self, task: TaskType) -> Duration {
        match task {
            TaskType::ChapterGeneration => CHAPTER_TTL.max(self.default_ttl),
            _ => self.default_ttl,
        }
    }

    /// Look up a fingerprint. Expired entries are dropped on read.
    #[must_use]
    pub fn get(&self, fingerprint: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let mut inner = self.inner.lock();
        inner.access_counter += 1;
        let counter = inner.access_counter;
        match inner.entries.get_mut(fingerprint) {
            Some(entry) if entry.expires_at > Instant::now() => {
                entry.last_access = counter;
                Some(entry.value.clone())
            }
            Some(_) => {
                inner.entries.remove(fingerprint);
                None
            }
            None => None,
        }
    }

    /// Store a response under its fingerprint, evicting the least recently
    /// used entry when over capacity.
    pub fn set(&self, fingerprint: String, value: String, task: TaskType) {
        if !self.enabled {
            return;
        }
        let ttl = self.ttl_for(task);
        let mut inner = self.inner.lock();
        inner.access_counter += 1;
        let counter = inner.access_counter;
        inner.entries.insert(
            fingerprint,
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
                last_access: counter,
            },
        );
        if let Some(capacity) = self.capacity {
            while inner.entries.len() > capacity {
                let Some(oldest) = inner
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.last_access)
                    .map(|(k, _)| k.clone())
                else {
                    break;
                };
                inner.entries.remove(&oldest);
            }
        }
    }

    /// Number of live entries (expired ones may still be counted until
    /// their next read).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
