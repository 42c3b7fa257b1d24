//! Incremental analysis cache.
//!
//! # Architecture
//!
//! ```text
//!                 IncrementalCache
//!                        |
//!          +-------------+-------------+
//!          |                           |
//!          v                           v
//!   CacheStore (LRU + TTL)        CacheStats
//!   key -> CacheItem               (hits, misses)
//! ```
//!
//! One [`CacheItem`] per document identity. It holds the last merged result,
//! the occurrences it was collapsed from and the content it was computed
//! from, so the next version can be diffed and reconciled against it.
//!
//! # Lifecycle
//!
//! ```text
//! Empty ──store──▶ Populated ──refresh──▶ Populated
//!                      │
//!                      └── TTL elapsed / LRU eviction / clear ──▶ Empty
//! ```
//!
//! # Thread Safety
//!
//! The store sits behind a `tokio::sync::Mutex`, so one cache can serve many
//! sessions.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::CacheConfig;
use crate::diff::{diff, ContentChange};
use crate::merge::{AnalysisResult, MergedAnalysis};
use crate::term::AnalyzedTerm;
use crate::{Error, Result};

/// SHA-256 of a document version, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint `content`.
    ///
    /// ```rust
    /// use lexiq_pipeline::Fingerprint;
    ///
    /// let a = Fingerprint::of("hello");
    /// assert_eq!(a, Fingerprint::of("hello"));
    /// assert_ne!(a, Fingerprint::of("hello!"));
    /// assert_eq!(a.as_str().len(), 64);
    /// ```
    #[must_use]
    pub fn of(content: &str) -> Self {
        Self(hex::encode(Sha256::digest(content.as_bytes())))
    }

    /// The hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a cached document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Caller-chosen document id.
    pub document: String,
    /// Target language.
    pub language: String,
    /// Subject domain.
    pub domain: String,
}

impl CacheKey {
    /// A key for `document` analyzed for `language` in `domain`.
    #[must_use]
    pub fn new(
        document: impl Into<String>,
        language: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            document: document.into(),
            language: language.into(),
            domain: domain.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}/{}]", self.document, self.language, self.domain)
    }
}

/// A cached analysis with the content it describes.
#[derive(Debug, Clone)]
pub struct CacheItem {
    /// The merged result.
    pub value: AnalysisResult,
    /// Per-detection terms behind `value`.
    pub occurrences: Vec<AnalyzedTerm>,
    /// The analyzed content.
    pub content: String,
    /// Fingerprint of `content`.
    pub content_hash: Fingerprint,
    /// When the entry was first stored.
    pub created_at: Instant,
    /// When the entry was last written.
    pub timestamp: Instant,
    /// When the entry stops being served.
    pub expiry: Instant,
    /// Incremental refreshes since it was stored.
    pub refreshes: u32,
}

impl CacheItem {
    fn new(content: String, analysis: MergedAnalysis, now: Instant, ttl: Duration) -> Self {
        Self {
            content_hash: Fingerprint::of(&content),
            content,
            value: analysis.result,
            occurrences: analysis.occurrences,
            created_at: now,
            timestamp: now,
            expiry: now + ttl,
            refreshes: 0,
        }
    }

    /// The cached result with its occurrences.
    #[must_use]
    pub fn into_analysis(self) -> MergedAnalysis {
        MergedAnalysis {
            occurrences: self.occurrences,
            result: self.value,
        }
    }

    /// Whether the entry has outlived its TTL at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expiry
    }

    /// Whether `content` is the version this entry describes.
    #[must_use]
    pub fn matches(&self, content: &str) -> bool {
        self.content.len() == content.len() && self.content_hash == Fingerprint::of(content)
    }
}

/// Key-value storage with expiry and capacity eviction.
pub trait CacheStore: Send {
    /// A live entry for `key`; expired entries are dropped and not returned.
    fn get(&mut self, key: &CacheKey, now: Instant) -> Option<CacheItem>;

    /// Insert or replace; returns an entry evicted to make room.
    fn set(&mut self, key: CacheKey, item: CacheItem) -> Option<(CacheKey, CacheItem)>;

    /// Remove one entry.
    fn remove(&mut self, key: &CacheKey) -> Option<CacheItem>;

    /// Remove everything.
    fn clear(&mut self);

    /// Drop entries expired at `now`; returns how many.
    fn purge_expired(&mut self, now: Instant) -> usize;

    /// Entries held, expired or not.
    fn len(&self) -> usize;

    /// Whether the store holds nothing.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory LRU store.
#[derive(Debug)]
pub struct LruStore {
    entries: LruCache<CacheKey, CacheItem>,
}

impl LruStore {
    /// A store holding at most `capacity` documents.
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| Error::InvalidConfig("cache capacity must be at least 1".into()))?;
        Ok(Self {
            entries: LruCache::new(capacity),
        })
    }
}

impl CacheStore for LruStore {
    fn get(&mut self, key: &CacheKey, now: Instant) -> Option<CacheItem> {
        if self.entries.peek(key)?.is_expired(now) {
            self.entries.pop(key);
            return None;
        }
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: CacheKey, item: CacheItem) -> Option<(CacheKey, CacheItem)> {
        self.entries.push(key, item).filter(|(evicted, _)| {
            // `push` also returns the old value when replacing the same key.
            !self.entries.contains(evicted)
        })
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CacheItem> {
        self.entries.pop(key)
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, item)| item.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.entries.pop(key);
        }
        expired.len()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Hit and miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups that found a live entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
}

/// The last analysis per document, diffable against the next version.
#[derive(Debug)]
pub struct IncrementalCache<S = LruStore> {
    store: Mutex<S>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl IncrementalCache<LruStore> {
    /// An LRU-backed cache.
    pub fn with_capacity(capacity: usize, ttl: Duration) -> Result<Self> {
        Ok(Self::new(LruStore::new(capacity)?, ttl))
    }

    /// An LRU-backed cache sized by `config`.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        Self::with_capacity(config.capacity, config.ttl())
    }
}

impl<S: CacheStore> IncrementalCache<S> {
    /// A cache over `store` whose entries live for `ttl` after each write.
    pub fn new(store: S, ttl: Duration) -> Self {
        Self {
            store: Mutex::new(store),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The live entry for `key`, or [`Error::CacheMiss`].
    pub async fn lookup(&self, key: &CacheKey) -> Result<CacheItem> {
        let item = self.store.lock().await.get(key, Instant::now());
        match item {
            Some(item) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(item)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(%key, "cache miss");
                Err(Error::CacheMiss)
            }
        }
    }

    /// Diff `new_content` against the cached version.
    pub async fn diff(&self, key: &CacheKey, new_content: &str) -> Result<(CacheItem, ContentChange)> {
        let item = self.lookup(key).await?;
        let change = if item.matches(new_content) {
            ContentChange::unchanged(new_content.len())
        } else {
            diff(new_content, &item.content)
        };
        Ok((item, change))
    }

    /// Store the result of a full analysis, replacing any entry.
    pub async fn store(&self, key: CacheKey, content: &str, analysis: MergedAnalysis) {
        let item = CacheItem::new(content.to_string(), analysis, Instant::now(), self.ttl);
        let evicted = self.store.lock().await.set(key, item);
        if let Some((evicted, _)) = evicted {
            debug!(key = %evicted, "evicted least recently used entry");
        }
    }

    /// Update an entry after incremental re-analysis.
    ///
    /// Keeps the entry's creation time and counts the refresh; stores a new
    /// entry if the old one is gone.
    pub async fn refresh(&self, key: CacheKey, content: &str, analysis: MergedAnalysis) {
        let now = Instant::now();
        let mut store = self.store.lock().await;
        let item = CacheItem::new(content.to_string(), analysis, now, self.ttl);
        let item = match store.get(&key, now) {
            Some(previous) => CacheItem {
                created_at: previous.created_at,
                refreshes: previous.refreshes.saturating_add(1),
                ..item
            },
            None => item,
        };
        store.set(key, item);
    }

    /// Drop the entry for `key`; returns whether one existed.
    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        self.store.lock().await.remove(key).is_some()
    }

    /// Drop everything.
    pub async fn clear(&self) {
        self.store.lock().await.clear();
    }

    /// Drop expired entries; returns how many.
    pub async fn purge_expired(&self) -> usize {
        let purged = self.store.lock().await.purge_expired(Instant::now());
        if purged > 0 {
            debug!(purged, "expired cache entries removed");
        }
        purged
    }

    /// Entries held.
    pub async fn len(&self) -> usize {
        self.store.lock().await.len()
    }

    /// Whether nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.store.lock().await.is_empty()
    }

    /// Hit and miss counters so far.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
