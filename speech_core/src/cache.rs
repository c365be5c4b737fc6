//! Two-tier response cache: a bounded in-process LRU in front of a remote
//! store with renewable expiry.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use lru::LruCache;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{StreamConfig, SynthesisSettings};
use crate::error::{TtsError, TtsResult};

/// A cached value
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Bytes(Bytes),
    Text(String),
    Integer(i64),
    Float(f64),
    /// Kept in the local tier only
    Structured(serde_json::Value),
}

impl CacheValue {
    /// Whether the remote tier accepts this value
    pub fn is_remote_storable(&self) -> bool {
        !matches!(self, CacheValue::Structured(_))
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            CacheValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl From<Bytes> for CacheValue {
    fn from(bytes: Bytes) -> Self {
        CacheValue::Bytes(bytes)
    }
}

impl From<String> for CacheValue {
    fn from(text: String) -> Self {
        CacheValue::Text(text)
    }
}

/// Durable key-value tier with per-key expiry
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read a value and push its expiry out to `ttl` from now
    async fn get_with_expiry(&self, key: &str, ttl: Duration) -> TtsResult<Option<CacheValue>>;

    /// Push a key's expiry out to `ttl` from now; false if the key is gone
    async fn renew(&self, key: &str, ttl: Duration) -> TtsResult<bool>;

    async fn set_with_expiry(&self, key: &str, value: CacheValue, ttl: Duration) -> TtsResult<()>;
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: CacheValue,
    expires_at: Instant,
}

/// Process-local [`RemoteStore`] with real expiry.
///
/// Expiry uses the tokio clock, so paused-time tests can advance past a TTL.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: DashMap<String, StoredValue>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.purge_expired();
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .get(key)
            .map(|entry| entry.expires_at > now)
            .unwrap_or(false)
    }

    fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    fn drop_if_expired(&self, key: &str, now: Instant) {
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn get_with_expiry(&self, key: &str, ttl: Duration) -> TtsResult<Option<CacheValue>> {
        let now = Instant::now();
        self.drop_if_expired(key, now);
        Ok(self.entries.get_mut(key).map(|mut entry| {
            entry.expires_at = now + ttl;
            entry.value.clone()
        }))
    }

    async fn renew(&self, key: &str, ttl: Duration) -> TtsResult<bool> {
        let now = Instant::now();
        self.drop_if_expired(key, now);
        Ok(match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = now + ttl;
                true
            }
            None => false,
        })
    }

    async fn set_with_expiry(&self, key: &str, value: CacheValue, ttl: Duration) -> TtsResult<()> {
        // Expired blobs are only otherwise dropped when their own key is read
        self.purge_expired();
        self.entries.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}

/// Deterministic cache key for a synthesis request
pub fn fingerprint(text: &str, settings: &SynthesisSettings, namespace: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update([0u8]);
    hasher.update(settings.sampling_rate().to_le_bytes());
    hasher.update(settings.audio_encoding().as_str().as_bytes());
    hasher.update([settings.should_encode_as_wav() as u8, 0u8]);
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// LRU front with a remote back tier.
///
/// The local tier is shared by every request using this cache and all
/// access to it goes through one mutex.
pub struct ResponseCache {
    local: Mutex<LruCache<String, CacheValue>>,
    remote: Arc<dyn RemoteStore>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(capacity: usize, remote: Arc<dyn RemoteStore>, ttl: Duration) -> TtsResult<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            TtsError::InvalidSettings("Cache capacity must be greater than zero".to_string())
        })?;
        Ok(Self {
            local: Mutex::new(LruCache::new(capacity)),
            remote,
            ttl,
        })
    }

    /// Cache backed by a fresh [`InMemoryStore`]
    pub fn in_memory(capacity: usize, ttl: Duration) -> TtsResult<Self> {
        Self::new(capacity, Arc::new(InMemoryStore::new()), ttl)
    }

    pub fn from_config(config: &StreamConfig, remote: Arc<dyn RemoteStore>) -> TtsResult<Self> {
        Self::new(config.cache_capacity, remote, config.cache_ttl())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look a key up, local tier first.
    ///
    /// A local hit renews the remote expiry in the background and never
    /// waits on the remote tier. Remote failures read as a miss.
    pub async fn get(&self, key: &str) -> Option<CacheValue> {
        let local_hit = self.local.lock().await.get(key).cloned();
        if let Some(value) = local_hit {
            debug!(key = %key, "Response cache hit (local)");
            self.renew_in_background(key);
            return Some(value);
        }

        match self.remote.get_with_expiry(key, self.ttl).await {
            Ok(Some(value)) => {
                debug!(key = %key, "Response cache hit (remote)");
                self.local.lock().await.put(key.to_string(), value.clone());
                Some(value)
            }
            Ok(None) => {
                debug!(key = %key, "Response cache miss");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Remote cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store a value locally and, when its kind allows, remotely
    pub async fn set(&self, key: &str, value: CacheValue) {
        let remote_value = value.is_remote_storable().then(|| value.clone());
        self.local.lock().await.put(key.to_string(), value);

        if let Some(remote_value) = remote_value {
            if let Err(e) = self.remote.set_with_expiry(key, remote_value, self.ttl).await {
                warn!(key = %key, error = %e, "Remote cache write failed, keeping local copy only");
            }
        }
    }

    pub async fn contains_local(&self, key: &str) -> bool {
        self.local.lock().await.contains(key)
    }

    pub async fn local_len(&self) -> usize {
        self.local.lock().await.len()
    }

    fn renew_in_background(&self, key: &str) {
        let remote = Arc::clone(&self.remote);
        let key = key.to_string();
        let ttl = self.ttl;
        tokio::spawn(async move {
            if let Err(e) = remote.renew(&key, ttl).await {
                debug!(key = %key, error = %e, "Remote TTL renewal failed");
            }
        });
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
