//! Expiring key/value cache.
//!
//! Holds the backend access token and the conversation-turn id. Entries evict
//! themselves after a TTL; re-setting a key supersedes the previous eviction
//! timer. The cache is the one piece of state shared across all tabs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Cache key for the backend access token (shared across all tabs).
pub const KEY_ACCESS_TOKEN: &str = "accessToken";

/// Cache key for the standing conversation-turn id. Rides the same TTL as the
/// token: conversation continuity lasts as long as the credential cache.
pub const KEY_CONVERSATION_ID: &str = "conversationId";

/// Default entry lifetime (matches the token TTL).
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 10);

struct Entry<V> {
    value: V,
    generation: u64,
}

/// In-memory expiring key/value store.
///
/// Each `set` schedules an eviction task for the entry's TTL; setting the same
/// key again bumps the entry's generation, so the earlier task fires as a
/// no-op instead of removing the newer value.
pub struct Cache<V> {
    default_ttl: Duration,
    generation: AtomicU64,
    inner: Arc<RwLock<HashMap<String, Entry<V>>>>,
}

impl<V: Clone + Send + Sync + 'static> Default for Cache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl<V: Clone + Send + Sync + 'static> Cache<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            generation: AtomicU64::new(0),
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Return the live value for `key`, if any.
    pub async fn get(&self, key: &str) -> Option<V> {
        self.inner.read().await.get(key).map(|e| e.value.clone())
    }

    /// Store `value` under `key` and schedule its eviction after `ttl`
    /// (default TTL when unspecified). Must be called from a runtime context.
    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        self.inner
            .write()
            .await
            .insert(key.clone(), Entry { value, generation });

        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let mut g = inner.write().await;
            if g.get(&key).map(|e| e.generation) == Some(generation) {
                g.remove(&key);
            }
        });
    }

    /// Remove `key` immediately (e.g. force-invalidating the access token).
    pub async fn invalidate(&self, key: &str) {
        self.inner.write().await.remove(key);
    }
}
