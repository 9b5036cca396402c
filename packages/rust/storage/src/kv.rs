//! Key-value capability and the process-local backend.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sitemind_shared::{Result, SitemindError};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Flat keyspace of string values plus insertion-ordered sets.
///
/// Values may carry a TTL; expired values are invisible to every read.
/// Ordered sets never expire.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Overwrite `key`, replacing any previous TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Write `key` only if it holds no live value. Returns whether it was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>)
    -> Result<bool>;

    /// Remove a value or ordered set. Returns whether anything was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Append `member` to the ordered set unless already present.
    /// Existing members keep their original position.
    async fn zadd_if_absent(&self, key: &str, member: &str) -> Result<bool>;

    /// Members in insertion order, or newest first when `reverse`.
    async fn zrange(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
        reverse: bool,
    ) -> Result<Vec<String>>;

    async fn zcard(&self, key: &str) -> Result<usize>;

    /// Every live key (values and sets) starting with `prefix`. Scans the whole keyspace.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Release the backend. Later calls fail.
    async fn close(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// MemoryKv
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default)]
struct OrderedSet {
    members: Vec<String>,
    index: HashSet<String>,
}

#[derive(Debug, Default)]
struct Inner {
    values: HashMap<String, Entry>,
    sets: HashMap<String, OrderedSet>,
}

impl Inner {
    /// Drop `key` if it has expired, so the caller sees a clean slot.
    fn evict_expired(&mut self, key: &str, now: Instant) {
        if self.values.get(key).is_some_and(|e| !e.is_live(now)) {
            self.values.remove(key);
        }
    }
}

/// Process-local store. Expiry is checked lazily on access.
#[derive(Debug, Default)]
pub struct MemoryKv {
    inner: Mutex<Inner>,
    closed: AtomicBool,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SitemindError::Storage("store is closed".into()));
        }
        Ok(())
    }
}

fn deadline(ttl: Option<Duration>) -> Option<Instant> {
    ttl.map(|ttl| Instant::now() + ttl)
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.ensure_open()?;
        let mut inner = self.inner.lock().await;
        inner.evict_expired(key, Instant::now());
        Ok(inner.values.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.ensure_open()?;
        self.inner.lock().await.values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: deadline(ttl),
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        self.ensure_open()?;
        let mut inner = self.inner.lock().await;
        inner.evict_expired(key, Instant::now());
        if inner.values.contains_key(key) {
            return Ok(false);
        }
        inner.values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: deadline(ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        let mut inner = self.inner.lock().await;
        let value = inner.values.remove(key).is_some();
        let set = inner.sets.remove(key).is_some();
        Ok(value || set)
    }

    async fn zadd_if_absent(&self, key: &str, member: &str) -> Result<bool> {
        self.ensure_open()?;
        let mut inner = self.inner.lock().await;
        let set = inner.sets.entry(key.to_string()).or_default();
        if !set.index.insert(member.to_string()) {
            return Ok(false);
        }
        set.members.push(member.to_string());
        Ok(true)
    }

    async fn zrange(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
        reverse: bool,
    ) -> Result<Vec<String>> {
        self.ensure_open()?;
        let inner = self.inner.lock().await;
        let Some(set) = inner.sets.get(key) else {
            return Ok(Vec::new());
        };
        let members: Vec<String> = if reverse {
            set.members.iter().rev().skip(offset).take(limit).cloned().collect()
        } else {
            set.members.iter().skip(offset).take(limit).cloned().collect()
        };
        Ok(members)
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        self.ensure_open()?;
        Ok(self
            .inner
            .lock()
            .await
            .sets
            .get(key)
            .map_or(0, |s| s.members.len()))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.ensure_open()?;
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.values.retain(|_, e| e.is_live(now));

        let mut keys: Vec<String> = inner
            .values
            .keys()
            .chain(inner.sets.keys())
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn values_expire() {
        let kv = MemoryKv::new();
        kv.set("a", "1", Some(Duration::from_secs(10))).await.unwrap();
        kv.set("b", "2", None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("1"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(kv.get("a").await.unwrap().is_none());
        assert_eq!(kv.get("b").await.unwrap().as_deref(), Some("2"));
        assert_eq!(kv.scan_prefix("").await.unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn set_if_absent_respects_expiry() {
        let kv = MemoryKv::new();
        let ttl = Some(Duration::from_secs(5));
        assert!(kv.set_if_absent("lock", "x", ttl).await.unwrap());
        assert!(!kv.set_if_absent("lock", "y", ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(kv.set_if_absent("lock", "z", ttl).await.unwrap());
        assert_eq!(kv.get("lock").await.unwrap().as_deref(), Some("z"));
    }

    #[tokio::test]
    async fn ordered_set_keeps_first_position() {
        let kv = MemoryKv::new();
        for m in ["a", "b", "c"] {
            assert!(kv.zadd_if_absent("s", m).await.unwrap());
        }
        assert!(!kv.zadd_if_absent("s", "a").await.unwrap());

        assert_eq!(kv.zcard("s").await.unwrap(), 3);
        assert_eq!(kv.zrange("s", 0, 10, false).await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(kv.zrange("s", 1, 1, false).await.unwrap(), vec!["b"]);
        assert_eq!(kv.zrange("s", 0, 2, true).await.unwrap(), vec!["c", "b"]);
    }

    #[tokio::test]
    async fn closed_store_rejects_calls() {
        let kv = MemoryKv::new();
        kv.close().await.unwrap();
        assert!(matches!(kv.get("a").await, Err(SitemindError::Storage(_))));
    }
}
