//! Storage seam every one of the queue/progress/heartbeat/fan-in modules is built against
//! (SPEC_FULL §3.8/C12). The only implementation shipped here is in-process; a networked
//! backend is a drop-in implementor of the same trait.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::Result;

#[derive(Debug, Clone)]
enum Entry {
    Str(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    Counter(i64),
}

#[derive(Debug, Clone)]
struct Record {
    entry: Entry,
    expires_at: Option<DateTime<Utc>>,
}

/// Atomic string/hash/set storage with TTL, the subset of a Redis-shaped contract this crate
/// actually exercises (SPEC_FULL §4.7 "KV store").
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn set_ex(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn del(&self, keys: &[&str]) -> Result<()>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;
    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>>;
    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    async fn sadd(&self, key: &str, members: &[String]) -> Result<()>;
    async fn smembers(&self, key: &str) -> Result<HashSet<String>>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Atomic decrement, returning the post-decrement value. The zero-crossing primitive
    /// fan-in is built on.
    async fn decr(&self, key: &str) -> Result<i64>;
    async fn set_counter(&self, key: &str, value: i64) -> Result<()>;
}

/// A single `tokio::sync::Mutex` over a `HashMap<String, Record>` so every trait method above
/// is trivially atomic (SPEC_FULL §3.8) — one acquire-validate-mutate-release critical section
/// per call, the same discipline as the teacher's `AtomicTaskStateManager`, just over one map
/// instead of the teacher's several.
#[derive(Default)]
pub struct InMemoryKvStore {
    entries: Mutex<HashMap<String, Record>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(record: &Record) -> bool {
        match record.expires_at {
            Some(at) => at > Utc::now(),
            None => true,
        }
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn set_ex(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|d| Utc::now() + chrono::Duration::from_std(d).unwrap());
        let mut guard = self.entries.lock().await;
        guard.insert(
            key.to_string(),
            Record {
                entry: Entry::Str(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let guard = self.entries.lock().await;
        Ok(guard
            .get(key)
            .filter(|r| Self::is_live(r))
            .and_then(|r| match &r.entry {
                Entry::Str(v) => Some(v.clone()),
                _ => None,
            }))
    }

    async fn del(&self, keys: &[&str]) -> Result<()> {
        let mut guard = self.entries.lock().await;
        for key in keys {
            guard.remove(*key);
        }
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut guard = self.entries.lock().await;
        let record = guard.entry(key.to_string()).or_insert_with(|| Record {
            entry: Entry::Hash(HashMap::new()),
            expires_at: None,
        });
        if !matches!(record.entry, Entry::Hash(_)) {
            record.entry = Entry::Hash(HashMap::new());
        }
        let Entry::Hash(fields) = &mut record.entry else {
            unreachable!()
        };
        fields.insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let guard = self.entries.lock().await;
        Ok(guard
            .get(key)
            .filter(|r| Self::is_live(r))
            .and_then(|r| match &r.entry {
                Entry::Hash(fields) => Some(fields.clone()),
                _ => None,
            })
            .unwrap_or_default())
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut guard = self.entries.lock().await;
        let record = guard.entry(key.to_string()).or_insert_with(|| Record {
            entry: Entry::Hash(HashMap::new()),
            expires_at: None,
        });
        if !matches!(record.entry, Entry::Hash(_)) {
            record.entry = Entry::Hash(HashMap::new());
        }
        let Entry::Hash(fields) = &mut record.entry else {
            unreachable!()
        };
        let current: i64 = fields.get(field).and_then(|v| v.parse().ok()).unwrap_or(0);
        let next = current + delta;
        fields.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<()> {
        let mut guard = self.entries.lock().await;
        let record = guard.entry(key.to_string()).or_insert_with(|| Record {
            entry: Entry::Set(HashSet::new()),
            expires_at: None,
        });
        if !matches!(record.entry, Entry::Set(_)) {
            record.entry = Entry::Set(HashSet::new());
        }
        let Entry::Set(set) = &mut record.entry else {
            unreachable!()
        };
        set.extend(members.iter().cloned());
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<HashSet<String>> {
        let guard = self.entries.lock().await;
        Ok(guard
            .get(key)
            .filter(|r| Self::is_live(r))
            .and_then(|r| match &r.entry {
                Entry::Set(members) => Some(members.clone()),
                _ => None,
            })
            .unwrap_or_default())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut guard = self.entries.lock().await;
        if let Some(record) = guard.get_mut(key) {
            record.expires_at = Some(Utc::now() + chrono::Duration::from_std(ttl).unwrap());
        }
        Ok(())
    }

    async fn decr(&self, key: &str) -> Result<i64> {
        let mut guard = self.entries.lock().await;
        let record = guard.entry(key.to_string()).or_insert_with(|| Record {
            entry: Entry::Counter(0),
            expires_at: None,
        });
        if !matches!(record.entry, Entry::Counter(_)) {
            record.entry = Entry::Counter(0);
        }
        let Entry::Counter(value) = &mut record.entry else {
            unreachable!()
        };
        *value -= 1;
        Ok(*value)
    }

    async fn set_counter(&self, key: &str, value: i64) -> Result<()> {
        let mut guard = self.entries.lock().await;
        guard.insert(
            key.to_string(),
            Record {
                entry: Entry::Counter(value),
                expires_at: None,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_and_get_roundtrip() {
        let store = InMemoryKvStore::new();
        store.set_ex("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn set_ex_expires() {
        let store = InMemoryKvStore::new();
        store
            .set_ex("k", "v", Some(Duration::from_millis(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn hincr_by_accumulates() {
        let store = InMemoryKvStore::new();
        assert_eq!(store.hincr_by("h", "done", 1).await.unwrap(), 1);
        assert_eq!(store.hincr_by("h", "done", 1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn decr_crosses_zero_exactly_once() {
        let store = InMemoryKvStore::new();
        store.set_counter("pending", 2).await.unwrap();
        assert_eq!(store.decr("pending").await.unwrap(), 1);
        assert_eq!(store.decr("pending").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sadd_and_smembers() {
        let store = InMemoryKvStore::new();
        store
            .sadd("s", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        let members = store.smembers("s").await.unwrap();
        assert!(members.contains("a") && members.contains("b"));
    }

    #[tokio::test]
    async fn del_clears_regardless_of_entry_kind() {
        let store = InMemoryKvStore::new();
        store.set_ex("k1", "v", None).await.unwrap();
        store.hset("k2", "f", "v").await.unwrap();
        store.sadd("k3", &["a".to_string()]).await.unwrap();
        store.del(&["k1", "k2", "k3"]).await.unwrap();
        assert_eq!(store.get("k1").await.unwrap(), None);
        assert!(store.hget_all("k2").await.unwrap().is_empty());
        assert!(store.smembers("k3").await.unwrap().is_empty());
    }
}
