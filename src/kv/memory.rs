//! In-memory key-value store.
//!
//! Single-process stand-in for the Redis store, used by the test suite and
//! handy for embedding. Expiry is lazy: entries are dropped when touched past
//! their deadline. All operations run under one short-lived mutex, so `take`
//! keeps the same exactly-once guarantee as `GETDEL`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{KeyValueStore, StoreError};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("kv lock poisoned");
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().expect("kv lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.live() => Ok(true),
            Some(_) => {
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().expect("kv lock poisoned");
        match entries.remove(key) {
            Some(entry) if entry.live() => Ok(Some(entry.value)),
            _ => Ok(None),
        }
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let mut entries = self.entries.lock().expect("kv lock poisoned");
        match entries.get_mut(key) {
            Some(entry) if entry.live() => {
                let count = entry.value.parse::<i64>().unwrap_or(0) + 1;
                entry.value = count.to_string();
                Ok(count)
            }
            _ => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("kv lock poisoned");
        if let Some(entry) = entries.get_mut(key) {
            if entry.live() {
                entry.expires_at = Some(Instant::now() + ttl);
            }
        }
        Ok(())
    }

    async fn time_to_live(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let entries = self.entries.lock().expect("kv lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.live() => Ok(entry
                .expires_at
                .and_then(|at| at.checked_duration_since(Instant::now()))),
            _ => Ok(None),
        }
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock().expect("kv lock poisoned");
        let matching: Vec<String> = entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        let mut removed = 0;
        for key in matching {
            if entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Minimal glob matcher: `*` matches any run of characters. This covers the
/// crate's key namespaces; it is not a general glob implementation.
fn glob_match(pattern: &str, key: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == key;
    }
    let segments: Vec<&str> = pattern.split('*').collect();
    let mut rest = key;
    for (index, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if index == 0 {
            match rest.strip_prefix(segment) {
                Some(stripped) => rest = stripped,
                None => return false,
            }
        } else if index == segments.len() - 1 {
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(position) => rest = &rest[position + segment.len()..],
                None => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_and_exists_respect_ttl() {
        let kv = MemoryKv::new();
        kv.set_with_ttl("blocked:u1", "1", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(kv.exists("blocked:u1").await.unwrap());

        kv.set_with_ttl("blocked:u2", "1", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!kv.exists("blocked:u2").await.unwrap());
    }

    #[tokio::test]
    async fn take_is_exactly_once() {
        let kv = MemoryKv::new();
        kv.set_with_ttl("refresh:u1:j1", "u1", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            kv.take("refresh:u1:j1").await.unwrap(),
            Some("u1".to_string())
        );
        assert_eq!(kv.take("refresh:u1:j1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn take_ignores_expired_entries() {
        let kv = MemoryKv::new();
        kv.set_with_ttl("refresh:u1:j1", "u1", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(kv.take("refresh:u1:j1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn increment_counts_and_resets_after_expiry() {
        let kv = MemoryKv::new();
        assert_eq!(kv.increment("ratelimit:ip:1.1.1.1").await.unwrap(), 1);
        assert_eq!(kv.increment("ratelimit:ip:1.1.1.1").await.unwrap(), 2);

        kv.expire("ratelimit:ip:1.1.1.1", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(kv.increment("ratelimit:ip:1.1.1.1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn increment_keeps_the_window_ttl() {
        let kv = MemoryKv::new();
        kv.increment("ratelimit:ip:1.1.1.1").await.unwrap();
        kv.expire("ratelimit:ip:1.1.1.1", Duration::from_secs(60))
            .await
            .unwrap();
        kv.increment("ratelimit:ip:1.1.1.1").await.unwrap();
        let remaining = kv.time_to_live("ratelimit:ip:1.1.1.1").await.unwrap();
        assert!(remaining.is_some());
        assert!(remaining.unwrap() <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn delete_matching_removes_a_family() {
        let kv = MemoryKv::new();
        kv.set_with_ttl("refresh:u1:j1", "u1", Duration::from_secs(60))
            .await
            .unwrap();
        kv.set_with_ttl("refresh:u1:j2", "u1", Duration::from_secs(60))
            .await
            .unwrap();
        kv.set_with_ttl("refresh:u2:j3", "u2", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(kv.delete_matching("refresh:u1:*").await.unwrap(), 2);
        assert!(!kv.exists("refresh:u1:j1").await.unwrap());
        assert!(kv.exists("refresh:u2:j3").await.unwrap());
    }

    #[test]
    fn glob_match_covers_the_namespaces() {
        assert!(glob_match("refresh:u1:*", "refresh:u1:abc"));
        assert!(!glob_match("refresh:u1:*", "refresh:u2:abc"));
        assert!(glob_match("blacklist:j1", "blacklist:j1"));
        assert!(!glob_match("blacklist:j1", "blacklist:j2"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a*c", "abc"));
        assert!(!glob_match("a*c", "abd"));
    }
}
