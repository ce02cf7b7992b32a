// src/core/kv/memory.rs

//! An in-memory `KvStore` double with real TTL expiry and offset-cursor
//! pagination. The primary fixture for unit and property tests.

use super::{KeyEntry, KvStore, ListOptions, ListPage, PutOptions};
use crate::core::errors::RefractError;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Bytes,
    metadata: Option<Value>,
    /// Epoch-millisecond deadline; `None` means the entry never expires.
    expires_at_ms: Option<i64>,
}

impl MemoryEntry {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|deadline| deadline <= now_ms)
    }
}

/// DashMap-backed store. Expiry is lazy: expired entries are dropped when a
/// read or list observes them, matching a TTL-driven remote store closely
/// enough for tests.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = now_ms();
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Force-expires a key, simulating the store's TTL sweep. Test hook.
    pub fn expire_now(&self, key: &str) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at_ms = Some(now_ms() - 1);
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, RefractError> {
        Ok(self.get_with_metadata(key).await?.0)
    }

    async fn get_with_metadata(
        &self,
        key: &str,
    ) -> Result<(Option<Bytes>, Option<Value>), RefractError> {
        let now = now_ms();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired(now) {
                drop(entry);
                self.entries.remove(key);
                return Ok((None, None));
            }
            return Ok((Some(entry.value.clone()), entry.metadata.clone()));
        }
        Ok((None, None))
    }

    async fn put(&self, key: &str, value: Bytes, opts: PutOptions) -> Result<(), RefractError> {
        let expires_at_ms = opts.ttl_seconds.map(|ttl| now_ms() + (ttl as i64) * 1000);
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                metadata: opts.metadata,
                expires_at_ms,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RefractError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn list(&self, opts: ListOptions) -> Result<ListPage, RefractError> {
        let now = now_ms();
        let mut names: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(&opts.prefix) && !entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();

        let offset: usize = opts
            .cursor
            .as_deref()
            .and_then(|c| c.parse().ok())
            .unwrap_or(0);
        let limit = if opts.limit == 0 { 1000 } else { opts.limit };

        let page: Vec<KeyEntry> = names
            .iter()
            .skip(offset)
            .take(limit)
            .map(|name| KeyEntry {
                name: name.clone(),
                metadata: self
                    .entries
                    .get(name)
                    .and_then(|entry| entry.metadata.clone()),
            })
            .collect();

        let consumed = offset + page.len();
        let complete = consumed >= names.len();
        Ok(ListPage {
            keys: page,
            cursor: (!complete).then(|| consumed.to_string()),
            complete,
        })
    }
}
