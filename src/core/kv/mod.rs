// src/core/kv/mod.rs

//! The KV store adapter: a thin capability abstraction over the remote
//! key-value substrate.
//!
//! The rest of the crate sees only the [`KvStore`] trait. The substrate is
//! assumed to give read-your-writes within one logical client, eventually
//! consistent listing, a few kilobytes of metadata per key, store-driven TTL
//! expiration, and no multi-key transactions.

mod faulty;
mod memory;
mod rest;

pub use faulty::FaultInjectingKvStore;
pub use memory::MemoryKvStore;
pub use rest::RestKvStore;

use crate::core::errors::RefractError;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Options for a single `put`.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Small JSON metadata stored alongside the value and returned by `list`.
    pub metadata: Option<Value>,
    /// Store-enforced expiration, in seconds from now.
    pub ttl_seconds: Option<u64>,
}

/// Options for a paginated `list`.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub prefix: String,
    pub cursor: Option<String>,
    pub limit: usize,
}

/// A single key returned by `list`, with its metadata when present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// One page of a `list` result.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ListPage {
    pub keys: Vec<KeyEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub complete: bool,
}

/// The five-operation capability contract every KV implementation satisfies.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Reads a value. Expired or absent keys yield `None`.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, RefractError>;

    /// Reads a value together with its stored metadata.
    async fn get_with_metadata(
        &self,
        key: &str,
    ) -> Result<(Option<Bytes>, Option<Value>), RefractError>;

    /// Writes a value, replacing any existing entry under the key.
    async fn put(&self, key: &str, value: Bytes, opts: PutOptions) -> Result<(), RefractError>;

    /// Deletes a key. Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<(), RefractError>;

    /// Lists keys under a prefix, one page at a time.
    async fn list(&self, opts: ListOptions) -> Result<ListPage, RefractError>;
}
