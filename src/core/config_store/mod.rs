// src/core/config_store/mod.rs

//! The versioned configuration store: an append-only history of immutable
//! snapshots in the KV substrate, with a single activation pointer.
//!
//! KV layout: `current` holds the active version id as text, `config_v<N>`
//! holds the snapshot JSON for version `v<N>`, and `config_history` holds
//! the ordered list of version metadata (most recently appended last).
//!
//! The store offers no transactions, so `store` writes in the order
//! snapshot → history → pointer: a crash between steps can leave history
//! lagging, but `current` never references a snapshot that was not fully
//! written.

use crate::core::errors::RefractError;
use crate::core::kv::{KvStore, PutOptions};
use crate::core::paths::{diff_paths, flatten};
use crate::core::schema;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, error};

/// Key holding the active version id.
pub const CURRENT_POINTER_KEY: &str = "current";
/// Key holding the ordered version history.
pub const HISTORY_KEY: &str = "config_history";

/// KV key for a snapshot, e.g. `config_v3` for version `v3`.
pub fn version_key(id: &str) -> String {
    format!("config_{id}")
}

/// Snapshot-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    pub version: String,
    pub last_updated: String,
    pub active_modules: Vec<String>,
}

/// Per-module metadata: identity, schema, defaults, and dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleMeta {
    pub name: String,
    pub version: String,
    pub description: String,
    pub schema: Value,
    pub defaults: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_dependencies: Option<Vec<String>>,
}

/// A named, independently-validated sub-document within a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigModule {
    #[serde(rename = "_meta")]
    pub meta: ModuleMeta,
    pub config: Value,
}

/// An immutable configuration snapshot. Never mutated once stored; only the
/// activation pointer and the history list change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    #[serde(rename = "_meta")]
    pub meta: SnapshotMeta,
    pub modules: IndexMap<String, ConfigModule>,
}

impl ConfigSnapshot {
    /// A snapshot with no modules, used as the base for first registration.
    pub fn empty() -> Self {
        Self {
            meta: SnapshotMeta {
                version: String::new(),
                last_updated: String::new(),
                active_modules: Vec::new(),
            },
            modules: IndexMap::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Metadata describing one stored version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub id: String,
    pub timestamp: String,
    pub author: String,
    pub comment: String,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub modules: Vec<String>,
    pub changes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Caller-supplied annotation for a `store` operation.
#[derive(Debug, Clone, Default)]
pub struct CommitMeta {
    pub author: String,
    pub comment: String,
    pub modules: Vec<String>,
    pub tags: Option<Vec<String>>,
}

/// One page of version history.
#[derive(Debug, Clone, Serialize)]
pub struct VersionPage {
    pub versions: Vec<VersionMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub complete: bool,
}

/// The change-set partitions between two versions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VersionDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
    pub unchanged: Vec<String>,
}

pub struct ConfigVersionStore {
    kv: Arc<dyn KvStore>,
    /// Last snapshot read, keyed by version id. Serves repeat reads while
    /// the pointer is unchanged.
    cached: Mutex<Option<(String, Arc<ConfigSnapshot>)>>,
}

impl ConfigVersionStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            cached: Mutex::new(None),
        }
    }

    /// Reads the active snapshot. The pointer is consulted on every call;
    /// the cached copy is used only while its version still matches.
    pub async fn get_current(&self) -> Result<Option<Arc<ConfigSnapshot>>, RefractError> {
        let Some(pointer) = self.kv.get(CURRENT_POINTER_KEY).await? else {
            return Ok(None);
        };
        let id = String::from_utf8(pointer.to_vec())?;

        if let Some((cached_id, snapshot)) = self.cached.lock().as_ref()
            && *cached_id == id
        {
            return Ok(Some(Arc::clone(snapshot)));
        }

        match self.get_version(&id).await? {
            Some(snapshot) => {
                let snapshot = Arc::new(snapshot);
                *self.cached.lock() = Some((id, Arc::clone(&snapshot)));
                Ok(Some(snapshot))
            }
            None => {
                error!(%id, "current pointer references a missing snapshot");
                Ok(None)
            }
        }
    }

    /// Reads one snapshot by version id. Falls back from the typed parse to
    /// a raw-text parse for snapshots written by older producers.
    pub async fn get_version(&self, id: &str) -> Result<Option<ConfigSnapshot>, RefractError> {
        let Some(bytes) = self.kv.get(&version_key(id)).await? else {
            return Ok(None);
        };
        match serde_json::from_slice::<ConfigSnapshot>(&bytes) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(typed_err) => {
                debug!(id, "typed snapshot parse failed, retrying as raw text: {typed_err}");
                let text = String::from_utf8(bytes.to_vec())?;
                let value: Value = serde_json::from_str(text.trim())?;
                Ok(Some(serde_json::from_value(value)?))
            }
        }
    }

    async fn load_history(&self) -> Result<Vec<VersionMetadata>, RefractError> {
        match self.kv.get(HISTORY_KEY).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    /// Lists stored versions, most recent first, paginated by offset cursor.
    pub async fn list_versions(
        &self,
        limit: usize,
        cursor: Option<String>,
    ) -> Result<VersionPage, RefractError> {
        let mut history = self.load_history().await?;
        // Timestamp first; id number breaks ties between same-instant writes.
        history.sort_by_key(|meta| {
            std::cmp::Reverse((parse_timestamp(&meta.timestamp), version_number(&meta.id)))
        });

        let offset: usize = cursor.as_deref().and_then(|c| c.parse().ok()).unwrap_or(0);
        let limit = if limit == 0 { history.len() } else { limit };
        let page: Vec<VersionMetadata> =
            history.iter().skip(offset).take(limit).cloned().collect();

        let consumed = offset + page.len();
        let complete = consumed >= history.len();
        Ok(VersionPage {
            versions: page,
            cursor: (!complete).then(|| consumed.to_string()),
            complete,
        })
    }

    /// Validates and stores a new snapshot, returning its version metadata.
    ///
    /// The next id is `v<len(history)+1>`; the snapshot is stamped with it
    /// and the write time before hashing. Write order is snapshot → history
    /// → pointer.
    pub async fn store(
        &self,
        mut snapshot: ConfigSnapshot,
        meta: CommitMeta,
    ) -> Result<VersionMetadata, RefractError> {
        let report = schema::validate_snapshot(&snapshot);
        if !report.is_valid() {
            return Err(RefractError::ValidationFailed(report));
        }

        let mut history = self.load_history().await?;
        let number = history.len() + 1;
        let id = format!("v{number}");
        let parent = (number > 1).then(|| format!("v{}", number - 1));
        let timestamp = Utc::now().to_rfc3339();

        snapshot.meta.version = id.clone();
        snapshot.meta.last_updated = timestamp.clone();

        let snapshot_value = snapshot.to_value();
        let hash = snapshot_hash(&snapshot_value);

        let previous = self
            .get_current()
            .await?
            .map(|current| current.to_value())
            .unwrap_or_else(|| json!({}));
        let changes: Vec<String> = diff_paths(&previous, &snapshot_value)
            .into_iter()
            .filter(|path| !path.starts_with("_meta."))
            .collect();

        let version = VersionMetadata {
            id: id.clone(),
            timestamp: timestamp.clone(),
            author: meta.author,
            comment: meta.comment,
            hash: hash.clone(),
            parent,
            modules: meta.modules,
            changes,
            tags: meta.tags,
        };

        // 1. Snapshot value first: the pointer must never lead nowhere.
        self.kv
            .put(
                &version_key(&id),
                Bytes::from(serde_json::to_vec(&snapshot)?),
                PutOptions {
                    metadata: Some(json!({
                        "id": id,
                        "timestamp": timestamp,
                        "author": version.author,
                        "hash": hash,
                    })),
                    ttl_seconds: None,
                },
            )
            .await?;

        // 2. History append.
        history.push(version.clone());
        self.kv
            .put(
                HISTORY_KEY,
                Bytes::from(serde_json::to_vec(&history)?),
                PutOptions::default(),
            )
            .await?;

        // 3. Pointer overwrite.
        self.kv
            .put(
                CURRENT_POINTER_KEY,
                Bytes::from(id.clone()),
                PutOptions::default(),
            )
            .await?;

        *self.cached.lock() = Some((id, Arc::new(snapshot)));
        Ok(version)
    }

    /// Re-points `current` at an existing version. Returns `true` on
    /// success; a missing snapshot is a not-found error.
    pub async fn activate(&self, id: &str) -> Result<bool, RefractError> {
        if self.kv.get(&version_key(id)).await?.is_none() {
            return Err(RefractError::NotFound(format!("config version '{id}'")));
        }
        self.kv
            .put(
                CURRENT_POINTER_KEY,
                Bytes::from(id.to_string()),
                PutOptions::default(),
            )
            .await?;
        *self.cached.lock() = None;
        Ok(true)
    }

    /// Partitions the union of dot-paths of two versions into added,
    /// removed, modified, and unchanged, excluding `_meta.` paths.
    pub async fn compare(&self, a: &str, b: &str) -> Result<VersionDiff, RefractError> {
        let left = self
            .get_version(a)
            .await?
            .ok_or_else(|| RefractError::NotFound(format!("config version '{a}'")))?;
        let right = self
            .get_version(b)
            .await?
            .ok_or_else(|| RefractError::NotFound(format!("config version '{b}'")))?;

        let flat_left = flatten(&left.to_value());
        let flat_right = flatten(&right.to_value());

        let mut diff = VersionDiff::default();
        for (path, value) in &flat_right {
            if path.starts_with("_meta.") {
                continue;
            }
            match flat_left.get(path) {
                None => diff.added.push(path.clone()),
                Some(previous) if previous != value => diff.modified.push(path.clone()),
                Some(_) => diff.unchanged.push(path.clone()),
            }
        }
        for path in flat_left.keys() {
            if !path.starts_with("_meta.") && !flat_right.contains_key(path) {
                diff.removed.push(path.clone());
            }
        }
        Ok(diff)
    }

    /// Reads one module out of the active snapshot.
    pub async fn get_module(&self, name: &str) -> Result<Option<ConfigModule>, RefractError> {
        Ok(self
            .get_current()
            .await?
            .and_then(|snapshot| snapshot.modules.get(name).cloned()))
    }

    /// Replaces one module's config in a deep copy of the active snapshot
    /// and stores the copy as a new version.
    pub async fn update_module(
        &self,
        name: &str,
        config: Value,
        meta: CommitMeta,
    ) -> Result<VersionMetadata, RefractError> {
        let current = self
            .get_current()
            .await?
            .ok_or_else(|| RefractError::NotFound("no active configuration".to_string()))?;

        let mut snapshot = (*current).clone();
        let module = snapshot
            .modules
            .get_mut(name)
            .ok_or_else(|| RefractError::NotFound(format!("config module '{name}'")))?;
        module.config = config;

        self.store(snapshot, meta).await
    }
}

fn parse_timestamp(raw: &str) -> i64 {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp_micros())
        .unwrap_or(0)
}

fn version_number(id: &str) -> u64 {
    id.strip_prefix('v').and_then(|n| n.parse().ok()).unwrap_or(0)
}

/// `sha256:`-prefixed hex digest over the canonical (key-sorted, compact)
/// JSON form of a snapshot.
pub fn snapshot_hash(value: &Value) -> String {
    let canonical = canonical_json(value);
    let digest = Sha256::digest(canonical.as_bytes());
    format!("sha256:{}", hex::encode(digest))
}

/// Serializes with object keys sorted recursively, so the hash does not
/// depend on insertion order.
pub fn canonical_json(value: &Value) -> String {
    fn canonicalize(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = serde_json::Map::new();
                for key in keys {
                    out.insert(key.clone(), canonicalize(&map[key]));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
            leaf => leaf.clone(),
        }
    }
    canonicalize(value).to_string()
}
