// src/core/cache/purge.rs

//! The batched list-filter-delete sweep engine behind purge-by-tag,
//! purge-by-path, and the expiration maintenance pass.
//!
//! Entries carry their own metadata; there is no inverted tag index. A sweep
//! paginates `list` under the cache prefix, applies a metadata predicate,
//! and deletes matches in fixed-size batches with a sleep between batches so
//! the KV store is never hammered.

use crate::core::errors::RefractError;
use crate::core::kv::{KvStore, ListOptions};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Deletions per batch between backpressure sleeps.
pub(crate) const PURGE_BATCH_SIZE: usize = 100;
/// Page size used while scanning the keyspace.
pub(crate) const LIST_PAGE_LIMIT: usize = 1000;

/// The metadata predicate a sweep applies. Entries without metadata never
/// match; they cannot be attributed.
#[derive(Debug, Clone)]
pub(crate) enum PurgePredicate {
    /// `metadata.tags` contains the tag.
    Tag(String),
    /// `metadata.url` contains the substring.
    PathSubstring(String),
    /// `metadata.expiration` is before the given epoch-ms instant.
    ExpiredBefore(i64),
}

impl PurgePredicate {
    pub(crate) fn matches(&self, metadata: Option<&Value>) -> bool {
        let Some(metadata) = metadata else {
            return false;
        };
        match self {
            PurgePredicate::Tag(tag) => metadata
                .get("tags")
                .and_then(Value::as_array)
                .is_some_and(|tags| tags.iter().any(|t| t.as_str() == Some(tag.as_str()))),
            PurgePredicate::PathSubstring(substr) => metadata
                .get("url")
                .and_then(Value::as_str)
                .is_some_and(|url| url.contains(substr)),
            PurgePredicate::ExpiredBefore(now_ms) => metadata
                .get("expiration")
                .and_then(Value::as_i64)
                .is_some_and(|expiration| expiration < *now_ms),
        }
    }
}

/// Runs one full sweep and returns the number of keys deleted.
///
/// `max_to_prune` bounds how many matches are collected (used by
/// maintenance); `None` sweeps everything under the prefix.
pub(crate) async fn sweep(
    kv: &Arc<dyn KvStore>,
    prefix: &str,
    predicate: &PurgePredicate,
    purge_delay_ms: u64,
    max_to_prune: Option<usize>,
) -> Result<usize, RefractError> {
    let mut matched: Vec<String> = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = kv
            .list(ListOptions {
                prefix: prefix.to_string(),
                cursor: cursor.clone(),
                limit: LIST_PAGE_LIMIT,
            })
            .await?;

        for entry in &page.keys {
            if predicate.matches(entry.metadata.as_ref()) {
                matched.push(entry.name.clone());
                if max_to_prune.is_some_and(|max| matched.len() >= max) {
                    break;
                }
            }
        }

        let capped = max_to_prune.is_some_and(|max| matched.len() >= max);
        if page.complete || capped {
            break;
        }
        cursor = page.cursor;
        if cursor.is_none() {
            break;
        }
    }

    debug!(matched = matched.len(), prefix, "purge sweep scan finished");

    let mut deleted = 0usize;
    for batch in matched.chunks(PURGE_BATCH_SIZE) {
        for key in batch {
            kv.delete(key).await?;
            deleted += 1;
        }
        if deleted < matched.len() && purge_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(purge_delay_ms)).await;
        }
    }

    Ok(deleted)
}
