// src/core/kv/faulty.rs

//! A fault-injecting `KvStore` wrapper for resilience tests.

use super::{KvStore, ListOptions, ListPage, PutOptions};
use crate::core::errors::RefractError;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Wraps another store and fails the next N operations of each kind with
/// `RefractError::KvUnavailable`. Counters decrement per failed call.
pub struct FaultInjectingKvStore {
    inner: Arc<dyn KvStore>,
    failing_reads: AtomicU32,
    failing_writes: AtomicU32,
    failing_lists: AtomicU32,
}

impl FaultInjectingKvStore {
    pub fn new(inner: Arc<dyn KvStore>) -> Self {
        Self {
            inner,
            failing_reads: AtomicU32::new(0),
            failing_writes: AtomicU32::new(0),
            failing_lists: AtomicU32::new(0),
        }
    }

    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_lists(&self, count: u32) {
        self.failing_lists.store(count, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicU32, op: &str) -> Result<(), RefractError> {
        let armed = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            Err(RefractError::KvUnavailable(format!("injected {op} failure")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KvStore for FaultInjectingKvStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, RefractError> {
        Self::take_failure(&self.failing_reads, "read")?;
        self.inner.get(key).await
    }

    async fn get_with_metadata(
        &self,
        key: &str,
    ) -> Result<(Option<Bytes>, Option<Value>), RefractError> {
        Self::take_failure(&self.failing_reads, "read")?;
        self.inner.get_with_metadata(key).await
    }

    async fn put(&self, key: &str, value: Bytes, opts: PutOptions) -> Result<(), RefractError> {
        Self::take_failure(&self.failing_writes, "write")?;
        self.inner.put(key, value, opts).await
    }

    async fn delete(&self, key: &str) -> Result<(), RefractError> {
        Self::take_failure(&self.failing_writes, "write")?;
        self.inner.delete(key).await
    }

    async fn list(&self, opts: ListOptions) -> Result<ListPage, RefractError> {
        Self::take_failure(&self.failing_lists, "list")?;
        self.inner.list(opts).await
    }
}
