//! Fault-injecting wrapper used by coordinator tests to exercise the
//! storage-failure paths without a real outage.

use crate::{KvWatchStream, MemoryMetaKv, MetaKv, MetaKvError};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct FailPointMetaKv {
    inner: MemoryMetaKv,
    fail_writes: Arc<AtomicBool>,
}

impl FailPointMetaKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every write returns [`MetaKvError::Injected`]; reads and
    /// watches keep working.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), MetaKvError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(MetaKvError::Injected);
        }
        Ok(())
    }
}

#[async_trait]
impl MetaKv for FailPointMetaKv {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, MetaKvError> {
        self.inner.load(key).await
    }

    async fn load_with_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, MetaKvError> {
        self.inner.load_with_prefix(prefix).await
    }

    async fn save(&self, key: &str, value: Vec<u8>) -> Result<(), MetaKvError> {
        self.check()?;
        self.inner.save(key, value).await
    }

    async fn multi_save(&self, kvs: Vec<(String, Vec<u8>)>) -> Result<(), MetaKvError> {
        self.check()?;
        self.inner.multi_save(kvs).await
    }

    async fn remove(&self, key: &str) -> Result<(), MetaKvError> {
        self.check()?;
        self.inner.remove(key).await
    }

    async fn multi_remove(&self, keys: Vec<String>) -> Result<(), MetaKvError> {
        self.check()?;
        self.inner.multi_remove(keys).await
    }

    async fn multi_save_and_remove(
        &self,
        saves: Vec<(String, Vec<u8>)>,
        removals: Vec<String>,
    ) -> Result<(), MetaKvError> {
        self.check()?;
        self.inner.multi_save_and_remove(saves, removals).await
    }

    async fn remove_with_prefix(&self, prefix: &str) -> Result<(), MetaKvError> {
        self.check()?;
        self.inner.remove_with_prefix(prefix).await
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<KvWatchStream, MetaKvError> {
        self.inner.watch_prefix(prefix).await
    }
}
