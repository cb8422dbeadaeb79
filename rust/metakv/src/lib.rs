//! The coordinator's durable metadata store.
//!
//! Every placement decision the coordinator makes is journaled here before
//! it is acknowledged, so a restart resumes mid-flight work instead of
//! losing it. The store is assumed linearizable for single-key operations
//! and atomic for the multi-save/multi-remove batch.

mod etcd;
mod memory;
pub mod testing;

pub use etcd::EtcdMetaKv;
pub use memory::MemoryMetaKv;

use async_trait::async_trait;
use quiver_error::{ErrorCodes, QuiverError};
use std::fmt::Debug;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum MetaKvError {
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),
    #[error("transaction did not commit")]
    TxnFailed,
    #[error("injected failure")]
    Injected,
}

impl QuiverError for MetaKvError {
    fn code(&self) -> ErrorCodes {
        match self {
            MetaKvError::Etcd(_) => ErrorCodes::Unavailable,
            MetaKvError::TxnFailed => ErrorCodes::Aborted,
            MetaKvError::Injected => ErrorCodes::Internal,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KvEventKind {
    Put,
    Delete,
}

/// One observed mutation under a watched prefix.
#[derive(Clone, Debug)]
pub struct KvEvent {
    pub kind: KvEventKind,
    pub key: String,
    /// Empty for deletes.
    pub value: Vec<u8>,
}

pub type KvWatchStream = mpsc::UnboundedReceiver<KvEvent>;

#[async_trait]
pub trait MetaKv: Send + Sync + Debug {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, MetaKvError>;

    /// Returns all pairs whose key starts with `prefix`, in key order.
    async fn load_with_prefix(&self, prefix: &str)
        -> Result<Vec<(String, Vec<u8>)>, MetaKvError>;

    async fn save(&self, key: &str, value: Vec<u8>) -> Result<(), MetaKvError>;

    /// Atomic batch write. Either every pair lands or none do.
    async fn multi_save(&self, kvs: Vec<(String, Vec<u8>)>) -> Result<(), MetaKvError>;

    async fn remove(&self, key: &str) -> Result<(), MetaKvError>;

    async fn multi_remove(&self, keys: Vec<String>) -> Result<(), MetaKvError>;

    /// Atomic combination of [`MetaKv::multi_save`] and
    /// [`MetaKv::multi_remove`]; the scheduler relies on this to swap a
    /// failed task's records for its replacements in one commit.
    async fn multi_save_and_remove(
        &self,
        saves: Vec<(String, Vec<u8>)>,
        removals: Vec<String>,
    ) -> Result<(), MetaKvError>;

    async fn remove_with_prefix(&self, prefix: &str) -> Result<(), MetaKvError>;

    /// Subscribe to all future mutations under `prefix`. Events arrive in
    /// commit order; the stream ends when the store shuts down.
    async fn watch_prefix(&self, prefix: &str) -> Result<KvWatchStream, MetaKvError>;
}
