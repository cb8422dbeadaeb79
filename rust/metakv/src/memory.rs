use crate::{KvEvent, KvEventKind, KvWatchStream, MetaKv, MetaKvError};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::mpsc;

/// In-process [`MetaKv`] used by tests and single-binary deployments.
/// Mutations and their watch notifications happen under one write lock, so
/// watchers observe events in commit order.
#[derive(Clone, Default)]
pub struct MemoryMetaKv {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
    watchers: Mutex<Vec<PrefixWatcher>>,
}

struct PrefixWatcher {
    prefix: String,
    sender: mpsc::UnboundedSender<KvEvent>,
}

impl Debug for MemoryMetaKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMetaKv")
            .field("keys", &self.inner.data.read().len())
            .finish()
    }
}

impl MemoryMetaKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(&self, events: &[KvEvent]) {
        let mut watchers = self.inner.watchers.lock();
        watchers.retain(|w| !w.sender.is_closed());
        for event in events {
            for watcher in watchers.iter() {
                if event.key.starts_with(&watcher.prefix) {
                    let _ = watcher.sender.send(event.clone());
                }
            }
        }
    }
}

#[async_trait]
impl MetaKv for MemoryMetaKv {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, MetaKvError> {
        Ok(self.inner.data.read().get(key).cloned())
    }

    async fn load_with_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, MetaKvError> {
        let data = self.inner.data.read();
        Ok(data
            .range::<String, _>((Bound::Included(prefix.to_string()), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn save(&self, key: &str, value: Vec<u8>) -> Result<(), MetaKvError> {
        self.multi_save(vec![(key.to_string(), value)]).await
    }

    async fn multi_save(&self, kvs: Vec<(String, Vec<u8>)>) -> Result<(), MetaKvError> {
        self.multi_save_and_remove(kvs, vec![]).await
    }

    async fn remove(&self, key: &str) -> Result<(), MetaKvError> {
        self.multi_remove(vec![key.to_string()]).await
    }

    async fn multi_remove(&self, keys: Vec<String>) -> Result<(), MetaKvError> {
        self.multi_save_and_remove(vec![], keys).await
    }

    async fn multi_save_and_remove(
        &self,
        saves: Vec<(String, Vec<u8>)>,
        removals: Vec<String>,
    ) -> Result<(), MetaKvError> {
        let mut events = Vec::with_capacity(saves.len() + removals.len());
        {
            let mut data = self.inner.data.write();
            for key in removals {
                if data.remove(&key).is_some() {
                    events.push(KvEvent {
                        kind: KvEventKind::Delete,
                        key,
                        value: Vec::new(),
                    });
                }
            }
            for (key, value) in saves {
                data.insert(key.clone(), value.clone());
                events.push(KvEvent {
                    kind: KvEventKind::Put,
                    key,
                    value,
                });
            }
        }
        self.notify(&events);
        Ok(())
    }

    async fn remove_with_prefix(&self, prefix: &str) -> Result<(), MetaKvError> {
        let keys: Vec<String> = {
            let data = self.inner.data.read();
            data.range::<String, _>((Bound::Included(prefix.to_string()), Bound::Unbounded))
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, _)| k.clone())
                .collect()
        };
        self.multi_remove(keys).await
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<KvWatchStream, MetaKvError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner.watchers.lock().push(PrefixWatcher {
            prefix: prefix.to_string(),
            sender,
        });
        Ok(receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prefix_ops() {
        let kv = MemoryMetaKv::new();
        kv.save("a/1", b"one".to_vec()).await.unwrap();
        kv.save("a/2", b"two".to_vec()).await.unwrap();
        kv.save("b/1", b"other".to_vec()).await.unwrap();

        let loaded = kv.load_with_prefix("a/").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], ("a/1".to_string(), b"one".to_vec()));

        kv.remove_with_prefix("a/").await.unwrap();
        assert!(kv.load_with_prefix("a/").await.unwrap().is_empty());
        assert_eq!(kv.load("b/1").await.unwrap(), Some(b"other".to_vec()));
    }

    #[tokio::test]
    async fn test_multi_save_and_remove_is_observed_atomically() {
        let kv = MemoryMetaKv::new();
        kv.save("task/1", b"old".to_vec()).await.unwrap();
        kv.multi_save_and_remove(
            vec![
                ("task/2".to_string(), b"new".to_vec()),
                ("task/3".to_string(), b"new".to_vec()),
            ],
            vec!["task/1".to_string()],
        )
        .await
        .unwrap();

        assert_eq!(kv.load("task/1").await.unwrap(), None);
        assert!(kv.load("task/2").await.unwrap().is_some());
        assert!(kv.load("task/3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_watch_prefix_sees_puts_and_deletes_in_order() {
        let kv = MemoryMetaKv::new();
        let mut watch = kv.watch_prefix("handoff/").await.unwrap();

        kv.save("handoff/1/2/3", b"seg".to_vec()).await.unwrap();
        kv.save("unrelated", b"x".to_vec()).await.unwrap();
        kv.remove("handoff/1/2/3").await.unwrap();

        let first = watch.recv().await.unwrap();
        assert_eq!(first.kind, KvEventKind::Put);
        assert_eq!(first.key, "handoff/1/2/3");
        assert_eq!(first.value, b"seg".to_vec());

        let second = watch.recv().await.unwrap();
        assert_eq!(second.kind, KvEventKind::Delete);
        assert_eq!(second.key, "handoff/1/2/3");
    }
}
