use crate::{KvEvent, KvEventKind, KvWatchStream, MetaKv, MetaKvError};
use async_trait::async_trait;
use etcd_client::{
    Client, DeleteOptions, EventType, GetOptions, Txn, TxnOp, WatchOptions,
};
use std::fmt::Debug;
use tokio::sync::mpsc;

/// [`MetaKv`] backed by an etcd cluster. All keys live under `root_path` so
/// several coordinators can share one etcd installation.
#[derive(Clone)]
pub struct EtcdMetaKv {
    client: Client,
    root_path: String,
}

impl Debug for EtcdMetaKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdMetaKv")
            .field("root_path", &self.root_path)
            .finish()
    }
}

impl EtcdMetaKv {
    pub async fn connect(
        endpoints: &[String],
        root_path: impl Into<String>,
    ) -> Result<Self, MetaKvError> {
        let client = Client::connect(endpoints, None).await?;
        Ok(EtcdMetaKv {
            client,
            root_path: root_path.into(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}/{}", self.root_path, key)
    }

    fn strip_root<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(&self.root_path)
            .and_then(|k| k.strip_prefix('/'))
            .unwrap_or(key)
    }
}

#[async_trait]
impl MetaKv for EtcdMetaKv {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, MetaKvError> {
        let mut client = self.client.clone();
        let resp = client.get(self.full_key(key), None).await?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn load_with_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, MetaKvError> {
        let mut client = self.client.clone();
        let resp = client
            .get(self.full_key(prefix), Some(GetOptions::new().with_prefix()))
            .await?;
        let mut out = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            let key = kv.key_str()?;
            out.push((self.strip_root(key).to_string(), kv.value().to_vec()));
        }
        Ok(out)
    }

    async fn save(&self, key: &str, value: Vec<u8>) -> Result<(), MetaKvError> {
        let mut client = self.client.clone();
        client.put(self.full_key(key), value, None).await?;
        Ok(())
    }

    async fn multi_save(&self, kvs: Vec<(String, Vec<u8>)>) -> Result<(), MetaKvError> {
        self.multi_save_and_remove(kvs, vec![]).await
    }

    async fn remove(&self, key: &str) -> Result<(), MetaKvError> {
        let mut client = self.client.clone();
        client.delete(self.full_key(key), None).await?;
        Ok(())
    }

    async fn multi_remove(&self, keys: Vec<String>) -> Result<(), MetaKvError> {
        self.multi_save_and_remove(vec![], keys).await
    }

    async fn multi_save_and_remove(
        &self,
        saves: Vec<(String, Vec<u8>)>,
        removals: Vec<String>,
    ) -> Result<(), MetaKvError> {
        let mut ops = Vec::with_capacity(saves.len() + removals.len());
        for key in removals {
            ops.push(TxnOp::delete(self.full_key(&key), None));
        }
        for (key, value) in saves {
            ops.push(TxnOp::put(self.full_key(&key), value, None));
        }
        if ops.is_empty() {
            return Ok(());
        }
        let mut client = self.client.clone();
        let resp = client.txn(Txn::new().and_then(ops)).await?;
        if !resp.succeeded() {
            return Err(MetaKvError::TxnFailed);
        }
        Ok(())
    }

    async fn remove_with_prefix(&self, prefix: &str) -> Result<(), MetaKvError> {
        let mut client = self.client.clone();
        client
            .delete(
                self.full_key(prefix),
                Some(DeleteOptions::new().with_prefix()),
            )
            .await?;
        Ok(())
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<KvWatchStream, MetaKvError> {
        let mut client = self.client.clone();
        let (_watcher, mut stream) = client
            .watch(
                self.full_key(prefix),
                Some(WatchOptions::new().with_prefix()),
            )
            .await?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let root = self.root_path.clone();
        tokio::spawn(async move {
            // The watcher handle is moved in so the server-side watch stays
            // alive as long as the receiver does.
            let _watcher = _watcher;
            loop {
                match stream.message().await {
                    Ok(Some(resp)) => {
                        for event in resp.events() {
                            let Some(kv) = event.kv() else { continue };
                            let Ok(key) = kv.key_str() else { continue };
                            let key = key
                                .strip_prefix(root.as_str())
                                .and_then(|k| k.strip_prefix('/'))
                                .unwrap_or(key)
                                .to_string();
                            let kv_event = match event.event_type() {
                                EventType::Put => KvEvent {
                                    kind: KvEventKind::Put,
                                    key,
                                    value: kv.value().to_vec(),
                                },
                                EventType::Delete => KvEvent {
                                    kind: KvEventKind::Delete,
                                    key,
                                    value: Vec::new(),
                                },
                            };
                            if sender.send(kv_event).is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        tracing::error!("etcd watch stream failed: {}", e);
                        return;
                    }
                }
            }
        });
        Ok(receiver)
    }
}
