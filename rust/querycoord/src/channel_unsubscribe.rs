//! Asynchronous teardown of stream subscriptions left behind by offline
//! query nodes.
//!
//! Entries are journaled under `channelUnsubscribeInfo/<node>/<seq>` before
//! the handler sees them, processed FIFO by a single worker, and removed
//! only after the broker side released the subscription. Broker failures
//! are retried forever; re-running a teardown is harmless.

use crate::paths;
use parking_lot::Mutex;
use prost::Message;
use quiver_metakv::{MetaKv, MetaKvError};
use quiver_msgstream::MessageBus;
use quiver_types::quiver_proto::UnsubscribeChannelInfo;
use quiver_types::NodeId;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Subscription name a query node uses on every channel it consumes.
pub fn node_subscription_name(node_id: NodeId) -> String {
    format!("queryNode-{}", node_id)
}

pub struct ChannelUnsubscribeHandler {
    kv: Arc<dyn MetaKv>,
    bus: Arc<dyn MessageBus>,
    queue: Mutex<VecDeque<(String, UnsubscribeChannelInfo)>>,
    notify: Notify,
    seq: AtomicU64,
}

impl std::fmt::Debug for ChannelUnsubscribeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelUnsubscribeHandler")
            .field("queued", &self.queue.lock().len())
            .finish()
    }
}

impl ChannelUnsubscribeHandler {
    /// Builds the handler and replays every journaled entry that survived
    /// the previous incarnation.
    pub async fn new(
        kv: Arc<dyn MetaKv>,
        bus: Arc<dyn MessageBus>,
    ) -> Result<Arc<Self>, MetaKvError> {
        let mut queue = VecDeque::new();
        let mut max_seq = 0u64;
        for (key, value) in kv
            .load_with_prefix(paths::CHANNEL_UNSUBSCRIBE_PREFIX)
            .await?
        {
            if let Some(seq) = key.rsplit('/').next().and_then(|s| s.parse::<u64>().ok()) {
                max_seq = max_seq.max(seq);
            }
            match UnsubscribeChannelInfo::decode(value.as_slice()) {
                Ok(info) => queue.push_back((key, info)),
                Err(e) => {
                    tracing::error!(key = %key, "dropping malformed unsubscribe entry: {}", e);
                }
            }
        }
        Ok(Arc::new(ChannelUnsubscribeHandler {
            kv,
            bus,
            queue: Mutex::new(queue),
            notify: Notify::new(),
            seq: AtomicU64::new(max_seq + 1),
        }))
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Journal an unsubscribe request and hand it to the worker.
    pub async fn enqueue(&self, info: UnsubscribeChannelInfo) -> Result<(), MetaKvError> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let key = paths::channel_unsubscribe_key(info.node_id, seq);
        self.kv.save(&key, info.encode_to_vec()).await?;
        self.queue.lock().push_back((key, info));
        self.notify.notify_one();
        Ok(())
    }

    /// Run the worker until cancelled.
    pub fn start(self: &Arc<Self>, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let handler = self.clone();
        tokio::spawn(async move {
            handler.run(token).await;
        })
    }

    async fn run(&self, token: CancellationToken) {
        loop {
            let front = self.queue.lock().front().cloned();
            let Some((key, info)) = front else {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = self.notify.notified() => continue,
                }
            };

            let mut delay = INITIAL_RETRY_DELAY;
            loop {
                match self.release_subscriptions(&info).await {
                    Ok(()) => break,
                    Err(e) => {
                        tracing::warn!(
                            node_id = info.node_id,
                            "channel unsubscribe failed, retrying in {:?}: {}",
                            delay,
                            e
                        );
                        tokio::select! {
                            _ = token.cancelled() => return,
                            _ = tokio::time::sleep(delay) => {}
                        }
                        delay = (delay * 2).min(MAX_RETRY_DELAY);
                    }
                }
            }

            // Only a released subscription may leave the journal.
            if let Err(e) = self.kv.remove(&key).await {
                tracing::warn!(key = %key, "failed to reap unsubscribe journal entry: {}", e);
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(INITIAL_RETRY_DELAY) => {}
                }
                continue;
            }
            let mut queue = self.queue.lock();
            if queue.front().map(|(k, _)| k == &key).unwrap_or(false) {
                queue.pop_front();
            }
        }
    }

    async fn release_subscriptions(
        &self,
        info: &UnsubscribeChannelInfo,
    ) -> Result<(), quiver_msgstream::MsgStreamError> {
        let subscription = node_subscription_name(info.node_id);
        for collection in &info.collection_channels {
            for channel in &collection.channels {
                let mut consumer = self.bus.create_consumer(channel, &subscription).await?;
                consumer.seek_to_start().await?;
                consumer.close().await?;
                tracing::info!(
                    node_id = info.node_id,
                    collection_id = collection.collection_id,
                    channel = %channel,
                    "released channel subscription"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_metakv::MemoryMetaKv;
    use quiver_msgstream::MemoryMessageBus;
    use quiver_types::quiver_proto::UnsubscribeChannels;

    fn unsubscribe_info(node_id: NodeId, channel: &str) -> UnsubscribeChannelInfo {
        UnsubscribeChannelInfo {
            node_id,
            collection_channels: vec![UnsubscribeChannels {
                collection_id: 1,
                channels: vec![channel.to_string()],
            }],
        }
    }

    #[tokio::test]
    async fn test_releases_subscription_and_reaps_journal() {
        let kv: Arc<dyn MetaKv> = Arc::new(MemoryMetaKv::new());
        let bus = Arc::new(MemoryMessageBus::new());
        // The node holds a live subscription on its dm channel.
        bus.create_consumer("quiver-dml_0_1v0", &node_subscription_name(4))
            .await
            .unwrap();

        let handler = ChannelUnsubscribeHandler::new(kv.clone(), bus.clone())
            .await
            .unwrap();
        let token = CancellationToken::new();
        handler.start(token.clone());

        handler
            .enqueue(unsubscribe_info(4, "quiver-dml_0_1v0"))
            .await
            .unwrap();

        // Wait for the worker to drain the queue.
        for _ in 0..100 {
            if handler.pending() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handler.pending(), 0);
        assert!(bus.subscriptions("quiver-dml_0_1v0").is_empty());
        assert!(kv
            .load_with_prefix(paths::CHANNEL_UNSUBSCRIBE_PREFIX)
            .await
            .unwrap()
            .is_empty());
        token.cancel();
    }

    #[tokio::test]
    async fn test_boot_replay_of_pending_entries() {
        let kv: Arc<dyn MetaKv> = Arc::new(MemoryMetaKv::new());
        let bus = Arc::new(MemoryMessageBus::new());
        let info = unsubscribe_info(9, "quiver-dml_1_2v0");
        kv.save(
            &paths::channel_unsubscribe_key(9, 3),
            info.encode_to_vec(),
        )
        .await
        .unwrap();

        let handler = ChannelUnsubscribeHandler::new(kv.clone(), bus.clone())
            .await
            .unwrap();
        assert_eq!(handler.pending(), 1);

        let token = CancellationToken::new();
        handler.start(token.clone());
        for _ in 0..100 {
            if handler.pending() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handler.pending(), 0);
        token.cancel();
    }
}
