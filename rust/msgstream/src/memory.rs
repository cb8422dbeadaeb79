use crate::{BusConsumer, MessageBus, MsgStreamError};
use async_trait::async_trait;
use parking_lot::Mutex;
use quiver_types::quiver_proto::MsgPosition;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;

/// In-process message bus. Channels are created on first produce or
/// subscribe; messages are retained forever, which is fine for the
/// coordinator's control traffic.
#[derive(Clone, Default)]
pub struct MemoryMessageBus {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    channels: HashMap<String, ChannelState>,
}

#[derive(Default)]
struct ChannelState {
    messages: Vec<Vec<u8>>,
    subscriptions: HashSet<String>,
}

impl Debug for MemoryMessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMessageBus")
            .field("channels", &self.inner.lock().channels.len())
            .finish()
    }
}

impl MemoryMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages ever produced on `channel`, oldest first.
    pub fn messages(&self, channel: &str) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .channels
            .get(channel)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    /// Subscription names currently registered on `channel`.
    pub fn subscriptions(&self, channel: &str) -> Vec<String> {
        self.inner
            .lock()
            .channels
            .get(channel)
            .map(|c| c.subscriptions.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageBus for MemoryMessageBus {
    async fn produce(
        &self,
        channel: &str,
        payload: Vec<u8>,
    ) -> Result<MsgPosition, MsgStreamError> {
        let mut inner = self.inner.lock();
        let state = inner.channels.entry(channel.to_string()).or_default();
        state.messages.push(payload);
        Ok(MsgPosition {
            channel_name: channel.to_string(),
            msg_id: state.messages.len() as i64 - 1,
            timestamp: 0,
        })
    }

    async fn create_consumer(
        &self,
        channel: &str,
        subscription: &str,
    ) -> Result<Box<dyn BusConsumer>, MsgStreamError> {
        let mut inner = self.inner.lock();
        let state = inner.channels.entry(channel.to_string()).or_default();
        state.subscriptions.insert(subscription.to_string());
        Ok(Box::new(MemoryBusConsumer {
            bus: self.inner.clone(),
            channel: channel.to_string(),
            subscription: subscription.to_string(),
            cursor: state.messages.len(),
        }))
    }
}

struct MemoryBusConsumer {
    bus: Arc<Mutex<Inner>>,
    channel: String,
    subscription: String,
    cursor: usize,
}

#[async_trait]
impl BusConsumer for MemoryBusConsumer {
    async fn seek_to_start(&mut self) -> Result<(), MsgStreamError> {
        self.cursor = 0;
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<Vec<u8>>, MsgStreamError> {
        let inner = self.bus.lock();
        let state = inner
            .channels
            .get(&self.channel)
            .ok_or_else(|| MsgStreamError::UnknownChannel(self.channel.clone()))?;
        if self.cursor >= state.messages.len() {
            return Ok(None);
        }
        let payload = state.messages[self.cursor].clone();
        self.cursor += 1;
        Ok(Some(payload))
    }

    async fn close(self: Box<Self>) -> Result<(), MsgStreamError> {
        let mut inner = self.bus.lock();
        if let Some(state) = inner.channels.get_mut(&self.channel) {
            state.subscriptions.remove(&self.subscription);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_produce_returns_monotonic_positions() {
        let bus = MemoryMessageBus::new();
        let first = bus.produce("chan", b"a".to_vec()).await.unwrap();
        let second = bus.produce("chan", b"b".to_vec()).await.unwrap();
        assert_eq!(first.msg_id, 0);
        assert_eq!(second.msg_id, 1);
        assert_eq!(second.channel_name, "chan");
        assert_eq!(bus.messages("chan").len(), 2);
    }

    #[tokio::test]
    async fn test_consumer_seek_and_release() {
        let bus = MemoryMessageBus::new();
        bus.produce("chan", b"early".to_vec()).await.unwrap();

        let mut consumer = bus.create_consumer("chan", "node-1-sub").await.unwrap();
        // New consumers start at the tail.
        assert_eq!(consumer.next().await.unwrap(), None);
        consumer.seek_to_start().await.unwrap();
        assert_eq!(consumer.next().await.unwrap(), Some(b"early".to_vec()));

        assert_eq!(bus.subscriptions("chan"), vec!["node-1-sub".to_string()]);
        consumer.close().await.unwrap();
        assert!(bus.subscriptions("chan").is_empty());
    }
}
