//! The stream-broker seam of the query coordinator.
//!
//! The coordinator produces sealed-segment change messages onto one query
//! channel per collection and tears down subscriptions left behind by dead
//! query nodes. Both only need this narrow interface, so deployments can
//! plug in any broker; the in-process [`MemoryMessageBus`] serves tests and
//! single-binary installs.

mod memory;

pub use memory::MemoryMessageBus;

use async_trait::async_trait;
use quiver_error::{ErrorCodes, QuiverError};
use quiver_types::quiver_proto::MsgPosition;
use std::fmt::Debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MsgStreamError {
    #[error("channel {0} does not exist")]
    UnknownChannel(String),
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

impl QuiverError for MsgStreamError {
    fn code(&self) -> ErrorCodes {
        match self {
            MsgStreamError::UnknownChannel(_) => ErrorCodes::NotFound,
            MsgStreamError::Unavailable(_) => ErrorCodes::Unavailable,
        }
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync + Debug {
    /// Publish one message onto `channel` and return the position it landed
    /// at. Produces on the same channel are serialized by the bus.
    async fn produce(&self, channel: &str, payload: Vec<u8>)
        -> Result<MsgPosition, MsgStreamError>;

    /// Open a named subscription on `channel`. Creating a consumer
    /// registers the subscription at the broker; closing it releases it.
    async fn create_consumer(
        &self,
        channel: &str,
        subscription: &str,
    ) -> Result<Box<dyn BusConsumer>, MsgStreamError>;
}

#[async_trait]
pub trait BusConsumer: Send {
    async fn seek_to_start(&mut self) -> Result<(), MsgStreamError>;

    /// Next message at the cursor, or `None` when caught up.
    async fn next(&mut self) -> Result<Option<Vec<u8>>, MsgStreamError>;

    /// Drop the subscription at the broker side.
    async fn close(self: Box<Self>) -> Result<(), MsgStreamError>;
}
