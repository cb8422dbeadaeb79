//! Session registry over the meta KV.
//!
//! Query nodes announce themselves under `session/queryNode/<id>`; the
//! coordinator replays existing sessions at boot and follows the prefix
//! watch afterwards. The coordinator's own session key doubles as its
//! liveness fence: when it disappears, the process must exit so external
//! supervision can restart it.

use crate::paths;
use quiver_error::{ErrorCodes, QuiverError};
use quiver_metakv::{KvEventKind, MetaKv, MetaKvError};
use quiver_types::NodeId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub node_id: NodeId,
    pub address: String,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("meta kv failed: {0}")]
    MetaKv(#[from] MetaKvError),
    #[error("malformed session record under {key}: {source}")]
    Malformed {
        key: String,
        source: serde_json::Error,
    },
}

impl QuiverError for SessionError {
    fn code(&self) -> ErrorCodes {
        match self {
            SessionError::MetaKv(e) => e.code(),
            SessionError::Malformed { .. } => ErrorCodes::Internal,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Added(Session),
    Removed(NodeId),
}

/// Write a query node's session record. Nodes normally do this themselves;
/// the coordinator only calls it from tests and tools.
pub async fn register_node_session(
    kv: &Arc<dyn MetaKv>,
    session: &Session,
) -> Result<(), SessionError> {
    let payload = serde_json::to_vec(session).expect("session serialization cannot fail");
    kv.save(&paths::query_node_session_key(session.node_id), payload)
        .await?;
    Ok(())
}

pub async fn remove_node_session(
    kv: &Arc<dyn MetaKv>,
    node_id: NodeId,
) -> Result<(), SessionError> {
    kv.remove(&paths::query_node_session_key(node_id)).await?;
    Ok(())
}

/// Claim the coordinator's own session key.
pub async fn register_coord_session(
    kv: &Arc<dyn MetaKv>,
    session: &Session,
) -> Result<(), SessionError> {
    let payload = serde_json::to_vec(session).expect("session serialization cannot fail");
    kv.save(paths::QUERY_COORD_SESSION_KEY, payload).await?;
    Ok(())
}

/// All currently registered query-node sessions.
pub async fn list_node_sessions(
    kv: &Arc<dyn MetaKv>,
) -> Result<Vec<Session>, SessionError> {
    let pairs = kv
        .load_with_prefix(paths::QUERY_NODE_SESSION_PREFIX)
        .await?;
    let mut sessions = Vec::with_capacity(pairs.len());
    for (key, value) in pairs {
        let session: Session =
            serde_json::from_slice(&value).map_err(|source| SessionError::Malformed {
                key: key.clone(),
                source,
            })?;
        sessions.push(session);
    }
    Ok(sessions)
}

fn node_id_from_session_key(key: &str) -> Option<NodeId> {
    key.rsplit('/').next()?.parse().ok()
}

/// Follow node session changes. Malformed adds are logged and skipped so a
/// single bad registration cannot wedge the controller loop.
pub async fn watch_node_sessions(
    kv: &Arc<dyn MetaKv>,
) -> Result<mpsc::UnboundedReceiver<SessionEvent>, SessionError> {
    let mut watch = kv.watch_prefix(paths::QUERY_NODE_SESSION_PREFIX).await?;
    let (sender, receiver) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = watch.recv().await {
            let mapped = match event.kind {
                KvEventKind::Put => match serde_json::from_slice::<Session>(&event.value) {
                    Ok(session) => SessionEvent::Added(session),
                    Err(e) => {
                        tracing::warn!(key = %event.key, "ignoring malformed session: {}", e);
                        continue;
                    }
                },
                KvEventKind::Delete => match node_id_from_session_key(&event.key) {
                    Some(node_id) => SessionEvent::Removed(node_id),
                    None => continue,
                },
            };
            if sender.send(mapped).is_err() {
                return;
            }
        }
    });
    Ok(receiver)
}

/// Resolves when the coordinator's session key is deleted or the watch
/// breaks; either way the process can no longer prove it is primary.
pub async fn wait_for_session_loss(kv: Arc<dyn MetaKv>) -> Result<(), SessionError> {
    let mut watch = kv.watch_prefix(paths::QUERY_COORD_SESSION_KEY).await?;
    loop {
        match watch.recv().await {
            Some(event) if event.kind == KvEventKind::Delete => return Ok(()),
            Some(_) => continue,
            None => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_metakv::MemoryMetaKv;

    fn kv() -> Arc<dyn MetaKv> {
        Arc::new(MemoryMetaKv::new())
    }

    #[tokio::test]
    async fn test_list_and_watch_sessions() {
        let kv = kv();
        let s1 = Session {
            node_id: 1,
            address: "127.0.0.1:21123".to_string(),
        };
        register_node_session(&kv, &s1).await.unwrap();
        assert_eq!(list_node_sessions(&kv).await.unwrap(), vec![s1.clone()]);

        let mut events = watch_node_sessions(&kv).await.unwrap();
        let s2 = Session {
            node_id: 2,
            address: "127.0.0.1:21124".to_string(),
        };
        register_node_session(&kv, &s2).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Added(s2));

        remove_node_session(&kv, 1).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Removed(1));
    }

    #[tokio::test]
    async fn test_session_loss_fence() {
        let kv = kv();
        let session = Session {
            node_id: 1,
            address: "coordinator".to_string(),
        };
        register_coord_session(&kv, &session).await.unwrap();

        let fence = tokio::spawn(wait_for_session_loss(kv.clone()));
        tokio::task::yield_now().await;
        kv.remove(crate::paths::QUERY_COORD_SESSION_KEY)
            .await
            .unwrap();
        fence.await.unwrap().unwrap();
    }
}
