//! Registry of connected operators.
//!
//! Each websocket connection registers a sink: the sending half of its own
//! bounded queue, drained by that connection's writer. Broadcasting iterates a
//! snapshot of the sinks taken under the lock, and pushes with `try_send`, so a
//! slow operator loses messages instead of holding up the rest.

use crate::protocol::{Outbound, Publisher};
use crate::shutdown::{signalled, ShutdownSignal};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A registered connection's queue.
pub struct Subscription {
    /// Connection id.
    pub id: Uuid,
    /// Sender for local notices to this connection only.
    pub sink: mpsc::Sender<String>,
    /// Frames to write to the socket.
    pub frames: mpsc::Receiver<String>,
}

/// Shared set of operator sinks.
#[derive(Clone, Default)]
pub struct Subscribers {
    sinks: Arc<RwLock<HashMap<Uuid, mpsc::Sender<String>>>>,
}

impl Subscribers {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection with a queue of `capacity` frames.
    pub async fn subscribe(&self, capacity: usize) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(capacity);
        self.sinks.write().await.insert(id, tx.clone());
        debug!(%id, "Operator subscribed");
        Subscription {
            id,
            sink: tx,
            frames: rx,
        }
    }

    /// Remove a connection. Returns whether it was registered.
    pub async fn unsubscribe(&self, id: Uuid) -> bool {
        let removed = self.sinks.write().await.remove(&id).is_some();
        if removed {
            debug!(%id, "Operator unsubscribed");
        }
        removed
    }

    /// Number of registered connections.
    pub async fn len(&self) -> usize {
        self.sinks.read().await.len()
    }

    /// Whether nobody is connected.
    pub async fn is_empty(&self) -> bool {
        self.sinks.read().await.is_empty()
    }

    /// Send a frame to every connection. Returns how many accepted it.
    pub async fn broadcast(&self, frame: &str) -> usize {
        let snapshot: Vec<(Uuid, mpsc::Sender<String>)> = self
            .sinks
            .read()
            .await
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        for (id, tx) in snapshot {
            match tx.try_send(frame.to_string()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(%id, "Operator queue full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(%id, "Operator queue closed");
                }
            }
        }
        delivered
    }
}

/// Drain the controller's publish queue into the registry until shutdown or
/// until every publisher is gone.
pub fn spawn_fanout(
    mut published: mpsc::Receiver<Outbound>,
    subscribers: Subscribers,
    mut shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = signalled(&mut shutdown) => break,
                msg = published.recv() => match msg {
                    Some(msg) => {
                        subscribers.broadcast(&msg.to_json()).await;
                    }
                    None => break,
                },
            }
        }
        info!("Fan-out stopped");
    })
}

/// Publisher wired straight to the registry, for callers outside the
/// controller.
pub fn publisher_for(
    subscribers: Subscribers,
    capacity: usize,
    shutdown: ShutdownSignal,
) -> (Publisher, JoinHandle<()>) {
    let (publisher, rx) = Publisher::channel(capacity);
    let handle = spawn_fanout(rx, subscribers, shutdown);
    (publisher, handle)
}
