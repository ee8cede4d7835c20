//! Operator websocket transport.
//!
//! Serves `/ws`. Every connection gets its own outbound queue in the
//! [`Subscribers`] registry and a reader that forwards well-formed envelopes to
//! the controller. Malformed input never reaches the controller; the sender
//! alone gets an `Error` notice.

pub mod subscribers;

pub use subscribers::{publisher_for, spawn_fanout, Subscribers, Subscription};

use crate::error::{HelioError, HelioResult};
use crate::protocol::{Envelope, Outbound, Status};
use crate::shutdown::{signalled, ShutdownSignal};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{Sink, SinkExt, StreamExt};
use std::fmt::Display;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shared state handed to every connection.
#[derive(Clone)]
pub struct TransportState {
    /// Connected operators.
    pub subscribers: Subscribers,
    /// Controller inbound queue.
    pub inbound: mpsc::Sender<Envelope>,
    /// Per-connection outbound queue size.
    pub client_queue: usize,
    /// Closes the listener and every open connection.
    pub shutdown: ShutdownSignal,
}

/// Build the router.
pub fn router(state: TransportState) -> Router {
    Router::new()
        .route("/ws", get(ws_endpoint))
        .with_state(state)
}

/// Bind `listen` and serve until the state's shutdown signal fires.
///
/// # Errors
/// `Transport` when the address cannot be bound or the server fails.
pub async fn serve(listen: &str, state: TransportState) -> HelioResult<()> {
    let mut shutdown = state.shutdown.clone();
    let listener = TcpListener::bind(listen)
        .await
        .map_err(|e| HelioError::Transport(format!("cannot listen on {}: {}", listen, e)))?;
    info!("Operator websocket listening on ws://{}/ws", listen);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { signalled(&mut shutdown).await })
        .await
        .map_err(|e| HelioError::Transport(e.to_string()))?;

    info!("Operator websocket stopped");
    Ok(())
}

async fn ws_endpoint(ws: WebSocketUpgrade, State(state): State<TransportState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// What to do with one inbound text frame.
pub fn accept_frame(text: &str) -> Result<Envelope, Outbound> {
    Envelope::parse(text).map_err(|e| Outbound::Error(Status::new(e.to_string())))
}

async fn handle_socket(socket: WebSocket, state: TransportState) {
    let Subscription {
        id,
        sink,
        mut frames,
    } = state.subscribers.subscribe(state.client_queue).await;
    info!(%id, "Operator connected");

    let (sender, mut receiver) = socket.split();
    let inbound = state.inbound.clone();
    let mut shutdown = state.shutdown.clone();

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            let notice = match msg {
                Ok(Message::Text(text)) => match accept_frame(&text) {
                    Ok(envelope) => {
                        if inbound.send(envelope).await.is_err() {
                            debug!("Controller inbound closed");
                            break;
                        }
                        continue;
                    }
                    Err(notice) => notice,
                },
                Ok(Message::Binary(_)) => Outbound::Error(Status::new(
                    "only text (json) websocket messages can be handled",
                )),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!("WebSocket receive error: {}", e);
                    break;
                }
            };
            if sink.try_send(notice.to_json()).is_err() {
                warn!("Could not queue error notice for operator");
            }
        }
    });

    forward_frames(sender, &mut frames, &mut recv_task, &mut shutdown).await;

    recv_task.abort();
    state.subscribers.unsubscribe(id).await;
    info!(%id, "Operator disconnected");
}

/// Write queued frames to one client until it goes away, its reader ends or
/// shutdown is signalled. On shutdown the client gets a close frame.
async fn forward_frames<S>(
    mut sender: S,
    frames: &mut mpsc::Receiver<String>,
    recv_task: &mut JoinHandle<()>,
    shutdown: &mut ShutdownSignal,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        tokio::select! {
            _ = signalled(shutdown) => {
                debug!("Closing operator connection for shutdown");
                if let Err(e) = sender.send(Message::Close(None)).await {
                    debug!("WebSocket close error: {}", e);
                }
                break;
            }
            frame = frames.recv() => match frame {
                Some(text) => {
                    if let Err(e) = sender.send(Message::Text(text)).await {
                        debug!("WebSocket send error: {}", e);
                        break;
                    }
                }
                None => break,
            },
            _ = &mut *recv_task => break,
        }
    }
}
