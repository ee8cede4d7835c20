//! Process-wide shutdown signal.
//!
//! A single `watch` channel carries the signal. The controller, status poller,
//! fan-out task, websocket server and every open operator connection hold a
//! receiver and unwind when it
//! flips to `true` or when the sender is dropped.

use tokio::sync::watch;

/// Sending half, owned by `main`.
pub type ShutdownTrigger = watch::Sender<bool>;

/// Receiving half, cloned into every task.
pub type ShutdownSignal = watch::Receiver<bool>;

/// Create a fresh, unsignalled pair.
pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    watch::channel(false)
}

/// Resolve once shutdown has been requested.
///
/// Cancel-safe, so it can sit in a `tokio::select!` arm inside a loop.
pub async fn signalled(signal: &mut ShutdownSignal) {
    while !*signal.borrow_and_update() {
        if signal.changed().await.is_err() {
            return;
        }
    }
}
