//! Background status poller.
//!
//! Queries the motion controller's real-time status at a fixed period and
//! publishes it as `DeviceStatus`. Polls share the link mutex with the control
//! loop, so they slot in between repositioning exchanges. Failures are only
//! logged: deciding that the link is dead belongs to the controller.

use crate::hardware::{MachineStatus, MotionLink};
use crate::protocol::{Outbound, Publisher};
use crate::shutdown::{signalled, ShutdownSignal};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Spawn the poller. It exits when `shutdown` fires.
pub fn spawn_status_poller(
    link: Arc<dyn MotionLink>,
    period: Duration,
    publisher: Publisher,
    mut shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut failing = false;

        loop {
            tokio::select! {
                biased;
                _ = signalled(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }

            match link.get_status().await {
                Ok(line) => {
                    failing = false;
                    match MachineStatus::parse(&line) {
                        Some(status) => {
                            debug!(state = %status.state, mpos = ?status.mpos, "Device status");
                            publisher.publish(Outbound::DeviceStatus(status));
                        }
                        None => debug!(
                            "Ignoring unrecognised status line {:?}",
                            String::from_utf8_lossy(&line).trim()
                        ),
                    }
                }
                // Only the first failure of a run is worth a warning.
                Err(e) if !failing => {
                    failing = true;
                    warn!("Status poll failed: {}", e);
                }
                Err(e) => debug!("Status poll failed: {}", e),
            }
        }

        info!("Status poller stopped");
    })
}
