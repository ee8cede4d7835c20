//! Heliostat controller.
//!
//! One tokio task owns the [`ActiveConfig`] and the clock, so nothing here is
//! locked. The task selects over three event sources:
//!
//! - the shutdown signal
//! - inbound operator envelopes (decoded and dispatched in `handlers`)
//! - the periodic tick, which repositions the mirror
//!
//! ## Lifecycle
//!
//! `Idle → Running → ShuttingDown → Stopped`. The motion link is closed on
//! every way out of the loop, so no command is issued after `run` returns.
//!
//! ## Tick failures
//!
//! Recoverable errors (see [`HelioError::is_fatal`]) skip the tick and publish
//! a `Status` notice. A broken exchange ends the loop and `run` returns the
//! error.

mod handlers;
pub mod poller;
mod state;

pub use poller::spawn_status_poller;
pub use state::{ActiveConfig, Clock, DEFAULT_LOCATION};

use crate::ephemeris::SunEphemeris;
use crate::error::{HelioError, HelioResult};
use crate::geometry::{mirror_target, Direction};
use crate::hardware::gcode::{resolve_axes, AxisTarget};
use crate::hardware::MotionLink;
use crate::protocol::{Envelope, Outbound, Publisher, Reposition, Status};
use crate::shutdown::{signalled, ShutdownSignal};
use chrono::{DateTime, Utc};
use std::f64::consts::FRAC_PI_8;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Controller lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Constructed, loop not started.
    Idle,
    /// Event loop running.
    Running,
    /// Loop left, link being closed.
    ShuttingDown,
    /// Link closed; no further commands.
    Stopped,
}

/// Tuning for the control loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    /// Time between repositioning ticks.
    pub update_period: Duration,
    /// Largest accepted `MoveTargetRelative` step, radians.
    pub max_target_step: f64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            update_period: Duration::from_secs(30),
            max_target_step: FRAC_PI_8,
        }
    }
}

/// Result of a tick that did not end the loop.
#[derive(Debug)]
pub enum TickOutcome {
    /// The mirror was commanded to this axis position.
    Moved(AxisTarget),
    /// The tick was skipped for a recoverable reason.
    Skipped(HelioError),
}

/// Keeps the mirror pointed so the sun lands on the target.
pub struct Controller {
    config: ActiveConfig,
    clock: Clock,
    settings: ControllerSettings,
    state: ControllerState,
    link: Arc<dyn MotionLink>,
    ephemeris: Box<dyn SunEphemeris>,
    publisher: Publisher,
}

impl Controller {
    /// Create an idle controller with default ActiveConfig.
    pub fn new(
        link: Arc<dyn MotionLink>,
        ephemeris: Box<dyn SunEphemeris>,
        publisher: Publisher,
        settings: ControllerSettings,
    ) -> Self {
        let now = Utc::now();
        Self {
            config: ActiveConfig::starting_at(now),
            clock: Clock::new(now),
            settings,
            state: ControllerState::Idle,
            link,
            ephemeris,
            publisher,
        }
    }

    /// Current configuration.
    pub fn active_config(&self) -> &ActiveConfig {
        &self.config
    }

    /// Mutable configuration, for startup overrides.
    pub fn active_config_mut(&mut self) -> &mut ActiveConfig {
        &mut self.config
    }

    /// Clock state.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Loop tuning currently in effect.
    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Lifecycle state.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Run the event loop until shutdown or a fatal error.
    ///
    /// The first tick fires immediately so the mirror is positioned on start.
    ///
    /// # Errors
    /// The fatal link error that ended the loop.
    pub async fn run(
        &mut self,
        mut inbound: mpsc::Receiver<Envelope>,
        mut shutdown: ShutdownSignal,
    ) -> HelioResult<()> {
        self.state = ControllerState::Running;
        info!(
            port = self.link.port_name(),
            period = ?self.settings.update_period,
            "Controller running"
        );

        let mut ticker = new_ticker(Instant::now(), self.settings.update_period);
        let mut inbound_open = true;

        let result = loop {
            tokio::select! {
                biased;

                _ = signalled(&mut shutdown) => {
                    info!("Controller received shutdown signal");
                    break Ok(());
                }

                msg = inbound.recv(), if inbound_open => match msg {
                    Some(envelope) => {
                        let period = self.settings.update_period;
                        self.handle_envelope(envelope);
                        if self.settings.update_period != period {
                            ticker = new_ticker(
                                Instant::now() + self.settings.update_period,
                                self.settings.update_period,
                            );
                        }
                    }
                    None => {
                        debug!("Inbound channel closed, continuing on ticks only");
                        inbound_open = false;
                    }
                },

                _ = ticker.tick() => {
                    if let Err(e) = self.tick_at(Utc::now()).await {
                        break Err(e);
                    }
                }
            }
        };

        self.state = ControllerState::ShuttingDown;
        if let Err(e) = self.link.close().await {
            warn!("Error closing motion link: {}", e);
        }
        self.state = ControllerState::Stopped;
        info!("Controller stopped");

        result
    }

    /// Advance the clock to `now` and reposition the mirror.
    ///
    /// # Errors
    /// Only fatal errors are returned; recoverable ones come back as
    /// [`TickOutcome::Skipped`] after a `Status` notice is published.
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> HelioResult<TickOutcome> {
        self.clock.advance(now, &mut self.config);
        let time = self.clock.active_time(&self.config);

        let axes = match self.axes_at(time) {
            Ok(axes) => axes,
            Err(e) => return self.skip_or_fail(e),
        };

        match self
            .link
            .send_command_get_response(axes.to_gcode().as_bytes())
            .await
        {
            Ok(_) => {
                info!(
                    time = %time,
                    azimuth = axes.azimuth,
                    altitude = axes.altitude,
                    "Repositioned mirror"
                );
                self.publisher.publish(Outbound::Reposition(Reposition {
                    time,
                    azi: axes.azimuth,
                    ele: axes.altitude,
                }));
                Ok(TickOutcome::Moved(axes))
            }
            Err(e) => self.skip_or_fail(e),
        }
    }

    /// Mirror normal direction for `time` at the configured location.
    ///
    /// # Errors
    /// `DegenerateGeometry` or `OutOfRange` from the geometry engine.
    pub fn mirror_direction(&self, time: DateTime<Utc>) -> HelioResult<Direction> {
        let sun = self.ephemeris.sun_position(time, self.config.location);
        debug!(
            azimuth = sun.azimuth,
            altitude = sun.altitude,
            "Sun position"
        );
        mirror_target(sun, self.config.target)
    }

    fn axes_at(&self, time: DateTime<Utc>) -> HelioResult<AxisTarget> {
        let (azi_deg, alt_deg) = self.mirror_direction(time)?.to_degrees();
        resolve_axes(azi_deg, alt_deg, self.config.azi_offset, self.config.alt_offset)
    }

    fn skip_or_fail(&self, e: HelioError) -> HelioResult<TickOutcome> {
        if e.is_fatal() {
            error!("Lost motion link: {}", e);
            self.publisher
                .publish(Outbound::Status(Status::new(format!("motion link lost: {}", e))));
            Err(e)
        } else {
            warn!("Skipping reposition: {}", e);
            self.publisher
                .publish(Outbound::Status(Status::new(format!("skipped reposition: {}", e))));
            Ok(TickOutcome::Skipped(e))
        }
    }
}

fn new_ticker(start: Instant, period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
