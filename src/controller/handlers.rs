//! Operator message handlers.
//!
//! Every handler runs on the controller task and mutates the ActiveConfig in
//! place. Replies go out through the publisher and never block.

use super::Controller;
use crate::error::HelioError;
use crate::geometry::wrap_pi;
use crate::protocol::{
    ConfigUpdate, Envelope, Inbound, MoveTargetRelative, Outbound, SetTime, SetUpdateFreq, Status,
};
use chrono::Utc;
use std::f64::consts::FRAC_PI_2;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Direction of a relative target move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Nudge {
    Up,
    Down,
    Left,
    Right,
}

impl Nudge {
    fn parse(direction: &str) -> Option<Self> {
        match direction.trim().to_ascii_lowercase().as_str() {
            "up" => Some(Nudge::Up),
            "down" => Some(Nudge::Down),
            "left" => Some(Nudge::Left),
            "right" => Some(Nudge::Right),
            _ => None,
        }
    }
}

impl Controller {
    /// Decode an envelope and dispatch it.
    ///
    /// Unknown tags are logged and dropped. A known tag whose payload does not
    /// decode is answered with a negative `Ack`.
    pub fn handle_envelope(&mut self, envelope: Envelope) {
        match Inbound::decode(&envelope) {
            Ok(msg) => self.handle(msg),
            Err(HelioError::UnhandledMessageType(t)) => {
                warn!("Controller dropped message with type {} as no handler is defined", t);
            }
            Err(e) => {
                warn!("Controller could not decode message: {}", e);
                self.publisher.publish(Outbound::ack(false));
            }
        }
    }

    /// Dispatch a decoded message.
    pub fn handle(&mut self, msg: Inbound) {
        debug!(?msg, "Handling operator message");
        match msg {
            Inbound::UpdateConfig(update) => self.update_config(update),
            Inbound::GetConfig => {
                self.publisher
                    .publish(Outbound::ActiveConfig(self.config.clone()));
            }
            Inbound::MoveTargetRelative(m) => self.move_target_relative(m),
            Inbound::SetTime(st) => self.set_time(st),
            Inbound::ResetTime => {
                self.clock.advance(Utc::now(), &mut self.config);
                self.clock.using_override_time = false;
                info!("Reverted to wall-clock time");
                self.publisher.publish(Outbound::ack(true));
            }
            Inbound::SetUpdateFreq(freq) => self.set_update_freq(freq),
            Inbound::GetTargetPosition => self.target_position(),
        }
    }

    fn update_config(&mut self, update: ConfigUpdate) {
        info!(
            lat = update.loc.lat,
            long = update.loc.long,
            "Updated location"
        );
        self.config.location = update.loc;
    }

    fn move_target_relative(&mut self, m: MoveTargetRelative) {
        let Some(nudge) = Nudge::parse(&m.direction) else {
            warn!("Unknown target direction {:?}", m.direction);
            self.publisher.publish(Outbound::ack(false));
            return;
        };
        if !m.amount.is_finite() {
            warn!("Rejected target step {}", m.amount);
            self.publisher.publish(Outbound::ack(false));
            return;
        }

        let max = self.settings.max_target_step;
        let amount = m.amount.clamp(-max, max);
        let target = &mut self.config.target;
        match nudge {
            Nudge::Up => target.altitude = (target.altitude + amount).clamp(0.0, FRAC_PI_2),
            Nudge::Down => target.altitude = (target.altitude - amount).clamp(0.0, FRAC_PI_2),
            Nudge::Left => target.azimuth = wrap_pi(target.azimuth - amount),
            Nudge::Right => target.azimuth = wrap_pi(target.azimuth + amount),
        }
        info!(
            azimuth = target.azimuth,
            altitude = target.altitude,
            "Moved target {:?} by {}",
            nudge,
            amount
        );
        self.publisher.publish(Outbound::ack(true));
    }

    fn set_time(&mut self, st: SetTime) {
        if let Some(factor) = st.progression_factor {
            if !factor.is_finite() || factor < 0.0 {
                warn!("Rejected time progression factor {}", factor);
                self.publisher.publish(Outbound::ack(false));
                return;
            }
        }
        // Settle the time already elapsed at the old factor; the new time
        // and factor apply from this moment on.
        self.clock.advance(Utc::now(), &mut self.config);
        if let Some(factor) = st.progression_factor {
            self.config.time_progression = factor;
        }
        self.config.override_time = st.datetime;
        self.clock.using_override_time = true;
        info!(
            time = %st.datetime,
            progression = self.config.time_progression,
            "Using override time"
        );
        self.publisher.publish(Outbound::ack(true));
    }

    fn set_update_freq(&mut self, freq: SetUpdateFreq) {
        match Duration::try_from_secs_f64(freq.period) {
            Ok(period) if !period.is_zero() => {
                info!(?period, "Update period changed");
                self.settings.update_period = period;
                self.publisher.publish(Outbound::ack(true));
            }
            _ => {
                warn!("Rejected update period {}", freq.period);
                self.publisher.publish(Outbound::ack(false));
            }
        }
    }

    fn target_position(&self) {
        let time = self.clock.active_time(&self.config);
        match self.mirror_direction(time) {
            Ok(direction) => {
                self.publisher.publish(Outbound::TargetPosition(direction));
            }
            Err(e) => {
                self.publisher.publish(Outbound::Status(Status::new(format!(
                    "no mirror target at {}: {}",
                    time, e
                ))));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerSettings;
    use crate::ephemeris::FixedSun;
    use crate::geometry::Direction;
    use crate::hardware::mock::MockLink;
    use crate::protocol::Publisher;
    use std::f64::consts::{FRAC_PI_8, PI};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tracing_test::traced_test;

    fn controller() -> (Controller, mpsc::Receiver<Outbound>) {
        let (publisher, rx) = Publisher::channel(16);
        let c = Controller::new(
            Arc::new(MockLink::new()),
            Box::new(FixedSun(Direction::new(FRAC_PI_2, 0.0))),
            publisher,
            ControllerSettings::default(),
        );
        (c, rx)
    }

    fn envelope(text: &str) -> Envelope {
        Envelope::parse(text).unwrap()
    }

    #[test]
    fn test_nudge_parse() {
        assert_eq!(Nudge::parse("Left"), Some(Nudge::Left));
        assert_eq!(Nudge::parse("sideways"), None);
    }

    #[test]
    fn test_move_right_wraps() {
        let (mut c, mut rx) = controller();
        c.active_config_mut().target.azimuth = PI - 0.01;

        c.handle_envelope(envelope(
            r#"{"t":"MoveTargetRelative","d":{"direction":"right","radians":0.1}}"#,
        ));

        let azi = c.active_config().target.azimuth;
        assert!(azi > -PI && azi <= PI);
        assert!((azi - (-PI + 0.09)).abs() < 1e-9);
        assert_eq!(rx.try_recv().unwrap(), Outbound::ack(true));
    }

    #[test]
    fn test_move_right_by_half_turn_is_clamped() {
        let (mut c, mut rx) = controller();
        c.active_config_mut().target.azimuth = 3.0 * PI / 4.0;
        let right = format!(
            r#"{{"t":"MoveTargetRelative","d":{{"direction":"right","radians":{}}}}}"#,
            PI
        );

        c.handle_envelope(envelope(&right));
        assert!((c.active_config().target.azimuth - 7.0 * PI / 8.0).abs() < 1e-12);
        assert_eq!(rx.try_recv().unwrap(), Outbound::ack(true));

        c.handle_envelope(envelope(&right));
        c.handle_envelope(envelope(&right));
        let azi = c.active_config().target.azimuth;
        assert!(azi > -PI && azi <= PI);
        assert!((azi + 7.0 * PI / 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_move_clamps_step() {
        let (mut c, _rx) = controller();
        c.handle_envelope(envelope(
            r#"{"t":"MoveTargetRelative","d":{"direction":"up","radians":3.0}}"#,
        ));
        assert!((c.active_config().target.altitude - FRAC_PI_8).abs() < 1e-12);
    }

    #[test]
    fn test_move_down_stops_at_horizon() {
        let (mut c, _rx) = controller();
        c.handle_envelope(envelope(
            r#"{"t":"MoveTargetRelative","d":{"direction":"down","radians":0.2}}"#,
        ));
        assert_eq!(c.active_config().target.altitude, 0.0);
    }

    #[test]
    fn test_unknown_direction_nacks() {
        let (mut c, mut rx) = controller();
        let before = c.active_config().clone();
        c.handle_envelope(envelope(
            r#"{"t":"MoveTargetRelative","d":{"direction":"sideways","radians":0.1}}"#,
        ));
        assert_eq!(c.active_config(), &before);
        assert_eq!(rx.try_recv().unwrap(), Outbound::ack(false));
    }

    #[test]
    fn test_update_config_replaces_only_location() {
        let (mut c, _rx) = controller();
        c.active_config_mut().azi_offset = 3.0;
        c.handle_envelope(envelope(
            r#"{"t":"UpdateConfig","d":{"loc":{"lat":51.5,"long":-0.12},"azimuth_offset":7}}"#,
        ));
        assert_eq!(c.active_config().location.lat, 51.5);
        assert_eq!(c.active_config().azi_offset, 3.0);
    }

    #[test]
    fn test_get_config_publishes_snapshot() {
        let (mut c, mut rx) = controller();
        c.handle_envelope(envelope(r#"{"t":"GetConfig","d":{}}"#));
        match rx.try_recv().unwrap() {
            Outbound::ActiveConfig(cfg) => assert_eq!(&cfg, c.active_config()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    #[traced_test]
    fn test_unknown_tag_dropped_silently() {
        let (mut c, mut rx) = controller();
        c.handle_envelope(envelope(r#"{"t":"Dance","d":{}}"#));
        assert!(rx.try_recv().is_err());
        assert!(logs_contain("no handler is defined"));
    }

    #[test]
    fn test_bad_payload_nacks() {
        let (mut c, mut rx) = controller();
        c.handle_envelope(envelope(r#"{"t":"UpdateConfig","d":{"loc":5}}"#));
        assert_eq!(rx.try_recv().unwrap(), Outbound::ack(false));
    }

    #[test]
    fn test_set_and_reset_time() {
        let (mut c, mut rx) = controller();
        c.handle_envelope(envelope(
            r#"{"t":"SetTime","d":{"datetime":"2023-12-21T23:00:00Z","progression_factor":0}}"#,
        ));
        assert!(c.clock().using_override_time);
        assert_eq!(c.active_config().time_progression, 0.0);
        assert_eq!(
            c.clock().active_time(c.active_config()).to_rfc3339(),
            "2023-12-21T23:00:00+00:00"
        );
        assert_eq!(rx.try_recv().unwrap(), Outbound::ack(true));

        c.handle_envelope(envelope(r#"{"t":"ResetTime","d":{}}"#));
        assert!(!c.clock().using_override_time);
        assert_eq!(rx.try_recv().unwrap(), Outbound::ack(true));
    }

    #[test]
    fn test_set_time_starts_counting_when_received() {
        let (mut c, _rx) = controller();
        c.clock.last_update = Utc::now() - chrono::Duration::seconds(29);

        c.handle_envelope(envelope(
            r#"{"t":"SetTime","d":{"datetime":"2024-01-01T00:00:00Z","progression_factor":1}}"#,
        ));
        let next_tick = c.clock().last_update + chrono::Duration::seconds(1);
        c.clock.advance(next_tick, &mut c.config);

        assert_eq!(
            c.clock().active_time(c.active_config()).to_rfc3339(),
            "2024-01-01T00:00:01+00:00"
        );
    }

    #[test]
    fn test_new_factor_is_not_retroactive() {
        let (mut c, _rx) = controller();
        let before = Utc::now() - chrono::Duration::seconds(10);
        c.clock.last_update = before;
        c.clock.using_override_time = true;
        c.config.override_time = before;

        c.handle_envelope(envelope(
            r#"{"t":"SetTime","d":{"datetime":"2024-01-01T00:00:00Z","progression_factor":60}}"#,
        ));
        assert!(c.clock().last_update >= before + chrono::Duration::seconds(10));
        assert_eq!(c.active_config().time_progression, 60.0);

        let next_tick = c.clock().last_update + chrono::Duration::seconds(2);
        c.clock.advance(next_tick, &mut c.config);
        assert_eq!(
            c.active_config().override_time.to_rfc3339(),
            "2024-01-01T00:02:00+00:00"
        );
    }

    #[test]
    fn test_set_update_freq() {
        let (mut c, mut rx) = controller();
        c.handle_envelope(envelope(r#"{"t":"SetUpdateFreq","d":{"period":2.5}}"#));
        assert_eq!(c.settings().update_period, Duration::from_millis(2500));
        assert_eq!(rx.try_recv().unwrap(), Outbound::ack(true));

        c.handle_envelope(envelope(r#"{"t":"SetUpdateFreq","d":{"period":0}}"#));
        assert_eq!(c.settings().update_period, Duration::from_millis(2500));
        assert_eq!(rx.try_recv().unwrap(), Outbound::ack(false));
    }

    #[test]
    fn test_get_target_position() {
        let (mut c, mut rx) = controller();
        c.handle_envelope(envelope(r#"{"t":"GetTargetPosition"}"#));
        match rx.try_recv().unwrap() {
            Outbound::TargetPosition(d) => {
                assert!((d.azimuth - std::f64::consts::FRAC_PI_4).abs() < 1e-9);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
