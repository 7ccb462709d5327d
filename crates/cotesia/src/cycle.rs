//! Flight-cycle state machine.
//!
//! One engine instance owns the whole mission state: the current phase,
//! the distance accumulated since the last release, the stop timer, and
//! the open session. It advances once per telemetry tick and is the
//! only writer of any of this state. Elapsed time is measured from
//! sample timestamps rather than the wall clock, so a replayed sample
//! sequence always produces the same decisions.
//!
//! Side effects of a transition are strictly ordered: decision, then
//! the actuator command, then the session record, and only then does
//! the phase advance. A refused trigger leaves the phase unchanged and
//! the same decision fires again on the next tick.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::actuator::{ActuatorDriver, Channel};
use crate::config::Thresholds;
use crate::error::{Error, Result};
use crate::session::{ActiveSession, FlightReport, SessionStore, TriggerReason};
use crate::telemetry::FixSample;

/// Mean Earth radius in meters, for great-circle distances.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Single-step position delta at or above this is a GPS glitch.
const JUMP_REJECT_M: f64 = 100.0;

/// Minimum spacing of report speed samples, in seconds.
const SPEED_SAMPLE_INTERVAL_SECS: f64 = 5.0;

/// Phase of the flight cycle. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    /// Waiting for a usable fix and a moving vehicle.
    AwaitingGps,
    /// Airborne; waiting for the first full stop.
    FirstStop,
    /// First release done; waiting for operating speed.
    Resuming,
    /// Cruising; releases fire on the distance interval.
    NormalOperation,
    /// Mission over. A start command re-arms the machine.
    Finished,
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitingGps => write!(f, "awaiting_gps"),
            Self::FirstStop => write!(f, "first_stop"),
            Self::Resuming => write!(f, "resuming"),
            Self::NormalOperation => write!(f, "normal_operation"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// Great-circle distance between two `(latitude, longitude)` points,
/// in meters.
#[must_use]
pub fn haversine_m(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// The flight-cycle engine.
pub struct CycleEngine {
    thresholds: Thresholds,
    state: CycleState,
    session: Option<ActiveSession>,
    next_channel: Channel,
    distance_m: f64,
    stop_timer_secs: f64,
    below_operating_speed: bool,
    anchor: Option<(f64, f64)>,
    last_usable_at: Option<DateTime<Utc>>,
    gap_since_usable: bool,
    last_speed_sample_at: Option<DateTime<Utc>>,
    last_sample: Option<FixSample>,
}

impl std::fmt::Debug for CycleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleEngine")
            .field("state", &self.state)
            .field("distance_m", &self.distance_m)
            .field("stop_timer_secs", &self.stop_timer_secs)
            .finish_non_exhaustive()
    }
}

impl CycleEngine {
    /// Create an engine in `AwaitingGps` with the given thresholds.
    #[must_use]
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            state: CycleState::AwaitingGps,
            session: None,
            next_channel: Channel::A,
            distance_m: 0.0,
            stop_timer_secs: 0.0,
            below_operating_speed: false,
            anchor: None,
            last_usable_at: None,
            gap_since_usable: false,
            last_speed_sample_at: None,
            last_sample: None,
        }
    }

    /// Current phase.
    #[must_use]
    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Current thresholds.
    #[must_use]
    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Distance accumulated since the last release, meters.
    #[must_use]
    pub fn distance_m(&self) -> f64 {
        self.distance_m
    }

    /// Seconds spent below operating speed in `NormalOperation`.
    #[must_use]
    pub fn stop_timer_secs(&self) -> f64 {
        self.stop_timer_secs
    }

    /// Global number of the open flight, if one is active.
    #[must_use]
    pub fn flight_number(&self) -> Option<u32> {
        self.session.as_ref().map(ActiveSession::global_number)
    }

    /// Actuation count of the open flight, if one is active.
    #[must_use]
    pub fn flight_actuations(&self) -> Option<u64> {
        self.session.as_ref().map(ActiveSession::actuation_count)
    }

    /// The most recent sample the engine has seen.
    #[must_use]
    pub fn last_sample(&self) -> Option<&FixSample> {
        self.last_sample.as_ref()
    }

    /// Advance the machine by one telemetry tick.
    ///
    /// Unusable samples pause the cycle: they advance neither the
    /// distance accumulator nor the stop timer, and reset neither.
    ///
    /// # Errors
    ///
    /// Actuator faults ([`Error::is_recoverable`]) abort the pending
    /// transition for this tick only; storage faults are surfaced
    /// immediately since no release may fire without a trusted record.
    pub fn tick(
        &mut self,
        sample: &FixSample,
        actuator: &mut dyn ActuatorDriver,
        store: &SessionStore,
    ) -> Result<()> {
        if !sample.usable {
            self.gap_since_usable = true;
            self.last_sample = Some(sample.clone());
            debug!("unusable fix ({} sats, pdop {:.1}); cycle paused", sample.satellites, sample.pdop);
            return Ok(());
        }

        let result = match self.state {
            CycleState::AwaitingGps => self.tick_awaiting(sample, store),
            CycleState::FirstStop => self.tick_first_stop(sample, actuator),
            CycleState::Resuming => self.tick_resuming(sample),
            CycleState::NormalOperation => self.tick_normal(sample, actuator, store),
            CycleState::Finished => Ok(()),
        };
        self.last_sample = Some(sample.clone());
        result
    }

    fn advance_anchor(&mut self, sample: &FixSample) {
        self.anchor = Some(sample.position());
        self.last_usable_at = Some(sample.timestamp);
        self.gap_since_usable = false;
    }

    /// Seconds since the previous usable sample, zero across a gap.
    fn usable_delta_secs(&self, sample: &FixSample) -> f64 {
        if self.gap_since_usable {
            return 0.0;
        }
        self.last_usable_at.map_or(0.0, |prev| {
            (sample.timestamp - prev).num_milliseconds().max(0) as f64 / 1000.0
        })
    }

    fn tick_awaiting(&mut self, sample: &FixSample, store: &SessionStore) -> Result<()> {
        if sample.speed_ms >= self.thresholds.start_speed_ms {
            let now = Local::now();
            let (global, daily) = store.next_numbers(now)?;
            let session = store.create_session(global, daily, now)?;
            info!(
                "standing start detected at {:.1} m/s; flight {global} opened",
                sample.speed_ms
            );
            self.session = Some(session);
            self.next_channel = Channel::A;
            self.distance_m = 0.0;
            self.stop_timer_secs = 0.0;
            self.below_operating_speed = false;
            self.last_speed_sample_at = None;
            self.state = CycleState::FirstStop;
        }
        self.advance_anchor(sample);
        Ok(())
    }

    fn tick_first_stop(&mut self, sample: &FixSample, actuator: &mut dyn ActuatorDriver) -> Result<()> {
        if sample.speed_ms <= self.thresholds.stop_speed_ms {
            let channel = self.next_channel;
            actuator.trigger(channel)?;
            let session = self
                .session
                .as_mut()
                .ok_or_else(|| Error::internal("first-stop phase with no open session"))?;
            session.record_actuation(
                sample.timestamp,
                sample.latitude,
                sample.longitude,
                TriggerReason::FirstStop,
            )?;
            self.next_channel = channel.other();
            self.distance_m = 0.0;
            self.state = CycleState::Resuming;
            info!("first stop: release fired on channel {channel}");
        }
        self.advance_anchor(sample);
        Ok(())
    }

    fn tick_resuming(&mut self, sample: &FixSample) -> Result<()> {
        if sample.speed_ms >= self.thresholds.operating_speed_ms {
            self.state = CycleState::NormalOperation;
            info!(
                "operating speed reached ({:.1} m/s); interval releases armed",
                sample.speed_ms
            );
        }
        self.advance_anchor(sample);
        Ok(())
    }

    fn tick_normal(
        &mut self,
        sample: &FixSample,
        actuator: &mut dyn ActuatorDriver,
        store: &SessionStore,
    ) -> Result<()> {
        let step = self
            .anchor
            .map_or(0.0, |a| haversine_m(a, sample.position()));
        if step >= JUMP_REJECT_M {
            warn!("GPS jump of {step:.0} m rejected");
            self.gap_since_usable = true;
            return Ok(());
        }

        let dt = self.usable_delta_secs(sample);
        // Distance toward the next release accrues only at operating
        // speed; a decelerating or crawling vehicle never triggers.
        let at_operating_speed = sample.speed_ms >= self.thresholds.operating_speed_ms;
        if at_operating_speed {
            self.distance_m += step;
            self.below_operating_speed = false;
            self.stop_timer_secs = 0.0;
        } else if self.below_operating_speed {
            self.stop_timer_secs += dt;
        } else {
            self.below_operating_speed = true;
            self.stop_timer_secs = 0.0;
        }
        self.advance_anchor(sample);

        let speed_sample_due = self.last_speed_sample_at.map_or(true, |prev| {
            (sample.timestamp - prev).num_milliseconds() as f64 / 1000.0
                >= SPEED_SAMPLE_INTERVAL_SECS
        });

        let trigger_due = at_operating_speed && self.distance_m >= self.thresholds.trigger_distance_m;
        let channel = self.next_channel;
        if trigger_due {
            actuator.trigger(channel)?;
        }

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::internal("normal-operation phase with no open session"))?;
        if trigger_due {
            session.record_actuation(
                sample.timestamp,
                sample.latitude,
                sample.longitude,
                TriggerReason::DistanceInterval,
            )?;
            self.next_channel = channel.other();
            self.distance_m = 0.0;
            info!("interval release fired on channel {channel}");
        } else {
            session.record_coordinate(sample.latitude, sample.longitude)?;
        }
        if speed_sample_due {
            session.record_speed(sample.speed_ms);
            self.last_speed_sample_at = Some(sample.timestamp);
        }

        if self.stop_timer_secs >= self.thresholds.stop_duration_secs {
            info!(
                "below operating speed for {:.1}s; finalizing flight",
                self.stop_timer_secs
            );
            self.finalize_session(sample.timestamp, store)?;
        }
        Ok(())
    }

    fn finalize_session(&mut self, finished_at: DateTime<Utc>, store: &SessionStore) -> Result<()> {
        self.state = CycleState::Finished;
        if let Some(session) = self.session.take() {
            let report = self.report_snapshot();
            store.finalize(session, finished_at, &report)?;
        }
        Ok(())
    }

    fn report_snapshot(&self) -> FlightReport {
        let (satellites, pdop) = self
            .last_sample
            .as_ref()
            .map_or((0, 0.0), |s| (s.satellites, s.pdop));
        FlightReport {
            trigger_distance_m: self.thresholds.trigger_distance_m,
            satellites,
            pdop,
        }
    }

    /// Re-arm the machine for a new flight after `Finished`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FlightInProgress`] while a session is open.
    pub fn start_flight(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::FlightInProgress);
        }
        self.clear_mission_state();
        self.state = CycleState::AwaitingGps;
        info!("flight cycle armed");
        Ok(())
    }

    /// Finalize the current flight from any non-terminal phase.
    ///
    /// The stop is recorded as a non-actuation event.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be finalized.
    pub fn manual_stop(&mut self, store: &SessionStore) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            let position = self.last_sample.as_ref().map(FixSample::position);
            session.record_stop(Utc::now(), position)?;
            let report = self.report_snapshot();
            store.finalize(session, Utc::now(), &report)?;
        }
        self.state = CycleState::Finished;
        self.clear_mission_state();
        info!("manual stop: flight cycle finished");
        Ok(())
    }

    /// Discard mission state and return to `AwaitingGps`.
    ///
    /// An open session directory stays on disk, marked incomplete.
    ///
    /// # Errors
    ///
    /// Returns an error if the incomplete marker cannot be written.
    pub fn reset(&mut self, store: &SessionStore) -> Result<()> {
        if let Some(session) = self.session.take() {
            store.abandon(session)?;
        }
        self.state = CycleState::AwaitingGps;
        self.clear_mission_state();
        info!("flight cycle reset");
        Ok(())
    }

    /// Replace the thresholds, rejecting invalid values.
    ///
    /// # Errors
    ///
    /// Returns a validation error; the prior thresholds stay in effect.
    pub fn update_thresholds(&mut self, thresholds: Thresholds) -> Result<()> {
        thresholds.validate()?;
        self.thresholds = thresholds;
        info!(
            "thresholds updated: trigger every {:.1} m, stop below {:.1} m/s for {:.1}s",
            thresholds.trigger_distance_m, thresholds.stop_speed_ms, thresholds.stop_duration_secs
        );
        Ok(())
    }

    fn clear_mission_state(&mut self) {
        self.distance_m = 0.0;
        self.stop_timer_secs = 0.0;
        self.below_operating_speed = false;
        self.next_channel = Channel::A;
        self.anchor = None;
        self.last_usable_at = None;
        self.gap_since_usable = false;
        self.last_speed_sample_at = None;
    }
}
