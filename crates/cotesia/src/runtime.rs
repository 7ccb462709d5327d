//! Control loop.
//!
//! Wires the telemetry source, the cycle engine, the actuator driver,
//! and the session store into a single tick loop. Each tick drains the
//! queued commands, feeds every pending fix through the engine, and
//! publishes one status snapshot. All mission state lives inside this
//! loop; nothing else mutates it.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::actuator::{ActuatorDriver, PwmActuator, SimulatedActuator};
use crate::config::Config;
use crate::cycle::CycleEngine;
use crate::error::Result;
use crate::seal;
use crate::session::SessionStore;
use crate::status::{control_channel, Command, ControlHandle, ControlPort, StatusSnapshot};
use crate::telemetry::TelemetrySource;

/// The assembled controller.
pub struct Controller {
    telemetry: TelemetrySource,
    actuator: Box<dyn ActuatorDriver>,
    store: SessionStore,
    engine: CycleEngine,
    port: ControlPort,
    tick_interval: Duration,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("state", &self.engine.state())
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Assemble a controller from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the flight data directory cannot be opened.
    pub fn new(config: &Config) -> Result<(Self, ControlHandle)> {
        let telemetry = TelemetrySource::new(&config.telemetry);
        let actuator: Box<dyn ActuatorDriver> = if config.actuator.simulate {
            info!("actuator in simulation mode; no hardware will be driven");
            Box::new(SimulatedActuator::new(&config.actuator))
        } else {
            Box::new(PwmActuator::new(config.actuator.clone()))
        };
        let sealer = seal::resolve(&config.log_key_path());
        let store = SessionStore::open(config.data_dir(), sealer)?;

        Ok(Self::assemble(
            telemetry,
            actuator,
            store,
            config.cycle,
            config.tick_interval(),
        ))
    }

    /// Assemble a controller from already-built parts.
    #[must_use]
    pub fn assemble(
        telemetry: TelemetrySource,
        actuator: Box<dyn ActuatorDriver>,
        store: SessionStore,
        thresholds: crate::config::Thresholds,
        tick_interval: Duration,
    ) -> (Self, ControlHandle) {
        let (handle, port) = control_channel(thresholds);
        (
            Self {
                telemetry,
                actuator,
                store,
                engine: CycleEngine::new(thresholds),
                port,
                tick_interval,
            },
            handle,
        )
    }

    /// Run the tick loop until a storage fault makes the record
    /// untrustworthy.
    ///
    /// Transient faults (GPS disconnects, actuator unavailability) are
    /// absorbed and retried; only storage faults terminate the loop,
    /// since no release may fire without a durable record.
    ///
    /// # Errors
    ///
    /// Returns the storage fault that stopped the loop.
    pub async fn run(mut self) -> Result<()> {
        info!(
            "controller running, tick every {} ms",
            self.tick_interval.as_millis()
        );
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.step()?;
        }
    }

    /// One tick: drain commands, feed pending fixes, publish the
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns storage faults only; everything else is logged and
    /// retried on the next tick.
    pub fn step(&mut self) -> Result<()> {
        for command in self.port.drain_commands() {
            self.apply(command)?;
        }

        while let Some(sample) = self.telemetry.poll() {
            match self.engine.tick(&sample, self.actuator.as_mut(), &self.store) {
                Ok(()) => {}
                Err(e) if e.is_recoverable() => {
                    warn!("tick deferred: {e}");
                }
                Err(e) => {
                    error!("storage fault, stopping releases: {e}");
                    self.port.publish(self.snapshot());
                    return Err(e);
                }
            }
        }

        self.port.publish(self.snapshot());
        Ok(())
    }

    fn apply(&mut self, command: Command) -> Result<()> {
        let result = match command {
            Command::StartFlight => self.engine.start_flight(),
            Command::StopFlight => self.engine.manual_stop(&self.store),
            Command::Reset => {
                if let Err(e) = self.actuator.reset() {
                    warn!("actuator reset failed: {e}");
                }
                self.engine.reset(&self.store)
            }
            Command::TestActuator => {
                if let Err(e) = self.actuator.test() {
                    warn!("actuator test failed: {e}");
                }
                Ok(())
            }
            Command::UpdateThresholds(thresholds) => self.engine.update_thresholds(thresholds),
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_storage_fault() => Err(e),
            Err(e) => {
                warn!("command refused: {e}");
                Ok(())
            }
        }
    }

    fn snapshot(&self) -> StatusSnapshot {
        let last = self.engine.last_sample();
        StatusSnapshot {
            state: self.engine.state(),
            flight_number: self.engine.flight_number(),
            connection: self.telemetry.connection_state(),
            satellites: last.map_or(0, |s| s.satellites),
            pdop: last.map_or(0.0, |s| s.pdop),
            speed_ms: last.map_or(0.0, |s| s.speed_ms),
            distance_m: self.engine.distance_m(),
            stop_timer_secs: self.engine.stop_timer_secs(),
            actuations: self.actuator.activation_count(),
            thresholds: self.engine.thresholds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::SimulatedActuator;
    use crate::config::{TelemetryConfig, Thresholds};
    use crate::cycle::CycleState;
    use crate::seal::Passthrough;
    use crate::telemetry::{PortOpener, SentencePort};
    use std::collections::VecDeque;
    use std::io;

    const GGA_FAST_PREREQS: [&str; 2] = [
        "$GPGSA,A,3,04,05,,09,12,,,24,,,,,2.5,1.3,2.1*39",
        "$GPRMC,225446,A,4916.45,N,12311.12,W,011.7,054.7,191194,020.3,E*6A",
    ];
    const GGA_GOOD: &str = "$GPGGA,092750.000,5321.6802,N,00630.3372,W,1,8,1.03,61.7,M,55.2,M,,*76";

    #[derive(Debug, Default)]
    struct ScriptPort {
        lines: VecDeque<String>,
    }

    impl SentencePort for ScriptPort {
        fn read_sentence(&mut self) -> io::Result<Option<String>> {
            Ok(self.lines.pop_front())
        }
    }

    #[derive(Debug, Default)]
    struct ScriptOpener {
        lines: Vec<String>,
    }

    impl PortOpener for ScriptOpener {
        fn open(&mut self) -> io::Result<Box<dyn SentencePort>> {
            Ok(Box::new(ScriptPort {
                lines: self.lines.drain(..).collect(),
            }))
        }
    }

    fn controller_with(lines: &[&str]) -> (Controller, ControlHandle) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path(), Box::new(Passthrough)).unwrap();
        // The tempdir guard must outlive the store; leak it in tests
        std::mem::forget(dir);

        let config = TelemetryConfig {
            reconnect_backoff_secs: 0,
            ..TelemetryConfig::default()
        };
        let opener = ScriptOpener {
            lines: lines.iter().map(|l| (*l).to_string()).collect(),
        };
        let telemetry = TelemetrySource::with_opener(Box::new(opener), &config);

        Controller::assemble(
            telemetry,
            Box::new(SimulatedActuator::unguarded()),
            store,
            Thresholds::default(),
            Duration::from_millis(1000),
        )
    }

    #[test]
    fn test_step_publishes_snapshot() {
        let mut lines: Vec<&str> = GGA_FAST_PREREQS.to_vec();
        lines.push(GGA_GOOD);
        let (mut controller, handle) = controller_with(&lines);

        controller.step().unwrap();

        let snap = handle.snapshot();
        assert_eq!(snap.satellites, 8);
        assert!(snap.speed_ms > 5.0);
        // A fast usable fix opened a flight and moved to FirstStop
        assert_eq!(snap.state, CycleState::FirstStop);
        assert_eq!(snap.flight_number, Some(1));
        assert_eq!(snap.actuations, 0);
    }

    #[test]
    fn test_commands_applied_at_tick_boundary() {
        let (mut controller, handle) = controller_with(&[]);

        handle.send(Command::TestActuator).unwrap();
        let mut thresholds = Thresholds::default();
        thresholds.trigger_distance_m = 40.0;
        handle.send(Command::UpdateThresholds(thresholds)).unwrap();

        // Nothing changes until the next tick
        assert!(
            (handle.snapshot().thresholds.trigger_distance_m - 25.0).abs() < f64::EPSILON
        );

        controller.step().unwrap();

        let snap = handle.snapshot();
        assert!((snap.thresholds.trigger_distance_m - 40.0).abs() < f64::EPSILON);
        // test() never counts as an actuation
        assert_eq!(snap.actuations, 0);
    }

    #[test]
    fn test_stop_without_flight_reaches_finished() {
        let (mut controller, handle) = controller_with(&[]);

        handle.send(Command::StopFlight).unwrap();
        controller.step().unwrap();
        assert_eq!(handle.snapshot().state, CycleState::Finished);

        handle.send(Command::StartFlight).unwrap();
        controller.step().unwrap();
        assert_eq!(handle.snapshot().state, CycleState::AwaitingGps);
    }

    #[test]
    fn test_refused_command_does_not_stop_loop() {
        let mut lines: Vec<&str> = GGA_FAST_PREREQS.to_vec();
        lines.push(GGA_GOOD);
        let (mut controller, handle) = controller_with(&lines);

        controller.step().unwrap();
        assert_eq!(handle.snapshot().state, CycleState::FirstStop);

        // Starting mid-flight is refused but the loop keeps running
        handle.send(Command::StartFlight).unwrap();
        controller.step().unwrap();
        assert_eq!(handle.snapshot().state, CycleState::FirstStop);
    }

    #[test]
    fn test_empty_tick_keeps_waiting() {
        let (mut controller, handle) = controller_with(&[]);

        controller.step().unwrap();

        let snap = handle.snapshot();
        assert_eq!(snap.state, CycleState::AwaitingGps);
        assert_eq!(snap.satellites, 0);
        assert!(snap.flight_number.is_none());
    }
}
