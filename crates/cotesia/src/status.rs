//! Status snapshot and command facade.
//!
//! The control loop is the only writer of mission state; everything an
//! outside consumer needs crosses this boundary as either an immutable
//! [`StatusSnapshot`] published on a watch channel at the end of each
//! tick, or a [`Command`] queued on an mpsc channel and drained only at
//! tick boundaries. A reader never observes a state mid-transition.

use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::config::Thresholds;
use crate::cycle::CycleState;
use crate::telemetry::ConnectionState;

/// Capacity of the command queue.
const COMMAND_QUEUE_DEPTH: usize = 16;

/// Immutable view of the controller state after one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// Current cycle phase.
    pub state: CycleState,
    /// Global number of the open flight, if any.
    pub flight_number: Option<u32>,
    /// GPS connection state.
    pub connection: ConnectionState,
    /// Satellite count of the most recent sample.
    pub satellites: u32,
    /// PDOP of the most recent sample.
    pub pdop: f64,
    /// Ground speed of the most recent sample, m/s.
    pub speed_ms: f64,
    /// Distance accumulated since the last release, meters.
    pub distance_m: f64,
    /// Seconds spent below operating speed while cruising.
    pub stop_timer_secs: f64,
    /// Confirmed triggers since process start.
    pub actuations: u64,
    /// Thresholds currently in effect.
    pub thresholds: Thresholds,
}

impl StatusSnapshot {
    /// Snapshot shown before the first tick completes.
    #[must_use]
    pub fn initial(thresholds: Thresholds) -> Self {
        Self {
            state: CycleState::AwaitingGps,
            flight_number: None,
            connection: ConnectionState::Disconnected,
            satellites: 0,
            pdop: 0.0,
            speed_ms: 0.0,
            distance_m: 0.0,
            stop_timer_secs: 0.0,
            actuations: 0,
            thresholds,
        }
    }
}

/// A command for the control loop, applied at the next tick boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Re-arm the cycle for a new flight.
    StartFlight,
    /// Finalize the current flight.
    StopFlight,
    /// Discard mission state and return to `AwaitingGps`.
    Reset,
    /// Exercise both actuator channels without counting.
    TestActuator,
    /// Replace the cycle thresholds.
    UpdateThresholds(Thresholds),
}

/// Sending half held by outside consumers.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<StatusSnapshot>,
}

/// Receiving half owned by the control loop.
#[derive(Debug)]
pub struct ControlPort {
    commands: mpsc::Receiver<Command>,
    snapshot: watch::Sender<StatusSnapshot>,
}

/// Create a connected handle/port pair.
#[must_use]
pub fn control_channel(thresholds: Thresholds) -> (ControlHandle, ControlPort) {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (snapshot_tx, snapshot_rx) = watch::channel(StatusSnapshot::initial(thresholds));
    (
        ControlHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
        },
        ControlPort {
            commands: command_rx,
            snapshot: snapshot_tx,
        },
    )
}

impl ControlHandle {
    /// Queue a command for the next tick boundary.
    ///
    /// Invalid threshold values are rejected here, before queueing, so
    /// the prior thresholds stay in effect.
    ///
    /// # Errors
    ///
    /// Returns a validation error, or an internal error when the
    /// control loop has shut down.
    pub fn send(&self, command: Command) -> crate::error::Result<()> {
        if let Command::UpdateThresholds(thresholds) = &command {
            thresholds.validate()?;
        }
        self.commands
            .try_send(command)
            .map_err(|e| crate::error::Error::internal(format!("command queue: {e}")))
    }

    /// The most recently published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Wait until a snapshot newer than the last observed one arrives.
    ///
    /// # Errors
    ///
    /// Returns an internal error when the control loop has shut down.
    pub async fn changed(&mut self) -> crate::error::Result<StatusSnapshot> {
        self.snapshot
            .changed()
            .await
            .map_err(|_| crate::error::Error::internal("control loop has shut down"))?;
        Ok(self.snapshot.borrow_and_update().clone())
    }
}

impl ControlPort {
    /// Drain every queued command without waiting.
    pub fn drain_commands(&mut self) -> Vec<Command> {
        let mut drained = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            drained.push(command);
        }
        drained
    }

    /// Publish the snapshot for this tick.
    pub fn publish(&self, snapshot: StatusSnapshot) {
        // Send only fails with no receivers, which is fine
        let _ = self.snapshot.send(snapshot);
    }
}
