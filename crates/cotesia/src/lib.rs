//! `cotesia` - Unattended aerial release controller
//!
//! This library provides the core functionality for a GPS-tracked
//! release vehicle: the telemetry monitor, the flight-cycle state
//! machine, the actuator driver, and crash-safe flight session
//! persistence.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod actuator;
pub mod cli;
pub mod config;
pub mod cycle;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod seal;
pub mod session;
pub mod status;
pub mod telemetry;

pub use actuator::{ActuatorDriver, Channel};
pub use config::{Config, Thresholds};
pub use cycle::{CycleEngine, CycleState};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use runtime::Controller;
pub use session::{FlightMeta, SessionStore};
pub use status::{ControlHandle, StatusSnapshot};
pub use telemetry::{ConnectionState, FixSample, TelemetrySource};
