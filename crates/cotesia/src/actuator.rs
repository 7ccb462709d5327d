//! Actuator driver for the two release servos.
//!
//! The driver issues pulse-width commands through the sysfs PWM
//! interface and tracks a cumulative activation counter. Servo B is
//! mounted mirrored, so its rest/active pulse widths are inverted
//! relative to servo A. A simulation backend is available for bench
//! runs without hardware; it logs and counts but touches nothing.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info};

use crate::config::ActuatorConfig;

/// One of the two release channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Servo A.
    A,
    /// Servo B (mirrored mount).
    B,
}

impl Channel {
    /// The channel the alternation continues with after this one.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

/// Errors reported by the actuator driver.
#[derive(Debug, Error)]
pub enum ActuatorError {
    /// The underlying PWM interface is not available.
    #[error("actuator driver unavailable: {message}")]
    Unavailable {
        /// Description of what is missing.
        message: String,
    },

    /// A trigger arrived before the minimum spacing elapsed.
    #[error("trigger refused: {remaining_ms} ms until minimum spacing elapses")]
    TooSoon {
        /// Milliseconds left until a trigger is accepted again.
        remaining_ms: u64,
    },
}

impl ActuatorError {
    /// Create a new unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Driver for the physical release mechanism.
///
/// `trigger` is the only operation that increments the activation
/// counter, and only on confirmed success; `test` and `reset` exercise
/// the hardware without counting.
pub trait ActuatorDriver: Send + std::fmt::Debug {
    /// Fire one release on the given channel and return to rest.
    ///
    /// # Errors
    ///
    /// Returns [`ActuatorError::Unavailable`] when the hardware cannot
    /// be driven and [`ActuatorError::TooSoon`] when the minimum
    /// spacing since the previous trigger has not elapsed.
    fn trigger(&mut self, channel: Channel) -> Result<(), ActuatorError>;

    /// Exercise both channels in sequence and return to rest.
    ///
    /// # Errors
    ///
    /// Returns an error when the hardware cannot be driven.
    fn test(&mut self) -> Result<(), ActuatorError>;

    /// Force both channels to their rest pulse width.
    ///
    /// # Errors
    ///
    /// Returns an error when the hardware cannot be driven.
    fn reset(&mut self) -> Result<(), ActuatorError>;

    /// Cumulative count of confirmed triggers since startup.
    fn activation_count(&self) -> u64;
}

/// Sysfs PWM backed driver.
#[derive(Debug)]
pub struct PwmActuator {
    config: ActuatorConfig,
    activations: u64,
    last_trigger_at: Option<Instant>,
}

impl PwmActuator {
    /// Create a driver over the configured PWM chip.
    #[must_use]
    pub fn new(config: ActuatorConfig) -> Self {
        Self {
            config,
            activations: 0,
            last_trigger_at: None,
        }
    }

    fn channel_index(&self, channel: Channel) -> u32 {
        match channel {
            Channel::A => self.config.channel_a,
            Channel::B => self.config.channel_b,
        }
    }

    fn pulse_widths(&self, channel: Channel) -> (u64, u64) {
        match channel {
            Channel::A => (self.config.rest_pulse_a_ns, self.config.active_pulse_a_ns),
            Channel::B => (self.config.rest_pulse_b_ns, self.config.active_pulse_b_ns),
        }
    }

    fn channel_dir(&self, channel: Channel) -> PathBuf {
        self.config
            .pwm_chip
            .join(format!("pwm{}", self.channel_index(channel)))
    }

    fn write_attr(path: &std::path::Path, value: impl std::fmt::Display) -> Result<(), ActuatorError> {
        std::fs::write(path, format!("{value}\n")).map_err(|e| {
            ActuatorError::unavailable(format!("write {} failed: {e}", path.display()))
        })
    }

    fn ensure_exported(&self, channel: Channel) -> Result<(), ActuatorError> {
        if !self.config.pwm_chip.is_dir() {
            return Err(ActuatorError::unavailable(format!(
                "PWM chip {} not present",
                self.config.pwm_chip.display()
            )));
        }
        let dir = self.channel_dir(channel);
        if !dir.is_dir() {
            Self::write_attr(&self.config.pwm_chip.join("export"), self.channel_index(channel))?;
        }
        Self::write_attr(&dir.join("period"), self.config.period_ns)
    }

    fn set_pulse(&self, channel: Channel, pulse_ns: u64) -> Result<(), ActuatorError> {
        let dir = self.channel_dir(channel);
        Self::write_attr(&dir.join("duty_cycle"), pulse_ns)?;
        Self::write_attr(&dir.join("enable"), 1)
    }

    fn disable(&self, channel: Channel) -> Result<(), ActuatorError> {
        Self::write_attr(&self.channel_dir(channel).join("enable"), 0)
    }

    /// Move one channel through a full release stroke.
    fn stroke(&self, channel: Channel) -> Result<(), ActuatorError> {
        self.ensure_exported(channel)?;
        let (rest, active) = self.pulse_widths(channel);

        self.set_pulse(channel, active)?;
        std::thread::sleep(Duration::from_millis(self.config.travel_ms));
        self.set_pulse(channel, rest)?;
        std::thread::sleep(Duration::from_millis(self.config.return_ms));
        self.disable(channel)
    }

    fn check_spacing(&self) -> Result<(), ActuatorError> {
        let spacing = Duration::from_millis(self.config.min_trigger_spacing_ms);
        if let Some(last) = self.last_trigger_at {
            let elapsed = last.elapsed();
            if elapsed < spacing {
                return Err(ActuatorError::TooSoon {
                    remaining_ms: (spacing - elapsed).as_millis().try_into().unwrap_or(u64::MAX),
                });
            }
        }
        Ok(())
    }
}

impl ActuatorDriver for PwmActuator {
    fn trigger(&mut self, channel: Channel) -> Result<(), ActuatorError> {
        self.check_spacing()?;
        self.stroke(channel)?;
        self.activations += 1;
        self.last_trigger_at = Some(Instant::now());
        info!("release #{} fired on channel {channel}", self.activations);
        Ok(())
    }

    fn test(&mut self) -> Result<(), ActuatorError> {
        info!("actuator test: exercising both channels");
        self.stroke(Channel::A)?;
        self.stroke(Channel::B)
    }

    fn reset(&mut self) -> Result<(), ActuatorError> {
        for channel in [Channel::A, Channel::B] {
            self.ensure_exported(channel)?;
            let (rest, _) = self.pulse_widths(channel);
            self.set_pulse(channel, rest)?;
        }
        std::thread::sleep(Duration::from_millis(self.config.return_ms));
        self.disable(Channel::A)?;
        self.disable(Channel::B)?;
        debug!("actuator channels returned to rest");
        Ok(())
    }

    fn activation_count(&self) -> u64 {
        self.activations
    }
}

/// Simulation backend: logs and counts, touches no hardware.
///
/// This is the documented simulation mode: an actuation event recorded
/// against this driver corresponds to a deliberately skipped hardware
/// call.
#[derive(Debug)]
pub struct SimulatedActuator {
    activations: u64,
    last_trigger_at: Option<Instant>,
    min_spacing: Duration,
}

impl SimulatedActuator {
    /// Create a simulated driver with the configured trigger spacing.
    #[must_use]
    pub fn new(config: &ActuatorConfig) -> Self {
        Self {
            activations: 0,
            last_trigger_at: None,
            min_spacing: Duration::from_millis(config.min_trigger_spacing_ms),
        }
    }

    /// Create a simulated driver with no spacing guard, for tests.
    #[must_use]
    pub fn unguarded() -> Self {
        Self {
            activations: 0,
            last_trigger_at: None,
            min_spacing: Duration::ZERO,
        }
    }
}

impl ActuatorDriver for SimulatedActuator {
    fn trigger(&mut self, channel: Channel) -> Result<(), ActuatorError> {
        if let Some(last) = self.last_trigger_at {
            let elapsed = last.elapsed();
            if elapsed < self.min_spacing {
                return Err(ActuatorError::TooSoon {
                    remaining_ms: (self.min_spacing - elapsed)
                        .as_millis()
                        .try_into()
                        .unwrap_or(u64::MAX),
                });
            }
        }
        self.activations += 1;
        self.last_trigger_at = Some(Instant::now());
        info!(
            "[sim] release #{} fired on channel {channel}",
            self.activations
        );
        Ok(())
    }

    fn test(&mut self) -> Result<(), ActuatorError> {
        info!("[sim] actuator test: exercising both channels");
        Ok(())
    }

    fn reset(&mut self) -> Result<(), ActuatorError> {
        debug!("[sim] actuator channels returned to rest");
        Ok(())
    }

    fn activation_count(&self) -> u64 {
        self.activations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_display_and_alternation() {
        assert_eq!(Channel::A.to_string(), "A");
        assert_eq!(Channel::B.to_string(), "B");
        assert_eq!(Channel::A.other(), Channel::B);
        assert_eq!(Channel::B.other(), Channel::A);
    }

    #[test]
    fn test_simulated_trigger_increments_counter() {
        let mut driver = SimulatedActuator::unguarded();
        assert_eq!(driver.activation_count(), 0);

        driver.trigger(Channel::A).unwrap();
        driver.trigger(Channel::B).unwrap();
        assert_eq!(driver.activation_count(), 2);
    }

    #[test]
    fn test_test_does_not_increment_counter() {
        let mut driver = SimulatedActuator::unguarded();
        driver.trigger(Channel::A).unwrap();

        driver.test().unwrap();
        driver.test().unwrap();
        assert_eq!(driver.activation_count(), 1);
    }

    #[test]
    fn test_reset_does_not_increment_counter() {
        let mut driver = SimulatedActuator::unguarded();
        driver.reset().unwrap();
        assert_eq!(driver.activation_count(), 0);
    }

    #[test]
    fn test_trigger_spacing_enforced() {
        let config = ActuatorConfig {
            min_trigger_spacing_ms: 10_000,
            ..ActuatorConfig::default()
        };
        let mut driver = SimulatedActuator::new(&config);

        driver.trigger(Channel::A).unwrap();
        let result = driver.trigger(Channel::B);
        assert!(matches!(result, Err(ActuatorError::TooSoon { .. })));
        // The refused trigger must not count
        assert_eq!(driver.activation_count(), 1);
    }

    #[test]
    fn test_pwm_unavailable_without_chip() {
        let config = ActuatorConfig {
            pwm_chip: PathBuf::from("/nonexistent/pwmchip9"),
            travel_ms: 0,
            return_ms: 0,
            ..ActuatorConfig::default()
        };
        let mut driver = PwmActuator::new(config);

        let result = driver.trigger(Channel::A);
        assert!(matches!(result, Err(ActuatorError::Unavailable { .. })));
        assert_eq!(driver.activation_count(), 0);

        assert!(matches!(
            driver.test(),
            Err(ActuatorError::Unavailable { .. })
        ));
        assert!(matches!(
            driver.reset(),
            Err(ActuatorError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_actuator_error_display() {
        let err = ActuatorError::unavailable("pigpio daemon not running");
        assert!(err.to_string().contains("unavailable"));

        let err = ActuatorError::TooSoon { remaining_ms: 300 };
        assert!(err.to_string().contains("300"));
    }
}
