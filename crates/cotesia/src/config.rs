//! Configuration management for the cotesia controller.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "cotesia";

/// Default file name for the log sealing key, resolved in the home directory.
const LOG_KEY_FILE_NAME: &str = ".cotesia_log.key";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `COTESIA_`)
/// 2. TOML config file at `~/.config/cotesia/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Telemetry (GPS) configuration.
    pub telemetry: TelemetryConfig,
    /// Cycle thresholds driving the state machine.
    pub cycle: Thresholds,
    /// Actuator hardware configuration.
    pub actuator: ActuatorConfig,
    /// Flight storage configuration.
    pub storage: StorageConfig,
}

/// Telemetry-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Serial device path. When unset, common USB/UART device paths
    /// are probed in order.
    pub device: Option<PathBuf>,
    /// Serial baud rate.
    pub baud_rate: u32,
    /// Seconds without a valid sentence before the device is declared stalled.
    pub silence_timeout_secs: u64,
    /// Seconds between reconnection attempts.
    pub reconnect_backoff_secs: u64,
    /// Tick interval of the control loop in milliseconds.
    pub tick_interval_ms: u64,
    /// Minimum satellite count for a fix to be usable for navigation.
    pub min_satellites: u32,
    /// Maximum PDOP for a fix to be usable for navigation.
    pub max_pdop: f64,
}

/// Runtime-updatable thresholds of the cycle state machine.
///
/// These are the values the operator may change mid-mission through the
/// command facade; updates are validated at the command boundary and
/// applied at the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Distance between releases in meters.
    pub trigger_distance_m: f64,
    /// Speed at or below which the vehicle counts as stopped at the
    /// first-stop phase, in m/s.
    pub stop_speed_ms: f64,
    /// Sustained time below operating speed that finalizes the flight,
    /// in seconds.
    pub stop_duration_secs: f64,
    /// Operating (resume) speed in m/s.
    pub operating_speed_ms: f64,
    /// Speed that counts as the initial standing start, in m/s.
    pub start_speed_ms: f64,
}

/// Actuator-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    /// Run the actuator in simulation mode: commands are logged and
    /// counted but no hardware is touched.
    pub simulate: bool,
    /// Path to the sysfs PWM chip directory.
    pub pwm_chip: PathBuf,
    /// PWM channel index for servo A.
    pub channel_a: u32,
    /// PWM channel index for servo B.
    pub channel_b: u32,
    /// PWM frame period in nanoseconds.
    pub period_ns: u64,
    /// Rest pulse width of servo A in nanoseconds.
    pub rest_pulse_a_ns: u64,
    /// Active pulse width of servo A in nanoseconds.
    pub active_pulse_a_ns: u64,
    /// Rest pulse width of servo B (mirrored) in nanoseconds.
    pub rest_pulse_b_ns: u64,
    /// Active pulse width of servo B (mirrored) in nanoseconds.
    pub active_pulse_b_ns: u64,
    /// Milliseconds the servo takes to travel to the active position.
    pub travel_ms: u64,
    /// Milliseconds the servo takes to return to rest.
    pub return_ms: u64,
    /// Minimum spacing between consecutive in-cycle triggers in milliseconds.
    pub min_trigger_spacing_ms: u64,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for flight session directories.
    /// Defaults to `~/.local/share/cotesia/flights`.
    pub data_dir: Option<PathBuf>,
    /// Path to the symmetric key file used to seal flight logs.
    /// Defaults to `~/.cotesia_log.key`; if the file is absent, logs
    /// are stored in plaintext and marked as such.
    pub log_key_path: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            device: None,
            baud_rate: 9600,
            silence_timeout_secs: 15,
            reconnect_backoff_secs: 2,
            tick_interval_ms: 1000,
            min_satellites: 3,
            max_pdop: 6.0,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            trigger_distance_m: 25.0,
            stop_speed_ms: 1.5,
            stop_duration_secs: 10.0,
            operating_speed_ms: 5.0,
            start_speed_ms: 5.0,
        }
    }
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            simulate: false,
            pwm_chip: PathBuf::from("/sys/class/pwm/pwmchip0"),
            channel_a: 0,
            channel_b: 1,
            period_ns: 20_000_000,
            rest_pulse_a_ns: 1_320_000,
            active_pulse_a_ns: 2_000_000,
            rest_pulse_b_ns: 1_076_000,
            active_pulse_b_ns: 1_730_000,
            travel_ms: 800,
            return_ms: 500,
            min_trigger_spacing_ms: 500,
        }
    }
}

impl Thresholds {
    /// Validate the threshold values.
    ///
    /// # Errors
    ///
    /// Returns an error for a non-positive distance, speed, or duration.
    pub fn validate(&self) -> Result<()> {
        if self.trigger_distance_m <= 0.0 {
            return Err(Error::config_validation(format!(
                "trigger_distance_m must be positive (got {})",
                self.trigger_distance_m
            )));
        }
        if self.stop_speed_ms <= 0.0 {
            return Err(Error::config_validation(format!(
                "stop_speed_ms must be positive (got {})",
                self.stop_speed_ms
            )));
        }
        if self.stop_duration_secs <= 0.0 {
            return Err(Error::config_validation(format!(
                "stop_duration_secs must be positive (got {})",
                self.stop_duration_secs
            )));
        }
        if self.operating_speed_ms <= 0.0 {
            return Err(Error::config_validation(format!(
                "operating_speed_ms must be positive (got {})",
                self.operating_speed_ms
            )));
        }
        if self.start_speed_ms <= 0.0 {
            return Err(Error::config_validation(format!(
                "start_speed_ms must be positive (got {})",
                self.start_speed_ms
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file).nested())
            .merge(Env::prefixed("COTESIA_").split("_"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
            .join("flights")
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        self.cycle.validate()?;

        if self.telemetry.tick_interval_ms == 0 {
            return Err(Error::config_validation(
                "tick_interval_ms must be greater than 0",
            ));
        }
        if self.telemetry.silence_timeout_secs == 0 {
            return Err(Error::config_validation(
                "silence_timeout_secs must be greater than 0",
            ));
        }
        if self.telemetry.max_pdop <= 0.0 {
            return Err(Error::config_validation("max_pdop must be positive"));
        }
        if self.actuator.period_ns == 0 {
            return Err(Error::config_validation("period_ns must be greater than 0"));
        }
        for (name, pulse) in [
            ("rest_pulse_a_ns", self.actuator.rest_pulse_a_ns),
            ("active_pulse_a_ns", self.actuator.active_pulse_a_ns),
            ("rest_pulse_b_ns", self.actuator.rest_pulse_b_ns),
            ("active_pulse_b_ns", self.actuator.active_pulse_b_ns),
        ] {
            if pulse == 0 || pulse >= self.actuator.period_ns {
                return Err(Error::config_validation(format!(
                    "{name} must be between 0 and period_ns"
                )));
            }
        }

        Ok(())
    }

    /// Get the flight data directory, resolving defaults if not set.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .unwrap_or_else(Self::default_data_dir)
    }

    /// Get the log key file path, resolving defaults if not set.
    #[must_use]
    pub fn log_key_path(&self) -> PathBuf {
        self.storage.log_key_path.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(LOG_KEY_FILE_NAME)
        })
    }

    /// Get the tick interval as a Duration.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry.tick_interval_ms)
    }

    /// Get the telemetry silence timeout as a Duration.
    #[must_use]
    pub fn silence_timeout(&self) -> Duration {
        Duration::from_secs(self.telemetry.silence_timeout_secs)
    }

    /// Get the reconnect backoff as a Duration.
    #[must_use]
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.telemetry.reconnect_backoff_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.telemetry.baud_rate, 9600);
        assert_eq!(config.telemetry.min_satellites, 3);
        assert!(!config.actuator.simulate);
        assert!(config.storage.data_dir.is_none());
    }

    #[test]
    fn test_default_thresholds_match_contract() {
        let t = Thresholds::default();

        assert!((t.trigger_distance_m - 25.0).abs() < f64::EPSILON);
        assert!((t.stop_speed_ms - 1.5).abs() < f64::EPSILON);
        assert!((t.stop_duration_secs - 10.0).abs() < f64::EPSILON);
        assert!((t.operating_speed_ms - 5.0).abs() < f64::EPSILON);
        assert!((t.start_speed_ms - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_negative_distance() {
        let mut t = Thresholds::default();
        t.trigger_distance_m = -1.0;

        let result = t.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("trigger_distance_m"));
    }

    #[test]
    fn test_validate_non_positive_speed() {
        let mut t = Thresholds::default();
        t.operating_speed_ms = 0.0;

        let result = t.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("operating_speed_ms"));
    }

    #[test]
    fn test_validate_zero_stop_duration() {
        let mut t = Thresholds::default();
        t.stop_duration_secs = 0.0;

        assert!(t.validate().is_err());
    }

    #[test]
    fn test_validate_zero_tick_interval() {
        let mut config = Config::default();
        config.telemetry.tick_interval_ms = 0;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("tick_interval_ms"));
    }

    #[test]
    fn test_validate_pulse_out_of_period() {
        let mut config = Config::default();
        config.actuator.active_pulse_a_ns = config.actuator.period_ns;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("active_pulse_a_ns"));
    }

    #[test]
    fn test_data_dir_default() {
        let config = Config::default();
        let dir = config.data_dir();

        assert!(dir.to_string_lossy().contains("cotesia"));
        assert!(dir.to_string_lossy().contains("flights"));
    }

    #[test]
    fn test_data_dir_custom() {
        let mut config = Config::default();
        config.storage.data_dir = Some(PathBuf::from("/mnt/sd/flights"));

        assert_eq!(config.data_dir(), PathBuf::from("/mnt/sd/flights"));
    }

    #[test]
    fn test_log_key_path_default() {
        let config = Config::default();
        let path = config.log_key_path();

        assert!(path.to_string_lossy().contains(".cotesia_log.key"));
    }

    #[test]
    fn test_durations() {
        let config = Config::default();

        assert_eq!(config.tick_interval(), Duration::from_millis(1000));
        assert_eq!(config.silence_timeout(), Duration::from_secs(15));
        assert_eq!(config.reconnect_backoff(), Duration::from_secs(2));
    }

    #[test]
    fn test_load_nonexistent_config() {
        // Loading from a nonexistent path should work (uses defaults)
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(result.is_ok());

        let config = result.unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_thresholds_serialize() {
        let t = Thresholds::default();
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("trigger_distance_m"));
        assert!(json.contains("stop_duration_secs"));
    }

    #[test]
    fn test_thresholds_deserialize_partial() {
        let json = r#"{"trigger_distance_m": 30.0}"#;
        let t: Thresholds = serde_json::from_str(json).unwrap();
        assert!((t.trigger_distance_m - 30.0).abs() < f64::EPSILON);
        // Unspecified fields keep their defaults
        assert!((t.stop_speed_ms - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("cotesia"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }
}
