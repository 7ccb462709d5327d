//! GPS telemetry source.
//!
//! This module reads NMEA sentences from a serial device, folds them
//! into [`FixSample`] records, and manages the connection to the device:
//! a read error or prolonged silence drops the handle and periodic
//! reopen attempts follow until the device reappears. Malformed
//! sentences are dropped silently and never affect connection state.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use nmea::{sentences::FixType, Nmea, SentenceType};
use tracing::{debug, info, warn};

use crate::config::TelemetryConfig;

/// Conversion factor from knots to meters per second.
const KNOTS_TO_MS: f64 = 0.514_444;

/// PDOP value reported while no GSA sentence has been seen.
const PDOP_UNKNOWN: f64 = 99.9;

/// Connection state of the telemetry device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// The device is open and delivering sentences.
    Connected,
    /// The device is gone; reopen attempts run at a fixed backoff.
    Disconnected,
    /// A reopen attempt is in progress.
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// One parsed positioning reading.
///
/// Immutable once created. A sample is emitted for every position
/// update, including ones below the navigation quality gates, so the
/// state machine can decide to wait; such samples carry `usable ==
/// false`.
#[derive(Debug, Clone, PartialEq)]
pub struct FixSample {
    /// When this sample was produced.
    pub timestamp: DateTime<Utc>,
    /// Whether the receiver reports a valid fix.
    pub valid_fix: bool,
    /// Number of satellites used for the fix.
    pub satellites: u32,
    /// Positional dilution of precision.
    pub pdop: f64,
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Ground speed in m/s.
    pub speed_ms: f64,
    /// Whether this sample passes the navigation quality gates
    /// (valid fix, enough satellites, PDOP under the maximum).
    pub usable: bool,
}

impl FixSample {
    /// The position as a `(latitude, longitude)` pair.
    #[must_use]
    pub fn position(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }
}

/// A source of complete NMEA sentences.
///
/// `read_sentence` returns the next complete line when one is pending,
/// `Ok(None)` when nothing has arrived yet (a bounded wait at most),
/// and `Err` on a hardware fault. Implementors must not block beyond
/// their configured read timeout.
pub trait SentencePort: Send + std::fmt::Debug {
    /// Read the next complete sentence, if any.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying device fails.
    fn read_sentence(&mut self) -> io::Result<Option<String>>;
}

/// Opens a [`SentencePort`], possibly probing several device paths.
pub trait PortOpener: Send + std::fmt::Debug {
    /// Attempt to open the device.
    ///
    /// # Errors
    ///
    /// Returns an error when no device could be opened.
    fn open(&mut self) -> io::Result<Box<dyn SentencePort>>;
}

/// Sentence port backed by a serial device.
pub struct SerialSentencePort {
    port: Box<dyn serialport::SerialPort>,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
}

impl std::fmt::Debug for SerialSentencePort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialSentencePort")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl SerialSentencePort {
    /// Wrap an open serial port.
    #[must_use]
    pub fn new(port: Box<dyn serialport::SerialPort>) -> Self {
        Self {
            port,
            buffer: Vec::with_capacity(256),
            pending: VecDeque::new(),
        }
    }

    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line).trim().to_string();
            if !text.is_empty() {
                self.pending.push_back(text);
            }
        }
    }
}

impl SentencePort for SerialSentencePort {
    fn read_sentence(&mut self) -> io::Result<Option<String>> {
        if let Some(line) = self.pending.pop_front() {
            return Ok(Some(line));
        }

        let mut chunk = [0u8; 128];
        match self.port.read(&mut chunk) {
            Ok(0) => Ok(None),
            Ok(n) => {
                self.buffer.extend_from_slice(&chunk[..n]);
                self.drain_lines();
                Ok(self.pending.pop_front())
            }
            // A read timeout just means no data yet
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Opener that probes the configured device path, or the usual
/// USB/UART device nodes when none is configured.
#[derive(Debug, Clone)]
pub struct SerialPortOpener {
    device: Option<PathBuf>,
    baud_rate: u32,
}

impl SerialPortOpener {
    /// Create an opener from telemetry configuration.
    #[must_use]
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            device: config.device.clone(),
            baud_rate: config.baud_rate,
        }
    }

    /// Candidate device paths, most likely first.
    fn candidates(&self) -> Vec<PathBuf> {
        if let Some(device) = &self.device {
            return vec![device.clone()];
        }

        let mut paths = Vec::new();
        if let Ok(entries) = std::fs::read_dir("/dev") {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.starts_with("ttyUSB")
                    || name.starts_with("ttyACM")
                    || name.starts_with("ttyAMA")
                    || name == "serial0"
                {
                    paths.push(entry.path());
                }
            }
        }
        paths.sort();
        paths
    }
}

impl PortOpener for SerialPortOpener {
    fn open(&mut self) -> io::Result<Box<dyn SentencePort>> {
        let candidates = self.candidates();
        for path in &candidates {
            match serialport::new(path.to_string_lossy(), self.baud_rate)
                .timeout(Duration::from_millis(100))
                .open()
            {
                Ok(port) => {
                    info!("GPS connected on {}", path.display());
                    return Ok(Box::new(SerialSentencePort::new(port)));
                }
                Err(e) => {
                    debug!("could not open {}: {e}", path.display());
                }
            }
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no usable serial device among {} candidates", candidates.len()),
        ))
    }
}

/// The telemetry source: owns the device handle and the NMEA
/// accumulator, and hands out [`FixSample`]s.
pub struct TelemetrySource {
    opener: Box<dyn PortOpener>,
    port: Option<Box<dyn SentencePort>>,
    parser: Nmea,
    state: ConnectionState,
    min_satellites: u32,
    max_pdop: f64,
    silence_timeout: Duration,
    reconnect_backoff: Duration,
    last_sentence_at: Option<Instant>,
    last_attempt_at: Option<Instant>,
}

impl std::fmt::Debug for TelemetrySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetrySource")
            .field("state", &self.state)
            .field("connected", &self.port.is_some())
            .finish_non_exhaustive()
    }
}

impl TelemetrySource {
    /// Create a telemetry source from configuration, using the serial opener.
    #[must_use]
    pub fn new(config: &TelemetryConfig) -> Self {
        Self::with_opener(Box::new(SerialPortOpener::new(config)), config)
    }

    /// Create a telemetry source with a custom port opener.
    #[must_use]
    pub fn with_opener(opener: Box<dyn PortOpener>, config: &TelemetryConfig) -> Self {
        Self {
            opener,
            port: None,
            parser: Nmea::default(),
            state: ConnectionState::Disconnected,
            min_satellites: config.min_satellites,
            max_pdop: config.max_pdop,
            silence_timeout: Duration::from_secs(config.silence_timeout_secs),
            reconnect_backoff: Duration::from_secs(config.reconnect_backoff_secs),
            last_sentence_at: None,
            last_attempt_at: None,
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    /// Poll for the next parsed sample.
    ///
    /// Returns `None` when no complete position update has arrived
    /// since the last call. While disconnected, this drives the reopen
    /// attempts; no samples are fabricated during a gap.
    pub fn poll(&mut self) -> Option<FixSample> {
        if self.port.is_none() {
            self.try_reconnect();
            if self.port.is_none() {
                return None;
            }
        }

        loop {
            let result = match self.port.as_mut() {
                Some(port) => port.read_sentence(),
                None => Ok(None),
            };
            match result {
                Ok(Some(line)) => {
                    self.last_sentence_at = Some(Instant::now());
                    if let Some(sample) = self.feed(&line) {
                        return Some(sample);
                    }
                }
                Ok(None) => {
                    self.check_silence();
                    return None;
                }
                Err(e) => {
                    warn!("GPS read failed: {e}; disconnecting");
                    self.disconnect();
                    return None;
                }
            }
        }
    }

    /// Feed one sentence into the accumulator; a GGA sentence with a
    /// position completes a sample.
    fn feed(&mut self, line: &str) -> Option<FixSample> {
        let sentence_type = match self.parser.parse(line) {
            Ok(t) => t,
            // Malformed sentences are dropped silently
            Err(_) => return None,
        };

        if sentence_type != SentenceType::GGA {
            return None;
        }

        let (latitude, longitude) = match (self.parser.latitude, self.parser.longitude) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => return None,
        };

        let valid_fix = self
            .parser
            .fix_type
            .is_some_and(|t| t != FixType::Invalid);
        let satellites = self.parser.num_of_fix_satellites.unwrap_or(0);
        let pdop = self.parser.pdop.map_or(PDOP_UNKNOWN, f64::from);
        let speed_ms = self
            .parser
            .speed_over_ground
            .map_or(0.0, |knots| f64::from(knots) * KNOTS_TO_MS);

        let usable = valid_fix && satellites >= self.min_satellites && pdop <= self.max_pdop;

        Some(FixSample {
            timestamp: Utc::now(),
            valid_fix,
            satellites,
            pdop,
            latitude,
            longitude,
            speed_ms,
            usable,
        })
    }

    fn check_silence(&mut self) {
        if let Some(last) = self.last_sentence_at {
            if last.elapsed() > self.silence_timeout {
                warn!(
                    "GPS stalled: no sentence for {:.1}s; disconnecting",
                    last.elapsed().as_secs_f64()
                );
                self.disconnect();
            }
        }
    }

    fn disconnect(&mut self) {
        self.port = None;
        self.state = ConnectionState::Disconnected;
        self.last_sentence_at = None;
    }

    fn try_reconnect(&mut self) {
        if let Some(last) = self.last_attempt_at {
            if last.elapsed() < self.reconnect_backoff {
                return;
            }
        }

        self.state = ConnectionState::Reconnecting;
        self.last_attempt_at = Some(Instant::now());
        match self.opener.open() {
            Ok(port) => {
                self.port = Some(port);
                self.parser = Nmea::default();
                self.state = ConnectionState::Connected;
                self.last_sentence_at = Some(Instant::now());
            }
            Err(e) => {
                debug!("GPS reconnect attempt failed: {e}");
                self.state = ConnectionState::Disconnected;
            }
        }
    }
}
