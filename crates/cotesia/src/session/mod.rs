//! Flight session store.
//!
//! Owns the on-disk layout for flights: one directory per flight under
//! `year/MONTH/day/VOO_NN`, holding the coordinates file, two KML
//! artifacts, a text report, the flight log (plaintext or sealed), and
//! a metadata record. Coordinate and event appends are flushed and
//! synced on every write so a crash mid-flight leaves a valid, readable
//! prefix; finalize writes metadata atomically via a rename.

pub mod kml;

use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Datelike, Local, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::seal::LogSealer;

/// Metadata file name inside each flight directory.
const METADATA_FILE: &str = "metadata.json";

/// Flight log file name (before sealing).
const LOG_FILE: &str = "LOG_COMPLETO.txt";

fn flight_dir_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^VOO_(\d+)$").expect("static pattern"))
}

/// Why a flight event was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    /// Release at the first full stop of the mission.
    FirstStop,
    /// Release after covering the configured distance interval.
    DistanceInterval,
    /// Manual stop command; no actuation was issued.
    ManualStop,
}

impl std::fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FirstStop => write!(f, "first_stop"),
            Self::DistanceInterval => write!(f, "distance_interval"),
            Self::ManualStop => write!(f, "manual_stop"),
        }
    }
}

/// One recorded flight event: an actuation, or the manual stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightEvent {
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Latitude at the event, when a position was available.
    pub latitude: Option<f64>,
    /// Longitude at the event, when a position was available.
    pub longitude: Option<f64>,
    /// Why the event was recorded.
    pub reason: TriggerReason,
}

impl FlightEvent {
    /// Whether this event corresponds to a confirmed actuation.
    #[must_use]
    pub fn is_actuation(&self) -> bool {
        self.reason != TriggerReason::ManualStop
    }
}

/// File name map of a flight directory.
///
/// The field names are part of the persisted metadata contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightFiles {
    /// Coordinates text file.
    pub coordinates: String,
    /// Path-line KML.
    pub path_kml: String,
    /// Discrete-points KML.
    pub points_kml: String,
    /// Text report.
    pub report: String,
    /// Flight log (plaintext name, or the `.enc` name once sealed).
    pub log: String,
}

/// Persisted metadata record of one flight.
///
/// The field set `{global_number, daily_number, year, month_name, day,
/// created_at, log_encrypted, files}` is a stable on-disk contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightMeta {
    /// Composite identifier, `YYYY-MM-DD-VOOnnnn`.
    pub id: String,
    /// Sequential global flight number.
    pub global_number: u32,
    /// Sequential per-day flight number.
    pub daily_number: u32,
    /// Calendar year of the flight.
    pub year: i32,
    /// Calendar month (1-12).
    pub month: u32,
    /// Upper-case English month name used in the directory layout.
    pub month_name: String,
    /// Day of month.
    pub day: u32,
    /// Creation timestamp, RFC 3339.
    pub created_at: String,
    /// Human-readable creation date (`dd/mm/yyyy HH:MM:SS`).
    pub date_human: String,
    /// Flight directory relative to the data directory.
    pub relative_dir: String,
    /// File name map.
    pub files: FlightFiles,
    /// Whether the stored log is ciphertext.
    pub log_encrypted: bool,
    /// Whether the flight was finalized. A reset mid-flight leaves
    /// this `false` with the directory intact.
    pub completed: bool,
    /// Finalization timestamp, RFC 3339.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<String>,
    /// Flight duration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    /// Number of tubes released.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tubes: Option<u64>,
    /// Mean ground speed in km/h.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_speed_kmh: Option<f64>,
    /// Total release distance covered, in meters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_total_m: Option<f64>,
    /// Recorded flight events in order.
    #[serde(default)]
    pub events: Vec<FlightEvent>,
}

/// Compact listing entry for one stored flight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    /// Sequential global flight number.
    pub global_number: u32,
    /// Sequential per-day flight number.
    pub daily_number: u32,
    /// Creation timestamp, RFC 3339.
    pub created_at: String,
    /// Human-readable creation date.
    pub date_human: String,
    /// Whether the flight was finalized.
    pub completed: bool,
    /// Number of tubes released, when finalized.
    pub tubes: Option<u64>,
    /// Flight directory relative to the data directory.
    pub relative_dir: String,
}

/// Report inputs that the state machine knows and the store does not.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlightReport {
    /// Configured distance between releases, meters.
    pub trigger_distance_m: f64,
    /// Satellite count at finalization.
    pub satellites: u32,
    /// PDOP at finalization.
    pub pdop: f64,
}

/// Store owning the flight data directory.
#[derive(Debug)]
pub struct SessionStore {
    data_dir: PathBuf,
    sealer: Box<dyn LogSealer>,
}

/// Handle to the single in-progress flight.
///
/// Created by [`SessionStore::create_session`]; consumed by
/// [`SessionStore::finalize`] or [`SessionStore::abandon`]. A finalized
/// session is immutable and addressed only by its flight number.
#[derive(Debug)]
pub struct ActiveSession {
    meta: FlightMeta,
    dir: PathBuf,
    coords_file: File,
    log_file: File,
    coordinates: Vec<(f64, f64)>,
    speeds: Vec<f64>,
    started_at: DateTime<Utc>,
}

impl SessionStore {
    /// Open the store, creating the data directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be created.
    pub fn open(data_dir: impl Into<PathBuf>, sealer: Box<dyn LogSealer>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).map_err(|source| Error::DirectoryCreate {
            path: data_dir.clone(),
            source,
        })?;
        Ok(Self { data_dir, sealer })
    }

    /// The root data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn day_dir(&self, now: DateTime<Local>) -> PathBuf {
        self.data_dir
            .join(now.year().to_string())
            .join(now.format("%B").to_string().to_uppercase())
            .join(format!("{:02}", now.day()))
    }

    /// Compute the next `(global, daily)` flight numbers.
    ///
    /// Both counters are recovered by scanning the on-disk layout, so a
    /// process restart never reuses or skips a number.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory tree cannot be read.
    pub fn next_numbers(&self, now: DateTime<Local>) -> Result<(u32, u32)> {
        let daily = self.max_daily_number(&self.day_dir(now))? + 1;
        let global = self.max_global_number()? + 1;
        Ok((global, daily))
    }

    fn max_daily_number(&self, day_dir: &Path) -> Result<u32> {
        if !day_dir.is_dir() {
            return Ok(0);
        }
        let mut max = 0;
        for entry in fs::read_dir(day_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(caps) = flight_dir_pattern().captures(&name.to_string_lossy()) {
                if let Ok(n) = caps[1].parse::<u32>() {
                    max = max.max(n);
                }
            }
        }
        Ok(max)
    }

    fn max_global_number(&self) -> Result<u32> {
        let mut max = 0;
        for meta_path in self.metadata_paths()? {
            if let Ok(meta) = Self::read_metadata(&meta_path) {
                max = max.max(meta.global_number);
            }
        }
        // Pre-partitioning layout kept bare VOO_<n> directories at the root
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(caps) = flight_dir_pattern().captures(&name.to_string_lossy()) {
                if let Ok(n) = caps[1].parse::<u32>() {
                    max = max.max(n);
                }
            }
        }
        Ok(max)
    }

    fn metadata_paths(&self) -> Result<Vec<PathBuf>> {
        fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    walk(&path, out)?;
                } else if entry.file_name() == METADATA_FILE {
                    out.push(path);
                }
            }
            Ok(())
        }

        let mut out = Vec::new();
        walk(&self.data_dir, &mut out)?;
        Ok(out)
    }

    fn read_metadata(path: &Path) -> Result<FlightMeta> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write_metadata(dir: &Path, meta: &FlightMeta) -> Result<()> {
        let tmp = dir.join(format!("{METADATA_FILE}.tmp"));
        let final_path = dir.join(METADATA_FILE);

        let mut file = File::create(&tmp)?;
        file.write_all(&serde_json::to_vec_pretty(meta)?)?;
        file.sync_data()?;
        // Readers either see the previous record or the complete new one
        fs::rename(&tmp, &final_path)?;
        Ok(())
    }

    fn find_session_dir(&self, global: u32) -> Result<Option<(PathBuf, FlightMeta)>> {
        for meta_path in self.metadata_paths()? {
            if let Ok(meta) = Self::read_metadata(&meta_path) {
                if meta.global_number == global {
                    let dir = meta_path
                        .parent()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.data_dir.clone());
                    return Ok(Some((dir, meta)));
                }
            }
        }
        Ok(None)
    }

    /// Create a new flight session with the given numbers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateFlight`] when a flight with either
    /// number already exists (a caller error, not a runtime condition),
    /// or an I/O error if the directory cannot be created.
    pub fn create_session(
        &self,
        global: u32,
        daily: u32,
        now: DateTime<Local>,
    ) -> Result<ActiveSession> {
        let day_dir = self.day_dir(now);
        let dir = day_dir.join(format!("VOO_{daily:02}"));
        if dir.exists() || self.find_session_dir(global)?.is_some() {
            return Err(Error::DuplicateFlight { global, daily });
        }

        fs::create_dir_all(&dir).map_err(|source| Error::DirectoryCreate {
            path: dir.clone(),
            source,
        })?;

        let month_name = now.format("%B").to_string().to_uppercase();
        let relative_dir = format!(
            "{}/{}/{:02}/VOO_{daily:02}",
            now.year(),
            month_name,
            now.day()
        );
        let meta = FlightMeta {
            id: format!(
                "{}-{:02}-{:02}-VOO{global:04}",
                now.year(),
                now.month(),
                now.day()
            ),
            global_number: global,
            daily_number: daily,
            year: now.year(),
            month: now.month(),
            month_name,
            day: now.day(),
            created_at: now.to_rfc3339(),
            date_human: now.format("%d/%m/%Y %H:%M:%S").to_string(),
            relative_dir,
            files: FlightFiles {
                coordinates: format!("VOO{daily:02}.txt"),
                path_kml: format!("PERCURSO{daily:02}.kml"),
                points_kml: format!("PONTOS{daily:02}.kml"),
                report: format!("DADOS{daily:02}.txt"),
                log: LOG_FILE.to_string(),
            },
            log_encrypted: false,
            completed: false,
            finalized_at: None,
            duration_secs: None,
            tubes: None,
            mean_speed_kmh: None,
            distance_total_m: None,
            events: Vec::new(),
        };

        Self::write_metadata(&dir, &meta)?;

        let coords_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(&meta.files.coordinates))?;
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(LOG_FILE))?;

        let mut session = ActiveSession {
            started_at: now.with_timezone(&Utc),
            meta,
            dir,
            coords_file,
            log_file,
            coordinates: Vec::new(),
            speeds: Vec::new(),
        };
        session.log_event(&format!(
            "flight {global} opened (daily {daily}) in {}",
            session.meta.relative_dir
        ))?;

        info!(
            "flight session created: global {global}, daily {daily} at {}",
            session.dir.display()
        );
        Ok(session)
    }

    /// Finalize a session: render KML artifacts, write the report, seal
    /// the log, and atomically persist the completed metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if any artifact cannot be written; the session
    /// directory is left with whatever was durably recorded.
    pub fn finalize(
        &self,
        mut session: ActiveSession,
        finished_at: DateTime<Utc>,
        report: &FlightReport,
    ) -> Result<FlightMeta> {
        session.log_event("flight finalized")?;

        let dir = session.dir.clone();
        let flight_name = format!("Flight path {}", session.meta.global_number);
        let release_points: Vec<(f64, f64)> = session
            .meta
            .events
            .iter()
            .filter(|e| e.is_actuation())
            .filter_map(|e| Some((e.latitude?, e.longitude?)))
            .collect();
        kml::write_artifacts(
            &dir.join(&session.meta.files.path_kml),
            &dir.join(&session.meta.files.points_kml),
            &flight_name,
            &session.coordinates,
            &release_points,
        )?;

        let tubes = session
            .meta
            .events
            .iter()
            .filter(|e| e.is_actuation())
            .count() as u64;
        let duration_secs = (finished_at - session.started_at)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0;
        let mean_speed_ms = if session.speeds.is_empty() {
            0.0
        } else {
            session.speeds.iter().sum::<f64>() / session.speeds.len() as f64
        };

        session.write_report(report, tubes, duration_secs, mean_speed_ms)?;

        // Close the log handle before re-reading the file for sealing
        let mut meta = session.meta;
        drop(session.log_file);
        drop(session.coords_file);

        let log_path = dir.join(LOG_FILE);
        let plaintext = fs::read(&log_path)?;
        let sealed = self.sealer.seal(&plaintext)?;
        if sealed.encrypted {
            let sealed_name = format!("{LOG_FILE}.enc");
            fs::write(dir.join(&sealed_name), &sealed.bytes)?;
            fs::remove_file(&log_path)?;
            meta.files.log = sealed_name;
            meta.log_encrypted = true;
        }

        meta.completed = true;
        meta.finalized_at = Some(finished_at.to_rfc3339());
        meta.duration_secs = Some(duration_secs);
        meta.tubes = Some(tubes);
        meta.mean_speed_kmh = Some(mean_speed_ms * 3.6);
        meta.distance_total_m = Some(tubes as f64 * report.trigger_distance_m);

        Self::write_metadata(&dir, &meta)?;
        info!(
            "flight {} finalized: {tubes} tubes, {duration_secs:.0}s",
            meta.global_number
        );
        Ok(meta)
    }

    /// Abandon a session after a reset command.
    ///
    /// The directory stays on disk; metadata keeps `completed: false`
    /// so the flight is visibly incomplete.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be rewritten.
    pub fn abandon(&self, mut session: ActiveSession) -> Result<()> {
        session.log_event("flight abandoned by reset; record is incomplete")?;
        Self::write_metadata(&session.dir, &session.meta)?;
        info!(
            "flight {} abandoned; directory kept at {}",
            session.meta.global_number,
            session.dir.display()
        );
        Ok(())
    }

    /// Read the metadata of a stored flight by global number.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FlightNotFound`] if no such flight exists.
    pub fn read_session(&self, global: u32) -> Result<FlightMeta> {
        match self.find_session_dir(global)? {
            Some((_, meta)) => Ok(meta),
            None => Err(Error::FlightNotFound(global)),
        }
    }

    /// List all stored flights, ordered by global number.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory tree cannot be read.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut summaries = Vec::new();
        for meta_path in self.metadata_paths()? {
            if let Ok(meta) = Self::read_metadata(&meta_path) {
                summaries.push(SessionSummary {
                    global_number: meta.global_number,
                    daily_number: meta.daily_number,
                    created_at: meta.created_at,
                    date_human: meta.date_human,
                    completed: meta.completed,
                    tubes: meta.tubes,
                    relative_dir: meta.relative_dir,
                });
            }
        }
        summaries.sort_by_key(|s| s.global_number);
        Ok(summaries)
    }

    /// Delete a stored flight directory by global number.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FlightNotFound`] if no such flight exists.
    pub fn delete_session(&self, global: u32) -> Result<()> {
        match self.find_session_dir(global)? {
            Some((dir, _)) => {
                fs::remove_dir_all(&dir)?;
                info!("flight {global} deleted ({})", dir.display());
                Ok(())
            }
            None => Err(Error::FlightNotFound(global)),
        }
    }
}

impl ActiveSession {
    /// The global flight number of this session.
    #[must_use]
    pub fn global_number(&self) -> u32 {
        self.meta.global_number
    }

    /// The per-day flight number of this session.
    #[must_use]
    pub fn daily_number(&self) -> u32 {
        self.meta.daily_number
    }

    /// Number of recorded actuation events.
    #[must_use]
    pub fn actuation_count(&self) -> u64 {
        self.meta.events.iter().filter(|e| e.is_actuation()).count() as u64
    }

    /// Append one coordinate durably.
    ///
    /// # Errors
    ///
    /// Returns an error if the append cannot be flushed to disk.
    pub fn record_coordinate(&mut self, latitude: f64, longitude: f64) -> Result<()> {
        writeln!(self.coords_file, "{latitude:.6}, {longitude:.6}")?;
        self.coords_file.flush()?;
        self.coords_file.sync_data()?;
        self.coordinates.push((latitude, longitude));
        debug!("coordinate recorded: {latitude:.6}, {longitude:.6}");
        Ok(())
    }

    /// Record a confirmed actuation event.
    ///
    /// Must be called only after the hardware trigger has returned
    /// success (or was deliberately skipped in simulation mode).
    ///
    /// # Errors
    ///
    /// Returns an error if the appends cannot be flushed to disk.
    pub fn record_actuation(
        &mut self,
        timestamp: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
        reason: TriggerReason,
    ) -> Result<()> {
        self.record_coordinate(latitude, longitude)?;
        self.meta.events.push(FlightEvent {
            timestamp,
            latitude: Some(latitude),
            longitude: Some(longitude),
            reason,
        });
        self.log_event(&format!(
            "release fired ({reason}) at {latitude:.6}, {longitude:.6}"
        ))
    }

    /// Record the manual stop as a non-actuation event.
    ///
    /// # Errors
    ///
    /// Returns an error if the append cannot be flushed to disk.
    pub fn record_stop(
        &mut self,
        timestamp: DateTime<Utc>,
        position: Option<(f64, f64)>,
    ) -> Result<()> {
        self.meta.events.push(FlightEvent {
            timestamp,
            latitude: position.map(|p| p.0),
            longitude: position.map(|p| p.1),
            reason: TriggerReason::ManualStop,
        });
        self.log_event("manual stop command received")
    }

    /// Fold one speed observation into the report statistics.
    pub fn record_speed(&mut self, speed_ms: f64) {
        self.speeds.push(speed_ms);
    }

    /// Append one line to the flight log durably.
    ///
    /// # Errors
    ///
    /// Returns an error if the append cannot be flushed to disk.
    pub fn log_event(&mut self, message: &str) -> Result<()> {
        writeln!(
            self.log_file,
            "{} | {message}",
            Utc::now().format("%Y-%m-%d %H:%M:%S")
        )?;
        self.log_file.flush()?;
        self.log_file.sync_data()?;
        Ok(())
    }

    fn write_report(
        &self,
        report: &FlightReport,
        tubes: u64,
        duration_secs: f64,
        mean_speed_ms: f64,
    ) -> Result<()> {
        let minutes = (duration_secs / 60.0) as u64;
        let seconds = (duration_secs % 60.0) as u64;

        let mut text = String::new();
        text.push_str(&"=".repeat(50));
        text.push('\n');
        text.push_str(&format!(
            "  FLIGHT REPORT - VOO_{}\n",
            self.meta.global_number
        ));
        text.push_str(&"=".repeat(50));
        text.push_str("\n\n");
        text.push_str(&format!("Flight start: {}\n\n", self.meta.date_human));
        text.push_str("OPERATION:\n");
        text.push_str(&"-".repeat(30));
        text.push('\n');
        text.push_str(&format!(
            "Distance between tubes: {:.0}m\n",
            report.trigger_distance_m
        ));
        text.push_str(&format!("Tubes released: {tubes}\n"));
        text.push_str(&format!("Duration: {minutes}min {seconds}s\n\n"));
        text.push_str("PERFORMANCE:\n");
        text.push_str(&"-".repeat(30));
        text.push('\n');
        text.push_str(&format!("Mean speed: {:.1} km/h\n", mean_speed_ms * 3.6));
        text.push_str(&format!(
            "Release distance covered: {:.0}m\n\n",
            tubes as f64 * report.trigger_distance_m
        ));
        text.push_str("DATA QUALITY:\n");
        text.push_str(&"-".repeat(30));
        text.push('\n');
        text.push_str(&format!("Satellites: {}\n", report.satellites));
        text.push_str(&format!("PDOP: {:.2}\n", report.pdop));

        fs::write(self.dir.join(&self.meta.files.report), text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seal::{FernetSealer, Passthrough};

    fn open_store(dir: &Path) -> SessionStore {
        SessionStore::open(dir, Box::new(Passthrough)).unwrap()
    }

    fn create_next(store: &SessionStore, now: DateTime<Local>) -> ActiveSession {
        let (global, daily) = store.next_numbers(now).unwrap();
        store.create_session(global, daily, now).unwrap()
    }

    fn sample_report() -> FlightReport {
        FlightReport {
            trigger_distance_m: 25.0,
            satellites: 8,
            pdop: 2.1,
        }
    }

    #[test]
    fn test_numbering_same_day() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let now = Local::now();

        let s1 = create_next(&store, now);
        let s2 = create_next(&store, now);
        let s3 = create_next(&store, now);

        assert_eq!(
            (s1.daily_number(), s2.daily_number(), s3.daily_number()),
            (1, 2, 3)
        );
        assert!(s1.global_number() < s2.global_number());
        assert!(s2.global_number() < s3.global_number());
    }

    #[test]
    fn test_numbering_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let now = Local::now();

        let third_global;
        {
            let store = open_store(dir.path());
            create_next(&store, now);
            create_next(&store, now);
            third_global = create_next(&store, now).global_number();
        }

        // New store over the same tree: no reuse, no gap
        let store = open_store(dir.path());
        let s4 = create_next(&store, now);
        assert_eq!(s4.daily_number(), 4);
        assert_eq!(s4.global_number(), third_global + 1);
    }

    #[test]
    fn test_legacy_root_directories_count_for_global() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("VOO_7")).unwrap();

        let store = open_store(dir.path());
        let (global, daily) = store.next_numbers(Local::now()).unwrap();
        assert_eq!(global, 8);
        assert_eq!(daily, 1);
    }

    #[test]
    fn test_duplicate_create_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let now = Local::now();

        let _s1 = store.create_session(1, 1, now).unwrap();
        let result = store.create_session(1, 1, now);
        assert!(matches!(result, Err(Error::DuplicateFlight { .. })));
    }

    #[test]
    fn test_coordinates_are_durable_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let mut session = create_next(&store, Local::now());

        session.record_coordinate(-23.5505, -46.6333).unwrap();
        session.record_coordinate(-23.5506, -46.6334).unwrap();

        let coords_path = session.dir.join(&session.meta.files.coordinates);
        let content = fs::read_to_string(coords_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["-23.550500, -46.633300", "-23.550600, -46.633400"]);
    }

    #[test]
    fn test_finalize_writes_artifacts_and_contract_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let now = Local::now();
        let mut session = create_next(&store, now);

        session
            .record_actuation(Utc::now(), -23.5505, -46.6333, TriggerReason::FirstStop)
            .unwrap();
        session
            .record_actuation(
                Utc::now(),
                -23.5506,
                -46.6334,
                TriggerReason::DistanceInterval,
            )
            .unwrap();
        session.record_speed(6.0);
        session.record_speed(8.0);

        let session_dir = session.dir.clone();
        let meta = store
            .finalize(session, Utc::now(), &sample_report())
            .unwrap();

        assert!(meta.completed);
        assert_eq!(meta.tubes, Some(2));
        assert!(!meta.log_encrypted);
        assert!((meta.mean_speed_kmh.unwrap() - 7.0 * 3.6).abs() < 0.01);
        assert!((meta.distance_total_m.unwrap() - 50.0).abs() < f64::EPSILON);

        for file in [
            &meta.files.coordinates,
            &meta.files.path_kml,
            &meta.files.points_kml,
            &meta.files.report,
            &meta.files.log,
        ] {
            assert!(session_dir.join(file).is_file(), "missing {file}");
        }

        // The persisted metadata keeps the contract field names
        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(session_dir.join(METADATA_FILE)).unwrap()).unwrap();
        for field in [
            "global_number",
            "daily_number",
            "year",
            "month_name",
            "day",
            "created_at",
            "log_encrypted",
        ] {
            assert!(raw.get(field).is_some(), "missing field {field}");
        }
        for file_key in ["coordinates", "path_kml", "points_kml", "report", "log"] {
            assert!(raw["files"].get(file_key).is_some(), "missing file {file_key}");
        }
    }

    #[test]
    fn test_points_kml_holds_release_points_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let mut session = create_next(&store, Local::now());

        session
            .record_actuation(Utc::now(), -23.5505, -46.6333, TriggerReason::FirstStop)
            .unwrap();
        session.record_coordinate(-23.5506, -46.6334).unwrap();
        session.record_coordinate(-23.5507, -46.6335).unwrap();
        session
            .record_actuation(
                Utc::now(),
                -23.5508,
                -46.6336,
                TriggerReason::DistanceInterval,
            )
            .unwrap();

        let session_dir = session.dir.clone();
        let meta = store
            .finalize(session, Utc::now(), &sample_report())
            .unwrap();

        // Path line carries the full track
        let path = fs::read_to_string(session_dir.join(&meta.files.path_kml)).unwrap();
        assert!(path.contains("-46.633400,-23.550600,0"));

        // Points document carries the two releases, not the breadcrumbs
        let points = fs::read_to_string(session_dir.join(&meta.files.points_kml)).unwrap();
        assert_eq!(points.matches("<Placemark>").count(), 2);
        assert!(points.contains("-46.633300,-23.550500,0"));
        assert!(points.contains("-46.633600,-23.550800,0"));
        assert!(!points.contains("-46.633400,-23.550600"));
    }

    #[test]
    fn test_finalize_report_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let mut session = create_next(&store, Local::now());

        session
            .record_actuation(Utc::now(), 0.0, 0.0, TriggerReason::FirstStop)
            .unwrap();
        let session_dir = session.dir.clone();
        let meta = store
            .finalize(session, Utc::now(), &sample_report())
            .unwrap();

        let report = fs::read_to_string(session_dir.join(&meta.files.report)).unwrap();
        assert!(report.contains("FLIGHT REPORT"));
        assert!(report.contains("Tubes released: 1"));
        assert!(report.contains("Distance between tubes: 25m"));
        assert!(report.contains("Satellites: 8"));
    }

    #[test]
    fn test_finalize_seals_log_with_key() {
        let dir = tempfile::tempdir().unwrap();
        let key = fernet::Fernet::generate_key();
        let store = SessionStore::open(
            dir.path(),
            Box::new(FernetSealer::new(&key).unwrap()),
        )
        .unwrap();

        let mut session = create_next(&store, Local::now());
        session.log_event("sensitive operational detail").unwrap();
        let session_dir = session.dir.clone();

        let meta = store
            .finalize(session, Utc::now(), &sample_report())
            .unwrap();

        assert!(meta.log_encrypted);
        assert_eq!(meta.files.log, "LOG_COMPLETO.txt.enc");
        assert!(!session_dir.join(LOG_FILE).exists());

        let token = fs::read_to_string(session_dir.join(&meta.files.log)).unwrap();
        let plaintext = fernet::Fernet::new(&key).unwrap().decrypt(&token).unwrap();
        let text = String::from_utf8(plaintext).unwrap();
        assert!(text.contains("sensitive operational detail"));
    }

    #[test]
    fn test_abandon_leaves_incomplete_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let mut session = create_next(&store, Local::now());
        session.record_coordinate(1.0, 2.0).unwrap();
        let global = session.global_number();
        let session_dir = session.dir.clone();

        store.abandon(session).unwrap();

        assert!(session_dir.is_dir());
        let meta = store.read_session(global).unwrap();
        assert!(!meta.completed);
    }

    #[test]
    fn test_read_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let now = Local::now();

        let s1 = create_next(&store, now);
        let g1 = s1.global_number();
        store.finalize(s1, Utc::now(), &sample_report()).unwrap();
        let s2 = create_next(&store, now);
        let g2 = s2.global_number();
        store.abandon(s2).unwrap();

        let list = store.list_sessions().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].global_number, g1);
        assert_eq!(list[1].global_number, g2);
        assert!(list[0].completed);
        assert!(!list[1].completed);

        let meta = store.read_session(g1).unwrap();
        assert_eq!(meta.global_number, g1);

        store.delete_session(g1).unwrap();
        assert!(matches!(
            store.read_session(g1),
            Err(Error::FlightNotFound(_))
        ));
        assert!(matches!(
            store.delete_session(g1),
            Err(Error::FlightNotFound(_))
        ));
        assert_eq!(store.list_sessions().unwrap().len(), 1);
    }

    #[test]
    fn test_manual_stop_is_non_actuation_event() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let mut session = create_next(&store, Local::now());

        session
            .record_actuation(Utc::now(), 1.0, 2.0, TriggerReason::FirstStop)
            .unwrap();
        session.record_stop(Utc::now(), Some((1.0, 2.0))).unwrap();

        assert_eq!(session.actuation_count(), 1);
        let meta = store
            .finalize(session, Utc::now(), &sample_report())
            .unwrap();
        assert_eq!(meta.tubes, Some(1));
        assert_eq!(meta.events.len(), 2);
        assert_eq!(meta.events[1].reason, TriggerReason::ManualStop);
    }

    #[test]
    fn test_trigger_reason_display() {
        assert_eq!(TriggerReason::FirstStop.to_string(), "first_stop");
        assert_eq!(
            TriggerReason::DistanceInterval.to_string(),
            "distance_interval"
        );
        assert_eq!(TriggerReason::ManualStop.to_string(), "manual_stop");
    }
}
