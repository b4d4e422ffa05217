//! Payload builders for the two sync sources.
//!
//! Each source builds the JSON body for one cycle and, once the endpoint accepted
//! it, records how far it got ([`Progress`]). Which source runs is fixed when the
//! service is constructed.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, warn};
use serde::Serialize;

use super::{SyncConfig, SyncError};
use crate::store::{
    ParamStore, BAND_VFOA_FREQ, BAND_VFOA_MODE, PARAM_BAND, PARAM_POWER, SYNC_LOG_OFFSET,
};

pub const DEFAULT_RADIO_NAME: &str = "Xiegu X6100";

/// X6100 `vfoa_mode` codes. LSB/USB and their digital variants all report as SSB.
const MODE_TABLE: [&str; 8] = ["SSB", "SSB", "SSB", "SSB", "CW", "CW", "AM", "FM"];

pub fn mode_name(code: i64) -> Result<&'static str, SyncError> {
    usize::try_from(code)
        .ok()
        .and_then(|i| MODE_TABLE.get(i).copied())
        .ok_or(SyncError::UnknownMode(code))
}

/// A payload ready to send plus the progress to record if it is accepted.
#[derive(Debug, Clone)]
pub struct PreparedSync {
    pub body: serde_json::Value,
    pub progress: Progress,
    /// Short human description for logs and result messages.
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    Radio(RadioSnapshot),
    /// File size observed before the read.
    LogOffset(u64),
}

/// Build/commit capability shared by both sources.
pub trait PayloadSource {
    /// Build the body for this cycle. `nodelay` bypasses deduplication.
    fn build_payload(
        &self,
        store: &dyn ParamStore,
        config: &SyncConfig,
        nodelay: bool,
    ) -> Result<PreparedSync, SyncError>;

    /// Record progress after the endpoint answered 200.
    fn apply_progress(&self, store: &dyn ParamStore, progress: &Progress)
        -> Result<(), SyncError>;
}

/// The source wired into a deployment.
pub enum SyncSource {
    RadioState(RadioStateSource),
    LogTail(LogTailSource),
}

impl SyncSource {
    pub fn radio_state(radio_name: impl Into<String>) -> Self {
        SyncSource::RadioState(RadioStateSource::new(radio_name))
    }

    pub fn log_tail(path: impl Into<PathBuf>) -> Self {
        SyncSource::LogTail(LogTailSource::new(path))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SyncSource::RadioState(_) => "radio_state",
            SyncSource::LogTail(_) => "log_tail",
        }
    }
}

impl PayloadSource for SyncSource {
    fn build_payload(
        &self,
        store: &dyn ParamStore,
        config: &SyncConfig,
        nodelay: bool,
    ) -> Result<PreparedSync, SyncError> {
        match self {
            SyncSource::RadioState(s) => s.build_payload(store, config, nodelay),
            SyncSource::LogTail(s) => s.build_payload(store, config, nodelay),
        }
    }

    fn apply_progress(
        &self,
        store: &dyn ParamStore,
        progress: &Progress,
    ) -> Result<(), SyncError> {
        match self {
            SyncSource::RadioState(s) => s.apply_progress(store, progress),
            SyncSource::LogTail(s) => s.apply_progress(store, progress),
        }
    }
}

// ---------------------------------------------------------------------------
// Radio state
// ---------------------------------------------------------------------------

/// The values compared for deduplication.
#[derive(Debug, Clone, PartialEq)]
pub struct RadioSnapshot {
    pub mode: &'static str,
    pub frequency: String,
    pub power: f64,
}

#[derive(Debug, Serialize)]
struct RadioPayload<'a> {
    key: &'a str,
    radio: &'a str,
    power: f64,
    frequency: &'a str,
    mode: &'a str,
}

/// Reports the live VFO A frequency, mode and power.
pub struct RadioStateSource {
    radio_name: String,
    last_sent: Mutex<Option<RadioSnapshot>>,
}

impl RadioStateSource {
    pub fn new(radio_name: impl Into<String>) -> Self {
        Self {
            radio_name: radio_name.into(),
            last_sent: Mutex::new(None),
        }
    }

    /// Last snapshot the endpoint accepted.
    pub fn last_sent(&self) -> Option<RadioSnapshot> {
        self.last_sent.lock().ok().and_then(|guard| guard.clone())
    }

    fn read_snapshot(&self, store: &dyn ParamStore) -> Result<RadioSnapshot, SyncError> {
        let raw_power = require(store.get(PARAM_POWER)?, PARAM_POWER)?;
        let power = raw_power.trim().parse::<f64>().map_err(|_| {
            SyncError::SourceUnavailable(format!("{PARAM_POWER} is not numeric: {raw_power:?}"))
        })? / 10.0;

        let band = require(store.get(PARAM_BAND)?, PARAM_BAND)?;
        let frequency = require(store.band_param(&band, BAND_VFOA_FREQ)?, BAND_VFOA_FREQ)?;
        let raw_mode = require(store.band_param(&band, BAND_VFOA_MODE)?, BAND_VFOA_MODE)?;
        let code = raw_mode.trim().parse::<i64>().map_err(|_| {
            SyncError::SourceUnavailable(format!("{BAND_VFOA_MODE} is not numeric: {raw_mode:?}"))
        })?;

        Ok(RadioSnapshot {
            mode: mode_name(code)?,
            frequency,
            power,
        })
    }
}

fn require(value: Option<String>, name: &str) -> Result<String, SyncError> {
    value.ok_or_else(|| SyncError::SourceUnavailable(format!("{name} is not set")))
}

impl PayloadSource for RadioStateSource {
    fn build_payload(
        &self,
        store: &dyn ParamStore,
        config: &SyncConfig,
        nodelay: bool,
    ) -> Result<PreparedSync, SyncError> {
        let snapshot = self.read_snapshot(store)?;

        if !nodelay && self.last_sent().as_ref() == Some(&snapshot) {
            debug!(
                "radio state unchanged ({} {} {}), skipping",
                snapshot.mode, snapshot.frequency, snapshot.power
            );
            return Err(SyncError::NoNewData("radio state unchanged".into()));
        }

        let body = serde_json::to_value(RadioPayload {
            key: &config.key,
            radio: &self.radio_name,
            power: snapshot.power,
            frequency: &snapshot.frequency,
            mode: snapshot.mode,
        })
        .map_err(|e| SyncError::SourceUnavailable(format!("payload encoding failed: {e}")))?;

        Ok(PreparedSync {
            body,
            summary: format!(
                "{} {} Hz {} W",
                snapshot.mode, snapshot.frequency, snapshot.power
            ),
            progress: Progress::Radio(snapshot),
        })
    }

    fn apply_progress(
        &self,
        _store: &dyn ParamStore,
        progress: &Progress,
    ) -> Result<(), SyncError> {
        if let Progress::Radio(snapshot) = progress {
            if let Ok(mut guard) = self.last_sent.lock() {
                *guard = Some(snapshot.clone());
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Log tail
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct AdifPayload<'a> {
    key: &'a str,
    station_profile_id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    string: &'a str,
}

/// Uploads whatever was appended to an ADIF log since the last accepted offset.
pub struct LogTailSource {
    path: PathBuf,
}

impl LogTailSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Persisted offset; an unreadable value restarts from the beginning.
pub fn stored_offset(store: &dyn ParamStore) -> Result<u64, SyncError> {
    Ok(match store.get(SYNC_LOG_OFFSET)? {
        Some(raw) => raw.trim().parse::<u64>().unwrap_or_else(|_| {
            warn!("ignoring unreadable {SYNC_LOG_OFFSET} {raw:?}");
            0
        }),
        None => 0,
    })
}

impl PayloadSource for LogTailSource {
    fn build_payload(
        &self,
        store: &dyn ParamStore,
        config: &SyncConfig,
        _nodelay: bool,
    ) -> Result<PreparedSync, SyncError> {
        let station_profile_id = config.station_profile_id.as_deref().ok_or_else(|| {
            SyncError::ConfigIncomplete("station_profile_id is not set".into())
        })?;
        let offset = stored_offset(store)?;

        let unavailable =
            |e: std::io::Error| SyncError::SourceUnavailable(format!("{}: {e}", self.path.display()));

        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SyncError::SourceUnavailable(format!(
                    "log file {} not found",
                    self.path.display()
                )))
            }
            Err(e) => return Err(unavailable(e)),
        };
        let size = file.metadata().map_err(unavailable)?.len();
        if size <= offset {
            // Also covers a truncated or rotated log.
            return Err(SyncError::NoNewData(format!(
                "log size {size} <= offset {offset}"
            )));
        }

        // Read only up to the size observed above; later appends wait for the next cycle.
        file.seek(SeekFrom::Start(offset)).map_err(unavailable)?;
        let mut raw = Vec::with_capacity((size - offset) as usize);
        file.take(size - offset)
            .read_to_end(&mut raw)
            .map_err(unavailable)?;
        let text = String::from_utf8_lossy(&raw);
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::NoNewData("only whitespace appended".into()));
        }

        let body = serde_json::to_value(AdifPayload {
            key: &config.key,
            station_profile_id,
            kind: "adif",
            string: text,
        })
        .map_err(|e| SyncError::SourceUnavailable(format!("payload encoding failed: {e}")))?;

        Ok(PreparedSync {
            body,
            summary: format!("{} bytes of ADIF [{offset}..{size})", size - offset),
            progress: Progress::LogOffset(size),
        })
    }

    fn apply_progress(
        &self,
        store: &dyn ParamStore,
        progress: &Progress,
    ) -> Result<(), SyncError> {
        if let Progress::LogOffset(offset) = progress {
            let current = stored_offset(store)?;
            if *offset > current {
                store.set(SYNC_LOG_OFFSET, &offset.to_string())?;
            }
        }
        Ok(())
    }
}
