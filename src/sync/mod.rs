//! # Wavelog Sync
//!
//! Periodically pushes station state to a Wavelog instance. One of two sources is
//! wired in per deployment (see [`source::SyncSource`]):
//!
//! - **Radio state**: current frequency/mode/power read from the radio's parameter
//!   database, deduplicated against the last payload that was accepted.
//! - **Log tail**: new bytes appended to an ADIF log since the last acknowledged
//!   offset.
//!
//! A cycle is `resolve config -> build payload -> POST -> commit progress -> re-arm`.
//! The timer lives in a dedicated actor ([`scheduler`]); when it fires, the sync
//! worker runs an auto cycle which re-reads the delay and arms the next one.
//!
//! ```text
//!  HTTP handlers ──┐                      ┌── timer actor ──(fired)──┐
//!                  ▼                      │                          ▼
//!            SyncService::run ── arm ─────┘                   sync worker
//!                  │                                                 │
//!          SyncSource::build_payload ─► SyncClient::post ◄───────────┘
//! ```

pub mod client;
pub mod error;
pub mod scheduler;
pub mod service;
pub mod source;

use serde::{Deserialize, Deserializer};

use crate::store::{
    ParamStore, StoreError, SYNC_DELAY, SYNC_ENDPOINT, SYNC_KEY, SYNC_STATION_PROFILE_ID,
};

pub use client::{SyncClient, SyncResponse};
pub use error::SyncError;
pub use scheduler::{start_scheduler, SchedulerHandle, SchedulerStatus, TimerFired};
pub use service::{SyncReport, SyncService, SyncStatus, SyncTrigger};
pub use source::{LogTailSource, RadioSnapshot, RadioStateSource, SyncSource};

/// Fully resolved sync settings used by one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub key: String,
    pub endpoint: String,
    /// Seconds between auto cycles; 0 disables auto sync.
    pub delay: u64,
    pub station_profile_id: Option<String>,
}

/// Optional per-request override posted to `do_sync`.
///
/// Present fields replace the stored value; absent fields fall back to the store.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncOverride {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_delay")]
    pub delay: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_opt_string")]
    pub station_profile_id: Option<String>,
    /// Send now: bypass the delay check and dedup, and do not re-arm.
    #[serde(default)]
    pub nodelay: bool,
}

/// Sync settings as saved through `save_sync`.
#[derive(Debug, Clone, Deserialize)]
pub struct SaveSyncRequest {
    pub key: String,
    pub endpoint: String,
    #[serde(deserialize_with = "deserialize_delay")]
    pub delay: i64,
    #[serde(default, deserialize_with = "deserialize_opt_string")]
    pub station_profile_id: Option<String>,
}

impl SaveSyncRequest {
    /// Reject values that cannot be persisted as a usable config.
    pub fn validate(&self) -> Result<(), String> {
        if self.key.trim().is_empty() {
            return Err("key is required".into());
        }
        if self.endpoint.trim().is_empty() {
            return Err("endpoint is required".into());
        }
        if self.delay < 0 {
            return Err(format!("delay must be >= 0, got {}", self.delay));
        }
        Ok(())
    }
}

/// Delay, station profile and similar fields arrive as JSON numbers or strings
/// depending on which form posted them.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Int(i64),
    Float(f64),
    Text(String),
}

fn parse_delay(value: NumberOrString) -> Result<i64, String> {
    match value {
        NumberOrString::Int(i) => Ok(i),
        NumberOrString::Float(f) if f.fract() == 0.0 => Ok(f as i64),
        NumberOrString::Float(f) => Err(format!("delay must be an integer, got {f}")),
        NumberOrString::Text(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("delay must be an integer, got {s:?}")),
    }
}

fn deserialize_delay<'de, D: Deserializer<'de>>(de: D) -> Result<i64, D::Error> {
    parse_delay(NumberOrString::deserialize(de)?).map_err(serde::de::Error::custom)
}

fn deserialize_opt_delay<'de, D: Deserializer<'de>>(de: D) -> Result<Option<i64>, D::Error> {
    match Option::<NumberOrString>::deserialize(de)? {
        Some(v) => parse_delay(v).map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

fn deserialize_opt_string<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<NumberOrString>::deserialize(de)? {
        Some(NumberOrString::Int(i)) => Some(i.to_string()),
        Some(NumberOrString::Float(f)) => Some(f.to_string()),
        Some(NumberOrString::Text(s)) => Some(s),
        None => None,
    })
}

/// Stored delay text to seconds. Negative values mean disabled.
pub fn parse_stored_delay(raw: &str) -> Result<u64, SyncError> {
    raw.trim()
        .parse::<i64>()
        .map(|d| d.max(0) as u64)
        .map_err(|_| SyncError::ConfigIncomplete(format!("sync_delay is not an integer: {raw:?}")))
}

/// Read the delay currently persisted, 0 when unset.
pub fn stored_delay(store: &dyn ParamStore) -> Result<u64, SyncError> {
    match store.get(SYNC_DELAY)? {
        Some(raw) => parse_stored_delay(&raw),
        None => Ok(0),
    }
}

/// Merge an optional override over the stored settings into one [`SyncConfig`].
///
/// A zero or unset delay is `Disabled` unless the override asks for `nodelay`;
/// after that, a missing key or endpoint is `ConfigIncomplete`.
pub fn resolve_config(
    store: &dyn ParamStore,
    overrides: Option<&SyncOverride>,
) -> Result<SyncConfig, SyncError> {
    let nodelay = overrides.is_some_and(|o| o.nodelay);
    let delay = match overrides.and_then(|o| o.delay) {
        Some(d) => d.max(0) as u64,
        None => stored_delay(store)?,
    };
    if delay == 0 && !nodelay {
        return Err(SyncError::Disabled);
    }

    let key = pick(overrides.and_then(|o| o.key.clone()), store, SYNC_KEY)?
        .ok_or_else(|| SyncError::ConfigIncomplete("key is not set".into()))?;
    let endpoint = pick(overrides.and_then(|o| o.endpoint.clone()), store, SYNC_ENDPOINT)?
        .ok_or_else(|| SyncError::ConfigIncomplete("endpoint is not set".into()))?;
    let station_profile_id = pick(
        overrides.and_then(|o| o.station_profile_id.clone()),
        store,
        SYNC_STATION_PROFILE_ID,
    )?;

    Ok(SyncConfig {
        key,
        endpoint,
        delay,
        station_profile_id,
    })
}

fn pick(
    value: Option<String>,
    store: &dyn ParamStore,
    name: &str,
) -> Result<Option<String>, StoreError> {
    let value = match value {
        Some(v) => Some(v),
        None => store.get(name)?,
    };
    Ok(value.filter(|v| !v.trim().is_empty()))
}
