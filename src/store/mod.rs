//! # Parameter Store
//!
//! Key/value access to the radio's SQLite database. The X6100 GUI keeps its
//! settings in two tables:
//!
//! - `params(name, val)`: global parameters (`band`, `pwr`, and the `sync_*` rows
//!   owned by this service)
//! - `band_params(bands_id, name, val)`: per-band VFO settings (`vfoa_freq`, `vfoa_mode`)
//!
//! Values may be stored as INTEGER, REAL or TEXT depending on who wrote them, so
//! every read is normalized to a `String`.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

pub const SYNC_KEY: &str = "sync_key";
pub const SYNC_ENDPOINT: &str = "sync_endpoint";
pub const SYNC_DELAY: &str = "sync_delay";
pub const SYNC_TIMESTAMP: &str = "sync_timestamp";
pub const SYNC_STATION_PROFILE_ID: &str = "sync_station_profile_id";
pub const SYNC_LOG_OFFSET: &str = "sync_log_offset";

pub const PARAM_POWER: &str = "pwr";
pub const PARAM_BAND: &str = "band";
pub const BAND_VFOA_FREQ: &str = "vfoa_freq";
pub const BAND_VFOA_MODE: &str = "vfoa_mode";

/// Errors raised by the parameter store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The connection mutex was poisoned by a panicking holder.
    #[error("store lock poisoned")]
    Poisoned,
}

/// Durable name/value storage consumed by the sync subsystem.
pub trait ParamStore: Send + Sync {
    /// Read a global parameter. `Ok(None)` when the row does not exist.
    fn get(&self, name: &str) -> Result<Option<String>, StoreError>;

    /// Insert or update a global parameter.
    fn set(&self, name: &str, value: &str) -> Result<(), StoreError> {
        self.set_many(&[(name, value.to_string())])
    }

    /// Upsert several parameters in one transaction.
    fn set_many(&self, values: &[(&str, String)]) -> Result<(), StoreError>;

    /// Read a per-band parameter.
    fn band_param(&self, band: &str, name: &str) -> Result<Option<String>, StoreError>;
}

/// `ParamStore` backed by a single SQLite connection.
pub struct SqliteParamStore {
    conn: Mutex<Connection>,
}

impl SqliteParamStore {
    /// Open the database at `path`, creating the parameter tables if missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Private in-memory database; contents vanish on drop.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        // The radio firmware creates these tables itself; this only matters for
        // fresh databases.
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS params (name TEXT, val);
             CREATE TABLE IF NOT EXISTS band_params (bands_id INTEGER, name TEXT, val);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Insert or update a per-band parameter.
    pub fn put_band_param(&self, band: &str, name: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE band_params SET val = ?1 WHERE bands_id = ?2 AND name = ?3",
            params![value, band, name],
        )?;
        if updated == 0 {
            conn.execute(
                "INSERT INTO band_params (bands_id, name, val) VALUES (?1, ?2, ?3)",
                params![band, name, value],
            )?;
        }
        Ok(())
    }
}

impl ParamStore for SqliteParamStore {
    fn get(&self, name: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT val FROM params WHERE name = ?1",
                params![name],
                |row| row.get::<_, Value>(0),
            )
            .optional()?;
        Ok(value.and_then(value_to_string))
    }

    fn set_many(&self, values: &[(&str, String)]) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        // `params.name` carries no unique constraint in the radio's schema, so no ON CONFLICT.
        for (name, val) in values {
            let updated = tx.execute(
                "UPDATE params SET val = ?1 WHERE name = ?2",
                params![val, name],
            )?;
            if updated == 0 {
                tx.execute(
                    "INSERT INTO params (name, val) VALUES (?1, ?2)",
                    params![name, val],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn band_param(&self, band: &str, name: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT val FROM band_params WHERE bands_id = ?1 AND name = ?2",
                params![band, name],
                |row| row.get::<_, Value>(0),
            )
            .optional()?;
        Ok(value.and_then(value_to_string))
    }
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(f) => Some(f.to_string()),
        Value::Text(s) => Some(s),
        Value::Blob(b) => Some(String::from_utf8_lossy(&b).into_owned()),
    }
}
