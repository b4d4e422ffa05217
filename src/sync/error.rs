use thiserror::Error;

use crate::store::StoreError;

/// Why a sync cycle did not deliver a payload.
///
/// `Disabled`, `ConfigIncomplete`, `SourceUnavailable` and `NoNewData` are skips:
/// the cycle ended cleanly and nothing was sent. The rest are failures; persisted progress is left untouched so the
/// next cycle retries the same data.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Delay is zero and the trigger was not `nodelay`.
    #[error("sync disabled")]
    Disabled,

    /// A required setting (key, endpoint, delay, station profile) is missing.
    #[error("sync config incomplete: {0}")]
    ConfigIncomplete(String),

    /// Log file missing or a radio parameter row absent.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// VFO mode code outside the X6100 mode table.
    #[error("unknown mode code: {0}")]
    UnknownMode(i64),

    /// Nothing new since the last successful upload.
    #[error("no new data: {0}")]
    NoNewData(String),

    /// Connection refused, DNS failure, timeout.
    #[error("URL Error: {0}")]
    Transport(String),

    /// Endpoint answered with something other than 200.
    #[error("HTTP Error {status}")]
    RemoteRejected { status: u16, body: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    /// True for outcomes that are a normal no-op rather than a failure.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            SyncError::Disabled
                | SyncError::ConfigIncomplete(_)
                | SyncError::SourceUnavailable(_)
                | SyncError::NoNewData(_)
        )
    }
}
