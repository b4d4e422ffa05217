//! The sync cycle and its owner.

use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use super::client::SyncClient;
use super::scheduler::{start_scheduler, SchedulerHandle, TimerFired};
use super::source::{PayloadSource, SyncSource};
use super::{resolve_config, stored_delay, SaveSyncRequest, SyncError, SyncOverride};
use crate::logutil::escape_log;
use crate::metrics;
use crate::store::{
    ParamStore, SYNC_DELAY, SYNC_ENDPOINT, SYNC_KEY, SYNC_LOG_OFFSET, SYNC_STATION_PROFILE_ID,
    SYNC_TIMESTAMP,
};

/// Format of the persisted `sync_timestamp` (local time).
pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// What started a cycle.
#[derive(Debug, Clone)]
pub enum SyncTrigger {
    /// Timer fire or a bare `do_sync`: stored config, dedup, re-arm.
    Auto,
    /// `do_sync` with a body.
    Manual(SyncOverride),
}

/// Result of a cycle that delivered a payload.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub summary: String,
    pub response: String,
    pub bytes_sent: usize,
    pub timestamp: String,
}

/// Flat projection of the persisted sync rows; unset rows are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub station_profile_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_offset: Option<String>,
}

pub struct SyncService {
    store: Arc<dyn ParamStore>,
    source: Arc<SyncSource>,
    client: SyncClient,
    scheduler: SchedulerHandle,
    // Held for a whole cycle, including the delay read and re-arm at its end,
    // and by `save`, so neither another cycle nor a saved config can land in
    // between.
    cycle_lock: Mutex<()>,
}

impl SyncService {
    /// Build the service and spawn its timer actor and sync worker.
    ///
    /// Nothing is armed until the first cycle runs or a config is saved. Must be
    /// called inside a tokio runtime.
    pub fn start(store: Arc<dyn ParamStore>, source: SyncSource, client: SyncClient) -> Arc<Self> {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let scheduler = start_scheduler(fired_tx);
        let service = Arc::new(Self {
            store,
            source: Arc::new(source),
            client,
            scheduler,
            cycle_lock: Mutex::new(()),
        });
        spawn_worker(Arc::downgrade(&service), fired_rx);
        info!("sync service started (source: {})", service.source.kind());
        service
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    pub fn source(&self) -> &SyncSource {
        &self.source
    }

    /// Run one cycle now. Auto and non-`nodelay` manual cycles re-arm the timer
    /// afterwards, whatever the outcome.
    pub async fn run(&self, trigger: SyncTrigger) -> Result<SyncReport, SyncError> {
        let _cycle = self.cycle_lock.lock().await;
        metrics::inc_cycles();

        let overrides = match &trigger {
            SyncTrigger::Auto => None,
            SyncTrigger::Manual(o) => Some(o),
        };
        let nodelay = overrides.is_some_and(|o| o.nodelay);

        let result = self.cycle(overrides).await;
        match &result {
            Ok(report) => info!("sync ok: {} -> {}", report.summary, escape_log(&report.response)),
            Err(e) if e.is_skip() => {
                metrics::inc_skipped();
                debug!("sync skipped: {}", e);
            }
            Err(SyncError::RemoteRejected { status, body }) => {
                metrics::inc_failed();
                warn!("sync rejected with HTTP {}: {}", status, escape_log(body));
            }
            Err(e) => {
                metrics::inc_failed();
                warn!("sync failed: {}", e);
            }
        }

        if !nodelay {
            let delay = self.next_delay(overrides);
            self.scheduler.arm_secs(delay);
        }
        result
    }

    async fn cycle(&self, overrides: Option<&SyncOverride>) -> Result<SyncReport, SyncError> {
        let nodelay = overrides.is_some_and(|o| o.nodelay);
        let config = resolve_config(self.store.as_ref(), overrides)?;
        // File and SQLite reads block; keep them off the runtime workers.
        let (source, store) = (Arc::clone(&self.source), Arc::clone(&self.store));
        let endpoint = config.endpoint.clone();
        let prepared = tokio::task::spawn_blocking(move || {
            source.build_payload(store.as_ref(), &config, nodelay)
        })
        .await
        .map_err(|e| SyncError::SourceUnavailable(format!("payload task failed: {e}")))??;

        let started = Instant::now();
        let response = self.client.post(&endpoint, &prepared.body).await?;
        metrics::record_sent(response.bytes_sent, started);

        self.source
            .apply_progress(self.store.as_ref(), &prepared.progress)?;
        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        self.store.set(SYNC_TIMESTAMP, &timestamp)?;

        Ok(SyncReport {
            summary: prepared.summary,
            response: response.body,
            bytes_sent: response.bytes_sent,
            timestamp,
        })
    }

    /// Delay for the next auto cycle, read from the store now rather than
    /// remembered from when the current timer was armed.
    fn next_delay(&self, overrides: Option<&SyncOverride>) -> u64 {
        if let Some(d) = overrides.and_then(|o| o.delay) {
            return d.max(0) as u64;
        }
        stored_delay(self.store.as_ref()).unwrap_or_else(|e| {
            warn!("cannot read sync delay, auto sync stays idle: {}", e);
            0
        })
    }

    /// Persist new settings and restart the timer with the new delay.
    ///
    /// Waits for a running cycle to finish so its re-arm cannot replace this one.
    pub async fn save(&self, request: &SaveSyncRequest) -> Result<(), SyncError> {
        let _cycle = self.cycle_lock.lock().await;
        let delay = request.delay.max(0) as u64;
        let mut rows = vec![
            (SYNC_KEY, request.key.clone()),
            (SYNC_ENDPOINT, request.endpoint.clone()),
            (SYNC_DELAY, delay.to_string()),
        ];
        if let Some(id) = &request.station_profile_id {
            rows.push((SYNC_STATION_PROFILE_ID, id.clone()));
        }
        self.store.set_many(&rows)?;
        self.scheduler.arm_secs(delay);
        info!(
            "sync config saved: endpoint={} delay={}s",
            request.endpoint, delay
        );
        Ok(())
    }

    pub fn status(&self) -> Result<SyncStatus, SyncError> {
        let get = |name: &str| self.store.get(name);
        Ok(SyncStatus {
            key: get(SYNC_KEY)?,
            endpoint: get(SYNC_ENDPOINT)?,
            delay: get(SYNC_DELAY)?,
            timestamp: get(SYNC_TIMESTAMP)?,
            station_profile_id: get(SYNC_STATION_PROFILE_ID)?,
            log_offset: get(SYNC_LOG_OFFSET)?,
        })
    }
}

/// Consume timer fires one at a time. Exits once the service is dropped.
fn spawn_worker(
    service: std::sync::Weak<SyncService>,
    mut fired: mpsc::UnboundedReceiver<TimerFired>,
) {
    tokio::spawn(async move {
        while let Some(fire) = fired.recv().await {
            let Some(service) = service.upgrade() else {
                break;
            };
            debug!("sync timer fired (#{})", fire.generation);
            // Outcome already logged by `run`.
            let _ = service.run(SyncTrigger::Auto).await;
        }
        debug!("sync worker terminated");
    });
}
