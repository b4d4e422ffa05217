//! # x6100-webserver - Wavelog sync for the Xiegu X6100
//!
//! A small web service that runs on the Xiegu X6100 transceiver and keeps a
//! [Wavelog](https://www.wavelog.org/) logbook up to date.
//!
//! ## Features
//!
//! - **Radio state sync**: pushes the current VFO A frequency, mode and power,
//!   skipping uploads when nothing changed.
//! - **Log tail sync**: uploads ADIF records appended to a log file since the last
//!   acknowledged byte offset.
//! - **Self-rescheduling**: a single one-shot timer re-armed after each cycle with
//!   the delay currently stored in the radio's database.
//! - **HTTP API**: read, save and trigger sync from the radio's web UI.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use x6100_webserver::store::SqliteParamStore;
//! use x6100_webserver::sync::{SyncClient, SyncService, SyncSource, SyncTrigger};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteParamStore::open("/mnt/params.db")?);
//!     let service = SyncService::start(store, SyncSource::radio_state("Xiegu X6100"), SyncClient::default());
//!
//!     // First cycle arms the timer; later cycles re-arm themselves.
//!     let _ = service.run(SyncTrigger::Auto).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - TOML service configuration
//! - [`store`] - parameter database access
//! - [`sync`] - payload sources, uploader, timer and the sync cycle
//! - [`web`] - `axum` routes for the sync API
//! - [`metrics`] - process-wide sync counters
//! - [`logutil`] - single-line log escaping

pub mod config;
pub mod logutil;
pub mod metrics;
pub mod store;
pub mod sync;
pub mod web;
