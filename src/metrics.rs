//! Process-wide sync counters, exposed on `/api/sync_stats`.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

static CYCLES: AtomicU64 = AtomicU64::new(0);
static SENT: AtomicU64 = AtomicU64::new(0);
static SKIPPED: AtomicU64 = AtomicU64::new(0);
static FAILED: AtomicU64 = AtomicU64::new(0);
static BYTES_SENT: AtomicU64 = AtomicU64::new(0);
static POST_LATENCY_SUM_MS: AtomicU64 = AtomicU64::new(0);

pub fn inc_cycles() {
    CYCLES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_sent(bytes: usize, started: Instant) {
    SENT.fetch_add(1, Ordering::Relaxed);
    BYTES_SENT.fetch_add(bytes as u64, Ordering::Relaxed);
    let ms = started.elapsed().as_millis() as u64;
    POST_LATENCY_SUM_MS.fetch_add(ms, Ordering::Relaxed);
}

pub fn inc_skipped() {
    SKIPPED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_failed() {
    FAILED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Snapshot {
    pub cycles: u64,
    pub sent: u64,
    pub skipped: u64,
    pub failed: u64,
    pub bytes_sent: u64,
    pub post_latency_avg_ms: Option<u64>,
}

pub fn snapshot() -> Snapshot {
    let sent = SENT.load(Ordering::Relaxed);
    let sum = POST_LATENCY_SUM_MS.load(Ordering::Relaxed);
    Snapshot {
        cycles: CYCLES.load(Ordering::Relaxed),
        sent,
        skipped: SKIPPED.load(Ordering::Relaxed),
        failed: FAILED.load(Ordering::Relaxed),
        bytes_sent: BYTES_SENT.load(Ordering::Relaxed),
        post_latency_avg_ms: if sent > 0 { Some(sum / sent) } else { None },
    }
}
