//! Test utilities & fixtures.
//! A fake Wavelog endpoint and pre-seeded parameter stores.
#![allow(dead_code)] // each test crate uses a different subset

use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;

use x6100_webserver::store::{
    ParamStore, SqliteParamStore, BAND_VFOA_FREQ, BAND_VFOA_MODE, PARAM_BAND, PARAM_POWER,
    SYNC_DELAY, SYNC_ENDPOINT, SYNC_KEY,
};

#[derive(Debug, Clone)]
pub struct Received {
    pub body: Value,
    pub accept: Option<String>,
}

#[derive(Clone, Default)]
struct FakeState {
    received: Arc<Mutex<Vec<Received>>>,
    status: Arc<AtomicU16>,
    delay_ms: Arc<AtomicU64>,
}

/// In-process stand-in for a Wavelog instance.
pub struct FakeWavelog {
    pub url: String,
    state: FakeState,
}

impl FakeWavelog {
    pub fn received(&self) -> Vec<Received> {
        self.state.received.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.state.received.lock().unwrap().len()
    }

    /// Status code returned from now on.
    pub fn respond_with(&self, status: u16) {
        self.state.status.store(status, Ordering::SeqCst);
    }

    /// Hold each response for `delay` before answering.
    pub fn respond_after(&self, delay: Duration) {
        self.state
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Poll until `n` uploads arrived or `within` elapsed.
    pub async fn wait_for(&self, n: usize, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if self.count() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        self.count() >= n
    }
}

async fn accept_upload(
    State(state): State<FakeState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, &'static str) {
    let accept = headers
        .get("accept")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.received.lock().unwrap().push(Received { body, accept });
    let delay = state.delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let status = StatusCode::from_u16(state.status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, r#"{"status":"success"}"#)
}

pub async fn spawn_wavelog() -> FakeWavelog {
    let state = FakeState::default();
    state.status.store(200, Ordering::SeqCst);
    let app = Router::new()
        .route("/api/radio", post(accept_upload))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    FakeWavelog {
        url: format!("http://{addr}/api/radio"),
        state,
    }
}

/// URL on a local port with nothing listening.
pub fn refused_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}/api/radio")
}

pub fn sync_store(endpoint: &str, delay: &str) -> Arc<SqliteParamStore> {
    let store = SqliteParamStore::open_in_memory().expect("store");
    store
        .set_many(&[
            (SYNC_KEY, "test-key".to_string()),
            (SYNC_ENDPOINT, endpoint.to_string()),
            (SYNC_DELAY, delay.to_string()),
        ])
        .unwrap();
    Arc::new(store)
}

/// Store with sync settings plus a radio on 20m, CW, 10 W.
pub fn radio_store(endpoint: &str, delay: &str) -> Arc<SqliteParamStore> {
    let store = sync_store(endpoint, delay);
    store.set(PARAM_POWER, "100").unwrap();
    store.set(PARAM_BAND, "5").unwrap();
    store.put_band_param("5", BAND_VFOA_FREQ, "14074000").unwrap();
    store.put_band_param("5", BAND_VFOA_MODE, "4").unwrap();
    store
}
