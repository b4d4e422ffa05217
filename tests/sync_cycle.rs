//! End-to-end sync cycles against a fake Wavelog endpoint.
mod common;

use std::io::Write;
use std::time::Duration;

use common::{radio_store, refused_url, spawn_wavelog, sync_store};
use x6100_webserver::store::{
    ParamStore, PARAM_POWER, SYNC_DELAY, SYNC_LOG_OFFSET, SYNC_STATION_PROFILE_ID, SYNC_TIMESTAMP,
};
use x6100_webserver::sync::service::TIMESTAMP_FORMAT;
use x6100_webserver::sync::{
    SaveSyncRequest, SyncClient, SyncError, SyncOverride, SyncService, SyncSource, SyncTrigger,
};

fn nodelay() -> SyncTrigger {
    SyncTrigger::Manual(SyncOverride {
        nodelay: true,
        ..Default::default()
    })
}

fn append(path: &std::path::Path, text: &str) {
    std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .unwrap()
        .write_all(text.as_bytes())
        .unwrap();
}

#[tokio::test]
async fn disabled_delay_makes_no_request() {
    let wavelog = spawn_wavelog().await;
    let store = radio_store(&wavelog.url, "0");
    let service = SyncService::start(store.clone(), SyncSource::radio_state("Xiegu X6100"), SyncClient::new(5));

    let result = service.run(SyncTrigger::Auto).await;
    assert!(matches!(result, Err(SyncError::Disabled)), "got {result:?}");

    assert_eq!(wavelog.count(), 0);
    assert_eq!(store.get(SYNC_TIMESTAMP).unwrap(), None);
    let timer = service.scheduler().snapshot().await.unwrap();
    assert!(!timer.armed);
}

#[tokio::test]
async fn auto_cycle_dedups_unchanged_radio_state() {
    let wavelog = spawn_wavelog().await;
    let store = radio_store(&wavelog.url, "60");
    let service = SyncService::start(store.clone(), SyncSource::radio_state("Xiegu X6100"), SyncClient::new(5));

    let report = service.run(SyncTrigger::Auto).await.expect("first cycle sends");
    assert_eq!(report.response, r#"{"status":"success"}"#);
    let second = service.run(SyncTrigger::Auto).await;
    assert!(matches!(second, Err(SyncError::NoNewData(_))), "got {second:?}");

    let received = wavelog.received();
    assert_eq!(received.len(), 1);
    assert_eq!(
        received[0].body,
        serde_json::json!({
            "key": "test-key",
            "radio": "Xiegu X6100",
            "power": 10.0,
            "frequency": "14074000",
            "mode": "CW",
        })
    );
    assert_eq!(received[0].accept.as_deref(), Some("application/json"));

    // Each cycle re-armed; the second replaced the first.
    let timer = service.scheduler().snapshot().await.unwrap();
    assert!(timer.armed);
    assert_eq!(timer.armed_total, 2);
    assert_eq!(timer.cancelled_total, 1);
    assert!(timer.fires_in.unwrap() <= Duration::from_secs(60));

    let ts = store.get(SYNC_TIMESTAMP).unwrap().expect("timestamp written");
    assert!(chrono::NaiveDateTime::parse_from_str(&ts, TIMESTAMP_FORMAT).is_ok(), "bad timestamp {ts}");
}

#[tokio::test]
async fn nodelay_manual_bypasses_dedup_and_timer() {
    let wavelog = spawn_wavelog().await;
    let store = radio_store(&wavelog.url, "60");
    let service = SyncService::start(store.clone(), SyncSource::radio_state("Xiegu X6100"), SyncClient::new(5));

    service.run(nodelay()).await.expect("first manual send");
    service.run(nodelay()).await.expect("second manual send");

    assert_eq!(wavelog.count(), 2);
    let timer = service.scheduler().snapshot().await.unwrap();
    assert!(!timer.armed);
    assert_eq!(timer.armed_total, 0);
}

#[tokio::test]
async fn log_tail_uploads_new_bytes_and_advances_offset() {
    let wavelog = spawn_wavelog().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wsjtx_log.adi");
    std::fs::write(&path, "a".repeat(100)).unwrap();

    let store = sync_store(&wavelog.url, "60");
    store.set(SYNC_STATION_PROFILE_ID, "2").unwrap();
    store.set(SYNC_LOG_OFFSET, "100").unwrap();
    let service = SyncService::start(store.clone(), SyncSource::log_tail(&path), SyncClient::new(5));

    let record = "<call:5>DL1AB <gridsquare:4>JO62 <mode:3>FT8 <band:3>20m <eor>";
    let tail = format!("{record}{}", " ".repeat(150 - record.len() - 1)) + "\n";
    assert_eq!(tail.len(), 150);
    append(&path, &tail);

    let report = service.run(SyncTrigger::Auto).await.expect("upload");
    assert!(report.summary.contains("[100..250)"), "{}", report.summary);
    assert_eq!(store.get(SYNC_LOG_OFFSET).unwrap().as_deref(), Some("250"));

    let received = wavelog.received();
    assert_eq!(received.len(), 1);
    assert_eq!(
        received[0].body,
        serde_json::json!({
            "key": "test-key",
            "station_profile_id": "2",
            "type": "adif",
            "string": record,
        })
    );

    // Nothing new: no second upload, offset unchanged.
    let again = service.run(SyncTrigger::Auto).await;
    assert!(matches!(again, Err(SyncError::NoNewData(_))), "got {again:?}");
    assert_eq!(wavelog.count(), 1);
    assert_eq!(store.get(SYNC_LOG_OFFSET).unwrap().as_deref(), Some("250"));
}

#[tokio::test]
async fn missing_log_file_is_a_skip_and_still_rearms() {
    let wavelog = spawn_wavelog().await;
    let dir = tempfile::tempdir().unwrap();
    let store = sync_store(&wavelog.url, "30");
    store.set(SYNC_STATION_PROFILE_ID, "2").unwrap();
    let service = SyncService::start(
        store.clone(),
        SyncSource::log_tail(dir.path().join("missing.adi")),
        SyncClient::new(5),
    );

    let result = service.run(SyncTrigger::Auto).await;
    assert!(matches!(result, Err(SyncError::SourceUnavailable(_))), "got {result:?}");
    assert_eq!(wavelog.count(), 0);
    assert!(service.scheduler().snapshot().await.unwrap().armed);
}

#[tokio::test]
async fn unreachable_endpoint_keeps_progress_and_rearms() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.adi");
    std::fs::write(&path, "<call:4>W1AW<eor>\n<call:4>K1JT<eor>\n").unwrap();

    let store = sync_store(&refused_url(), "45");
    store.set(SYNC_STATION_PROFILE_ID, "1").unwrap();
    store.set(SYNC_LOG_OFFSET, "18").unwrap();
    store.set(SYNC_TIMESTAMP, "2024/01/01 00:00:00").unwrap();
    let service = SyncService::start(store.clone(), SyncSource::log_tail(&path), SyncClient::new(2));

    let result = service.run(SyncTrigger::Auto).await;
    assert!(matches!(result, Err(SyncError::Transport(_))), "got {result:?}");

    assert_eq!(store.get(SYNC_LOG_OFFSET).unwrap().as_deref(), Some("18"));
    assert_eq!(
        store.get(SYNC_TIMESTAMP).unwrap().as_deref(),
        Some("2024/01/01 00:00:00")
    );
    let timer = service.scheduler().snapshot().await.unwrap();
    assert!(timer.armed);
    assert!(timer.fires_in.unwrap() > Duration::from_secs(40));
}

#[tokio::test]
async fn rejected_upload_is_retried_next_cycle() {
    let wavelog = spawn_wavelog().await;
    wavelog.respond_with(500);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.adi");
    std::fs::write(&path, "<call:4>W1AW<eor>").unwrap();

    let store = sync_store(&wavelog.url, "60");
    store.set(SYNC_STATION_PROFILE_ID, "1").unwrap();
    let service = SyncService::start(store.clone(), SyncSource::log_tail(&path), SyncClient::new(5));

    let result = service.run(SyncTrigger::Auto).await;
    assert!(
        matches!(result, Err(SyncError::RemoteRejected { status: 500, .. })),
        "got {result:?}"
    );
    assert_eq!(store.get(SYNC_LOG_OFFSET).unwrap(), None);

    wavelog.respond_with(200);
    service.run(SyncTrigger::Auto).await.expect("retry succeeds");
    assert_eq!(store.get(SYNC_LOG_OFFSET).unwrap().as_deref(), Some("17"));

    let received = wavelog.received();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].body, received[1].body);
}

#[tokio::test]
async fn radio_state_retries_after_failed_send() {
    let wavelog = spawn_wavelog().await;
    wavelog.respond_with(503);
    let store = radio_store(&wavelog.url, "60");
    let service = SyncService::start(store.clone(), SyncSource::radio_state("Xiegu X6100"), SyncClient::new(5));

    assert!(service.run(SyncTrigger::Auto).await.is_err());
    wavelog.respond_with(200);
    // Same state again: not deduplicated because the first send never landed.
    service.run(SyncTrigger::Auto).await.expect("resend");
    assert_eq!(wavelog.count(), 2);
}

#[tokio::test]
async fn timer_fire_runs_next_auto_cycle() {
    let wavelog = spawn_wavelog().await;
    let store = radio_store(&wavelog.url, "1");
    let service = SyncService::start(store.clone(), SyncSource::radio_state("Xiegu X6100"), SyncClient::new(5));

    service.run(SyncTrigger::Auto).await.expect("first send");
    store.set(PARAM_POWER, "50").unwrap();

    assert!(wavelog.wait_for(2, Duration::from_secs(4)).await, "timer never fired");
    let received = wavelog.received();
    assert_eq!(received[1].body["power"], serde_json::json!(5.0));

    // The fired cycle armed the next one.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let timer = service.scheduler().snapshot().await.unwrap();
    assert!(timer.fired_total >= 1);
    assert!(timer.armed);
}

#[tokio::test]
async fn timer_fire_rereads_delay() {
    let wavelog = spawn_wavelog().await;
    let store = radio_store(&wavelog.url, "1");
    let service = SyncService::start(store.clone(), SyncSource::radio_state("Xiegu X6100"), SyncClient::new(5));

    service.run(SyncTrigger::Auto).await.expect("first send");
    assert!(service.scheduler().snapshot().await.unwrap().armed);

    // Disabled while the timer is pending: the fire sees delay 0 and stops.
    store.set(SYNC_DELAY, "0").unwrap();
    store.set(PARAM_POWER, "50").unwrap();
    tokio::time::sleep(Duration::from_millis(1800)).await;

    let timer = service.scheduler().snapshot().await.unwrap();
    assert_eq!(timer.fired_total, 1);
    assert!(!timer.armed);
    assert_eq!(wavelog.count(), 1);
}

#[tokio::test]
async fn save_waits_for_in_flight_cycle() {
    let wavelog = spawn_wavelog().await;
    wavelog.respond_after(Duration::from_millis(400));
    let store = radio_store(&wavelog.url, "600");
    let service = SyncService::start(store.clone(), SyncSource::radio_state("Xiegu X6100"), SyncClient::new(5));

    let cycle = {
        let service = service.clone();
        tokio::spawn(async move { service.run(SyncTrigger::Auto).await })
    };
    assert!(wavelog.wait_for(1, Duration::from_secs(2)).await);

    let request = SaveSyncRequest {
        key: "test-key".into(),
        endpoint: wavelog.url.clone(),
        delay: 5,
        station_profile_id: None,
    };
    service.save(&request).await.expect("save");

    // The cycle committed and re-armed before the save got in.
    assert!(store.get(SYNC_TIMESTAMP).unwrap().is_some());
    let timer = service.scheduler().snapshot().await.unwrap();
    assert!(timer.armed);
    assert_eq!(timer.armed_total, 2);
    assert!(timer.fires_in.unwrap() <= Duration::from_secs(5));

    cycle.await.unwrap().expect("cycle sent");
    let timer = service.scheduler().snapshot().await.unwrap();
    assert!(timer.fires_in.unwrap() <= Duration::from_secs(5));
}

#[tokio::test]
async fn large_log_catch_up_is_sent_whole() {
    let wavelog = spawn_wavelog().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backlog.adi");
    let record = "<call:5>DL1AB <mode:3>FT8 <band:3>20m <eor>\n";
    let backlog = record.repeat(20_000);
    std::fs::write(&path, &backlog).unwrap();

    let store = sync_store(&wavelog.url, "60");
    store.set(SYNC_STATION_PROFILE_ID, "2").unwrap();
    let service = SyncService::start(store.clone(), SyncSource::log_tail(&path), SyncClient::new(10));

    service.run(SyncTrigger::Auto).await.expect("upload");
    assert_eq!(
        store.get(SYNC_LOG_OFFSET).unwrap(),
        Some(backlog.len().to_string())
    );
    let received = wavelog.received();
    assert_eq!(received[0].body["string"], backlog.trim());
}
