use chrono::Utc;
use serde_json::json;

use outreach::activity::{
    ActivityConfig, ActivityRecorder, LogCategory, LogEntry, MetricEntry, read_entries,
    rotated_files,
};

fn recorder(dir: &std::path::Path, max_file_bytes: u64) -> ActivityRecorder {
    ActivityRecorder::new(ActivityConfig {
        log_dir: dir.to_path_buf(),
        max_file_bytes,
        max_rotated_files: 5,
        mirror_to_tracing: false,
    })
}

#[tokio::test]
async fn full_log_rotates_and_drops_the_oldest_file() {
    let dir = tempfile::tempdir().unwrap();
    let old = [
        "activity-2026-01-01.000000000.log",
        "activity-2026-01-02.000000000.log",
        "activity-2026-01-03.000000000.log",
        "activity-2026-01-04.000000000.log",
        "activity-2026-01-05.000000000.log",
    ];
    for name in old {
        std::fs::write(dir.path().join(name), b"{}\n").unwrap();
    }
    let recorder = recorder(dir.path(), 256);
    let live = recorder.log_path(Utc::now());
    std::fs::write(&live, vec![b'x'; 300]).unwrap();

    recorder
        .info(LogCategory::Bot, "after rotation", None)
        .await;

    let rotated = rotated_files(dir.path()).await.unwrap();
    assert_eq!(rotated.len(), 5);
    assert!(!dir.path().join(old[0]).exists());
    for name in &old[1..] {
        assert!(dir.path().join(name).exists(), "{name} should survive");
    }
    // The previous live file is now the newest rotated one.
    let newest = rotated.last().unwrap();
    assert_eq!(std::fs::metadata(newest).unwrap().len(), 300);

    let entries: Vec<LogEntry> = read_entries(&live).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, "after rotation");
}

#[tokio::test]
async fn small_log_keeps_appending() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = recorder(dir.path(), 1024 * 1024);

    for i in 0..3 {
        recorder
            .info(LogCategory::Queue, format!("entry {i}"), Some(json!({ "i": i })))
            .await;
    }

    assert!(rotated_files(dir.path()).await.unwrap().is_empty());
    let entries: Vec<LogEntry> = read_entries(&recorder.log_path(Utc::now())).await.unwrap();
    let messages: Vec<&str> = entries.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, ["entry 0", "entry 1", "entry 2"]);
}

#[tokio::test]
async fn metrics_are_written_to_their_own_file() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = recorder(dir.path(), 1024 * 1024);

    recorder.start_metric("invite_creators", Some(json!({ "batch": 1 })));
    assert_eq!(recorder.in_flight_metrics(), 1);
    let ended = recorder
        .end_metric("invite_creators", true, Some(json!({ "invited": 4 })))
        .await
        .unwrap();
    assert_eq!(recorder.in_flight_metrics(), 0);
    assert!(recorder.end_metric("invite_creators", true, None).await.is_none());

    let saved: Vec<MetricEntry> = read_entries(&recorder.metrics_path(Utc::now()))
        .await
        .unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].name, ended.name);
    assert_eq!(saved[0].start_time, ended.start_time);
    assert!(saved[0].success);
    let metadata = saved[0].metadata.as_ref().unwrap();
    assert_eq!(metadata["batch"], 1);
    assert_eq!(metadata["invited"], 4);
}
