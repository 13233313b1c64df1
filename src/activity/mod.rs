//! Durable activity log and named timing metrics.
//!
//! Entries are appended as JSON lines to `activity-YYYY-MM-DD.log` under the
//! configured directory, rotating by size. Metrics land in
//! `metrics/metrics-YYYY-MM-DD.jsonl`. Nothing here returns an error to the
//! caller: write failures are reported through `tracing` instead.

mod entry;
mod rotation;

pub use entry::{ErrorInfo, LogCategory, LogEntry, LogLevel, MetricEntry};
pub use rotation::rotated_files;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

use crate::metrics;

/// `[activity]` configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    pub log_dir: PathBuf,
    /// Rotate the live log once it reaches this size.
    pub max_file_bytes: u64,
    pub max_rotated_files: usize,
    /// Also emit every entry through `tracing`.
    pub mirror_to_tracing: bool,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            log_dir: crate::config::default_state_dir().join("logs"),
            max_file_bytes: 10 * 1024 * 1024,
            max_rotated_files: 5,
            mirror_to_tracing: true,
        }
    }
}

impl ActivityConfig {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: dir.into(),
            ..Default::default()
        }
    }
}

struct InFlightMetric {
    start_time: DateTime<Utc>,
    started: Instant,
    metadata: Option<Value>,
}

pub struct ActivityRecorder {
    config: ActivityConfig,
    in_flight: Mutex<HashMap<String, InFlightMetric>>,
    // Serializes rotate-then-append so two writers never race a rename.
    write_lock: tokio::sync::Mutex<()>,
}

impl ActivityRecorder {
    pub fn new(config: ActivityConfig) -> Self {
        Self {
            config,
            in_flight: Mutex::new(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ActivityConfig {
        &self.config
    }

    /// Path of the live log file for `at`'s UTC day.
    pub fn log_path(&self, at: DateTime<Utc>) -> PathBuf {
        self.config.log_dir.join(rotation::live_file_name(at))
    }

    pub fn metrics_path(&self, at: DateTime<Utc>) -> PathBuf {
        self.config
            .log_dir
            .join("metrics")
            .join(format!("metrics-{}.jsonl", at.format("%Y-%m-%d")))
    }

    pub async fn log(
        &self,
        level: LogLevel,
        category: LogCategory,
        message: impl Into<String>,
        metadata: Option<Value>,
        error: Option<&anyhow::Error>,
    ) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            category,
            message: message.into(),
            metadata,
            error: error.map(ErrorInfo::from_error),
        };
        self.record(entry).await;
    }

    pub async fn debug(&self, category: LogCategory, message: impl Into<String>, metadata: Option<Value>) {
        self.log(LogLevel::Debug, category, message, metadata, None).await;
    }

    pub async fn info(&self, category: LogCategory, message: impl Into<String>, metadata: Option<Value>) {
        self.log(LogLevel::Info, category, message, metadata, None).await;
    }

    pub async fn warn(&self, category: LogCategory, message: impl Into<String>, metadata: Option<Value>) {
        self.log(LogLevel::Warn, category, message, metadata, None).await;
    }

    pub async fn error(
        &self,
        category: LogCategory,
        message: impl Into<String>,
        error: &anyhow::Error,
        metadata: Option<Value>,
    ) {
        self.log(LogLevel::Error, category, message, metadata, Some(error)).await;
    }

    /// Record the outcome of a single site action (one invite, one click).
    pub async fn track_action(
        &self,
        action: &str,
        success: bool,
        duration: Duration,
        metadata: Option<Value>,
    ) {
        let level = if success { LogLevel::Info } else { LogLevel::Error };
        let base = json!({
            "success": success,
            "durationMs": duration.as_secs_f64() * 1000.0,
        });
        let metadata = entry::merge_metadata(Some(base), metadata);
        self.log(level, LogCategory::Action, format!("Bot action: {action}"), metadata, None)
            .await;
    }

    /// Append an already-built entry.
    pub async fn record(&self, entry: LogEntry) {
        if self.config.mirror_to_tracing {
            entry.mirror();
        }

        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize activity entry");
                return;
            }
        };

        let _guard = self.write_lock.lock().await;
        let live = self.log_path(entry.timestamp);
        match rotation::rotate_if_needed(
            &live,
            self.config.max_file_bytes,
            self.config.max_rotated_files,
            entry.timestamp,
        )
        .await
        {
            Ok(Some(rotated)) => {
                tracing::debug!(path = %rotated.display(), "rotated activity log");
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, path = %live.display(), "error rotating activity log");
            }
        }

        if let Err(err) = append_line(&live, &line).await {
            tracing::error!(error = %err, path = %live.display(), "failed to write activity entry");
        }
    }

    /// Begin timing `name`. Starting a name that is already in flight replaces it.
    pub fn start_metric(&self, name: &str, metadata: Option<Value>) {
        let metric = InFlightMetric {
            start_time: Utc::now(),
            started: Instant::now(),
            metadata,
        };
        let replaced = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), metric);
        if replaced.is_some() {
            tracing::debug!(metric = name, "metric restarted before it was ended");
        }
    }

    /// Finish timing `name` and persist it.
    ///
    /// Returns `None` when no metric of that name is in flight.
    pub async fn end_metric(
        &self,
        name: &str,
        success: bool,
        metadata: Option<Value>,
    ) -> Option<MetricEntry> {
        let metric = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(name)?;

        let duration = metric.started.elapsed();
        let entry = MetricEntry {
            name: name.to_string(),
            start_time: metric.start_time,
            duration_ms: duration.as_secs_f64() * 1000.0,
            success,
            metadata: entry::merge_metadata(metric.metadata, metadata),
        };
        metrics::observe_operation(name, success, duration);

        let path = self.metrics_path(Utc::now());
        match serde_json::to_string(&entry) {
            Ok(line) => {
                if let Err(err) = append_line(&path, &line).await {
                    tracing::error!(error = %err, path = %path.display(), "failed to save metric");
                }
            }
            Err(err) => tracing::error!(error = %err, "failed to serialize metric"),
        }
        Some(entry)
    }

    /// Number of metrics started but not yet ended.
    pub fn in_flight_metrics(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await
}

/// Parse every entry of a JSON-lines activity or metrics file.
pub async fn read_entries<T: serde::de::DeserializeOwned>(path: &Path) -> std::io::Result<Vec<T>> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(dir: &Path) -> ActivityRecorder {
        ActivityRecorder::new(ActivityConfig {
            mirror_to_tracing: false,
            ..ActivityConfig::in_dir(dir)
        })
    }

    #[tokio::test]
    async fn log_appends_one_json_line_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(dir.path());
        recorder.info(LogCategory::Bot, "starting", None).await;
        let err = anyhow::anyhow!("boom");
        recorder
            .error(LogCategory::Session, "restore failed", &err, Some(json!({"step": "cookies"})))
            .await;

        let entries: Vec<LogEntry> = read_entries(&recorder.log_path(Utc::now())).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "starting");
        assert_eq!(entries[1].level, LogLevel::Error);
        assert_eq!(entries[1].error.as_ref().unwrap().message, "boom");
        assert_eq!(entries[1].metadata, Some(json!({"step": "cookies"})));
    }

    #[tokio::test]
    async fn end_metric_merges_metadata_and_clears_entry() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(dir.path());
        recorder.start_metric("login", Some(json!({"attempt": 1})));
        assert_eq!(recorder.in_flight_metrics(), 1);

        let metric = recorder
            .end_metric("login", true, Some(json!({"restored": false})))
            .await
            .unwrap();
        assert!(metric.success);
        assert_eq!(metric.metadata, Some(json!({"attempt": 1, "restored": false})));
        assert_eq!(recorder.in_flight_metrics(), 0);

        let saved: Vec<MetricEntry> = read_entries(&recorder.metrics_path(Utc::now())).await.unwrap();
        assert_eq!(saved, vec![metric]);
    }

    #[tokio::test]
    async fn ending_unknown_metric_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(dir.path());
        assert!(recorder.end_metric("never_started", false, None).await.is_none());
        assert!(!recorder.metrics_path(Utc::now()).exists());
    }

    #[tokio::test]
    async fn unwritable_directory_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let recorder = recorder(&blocker);
        recorder.warn(LogCategory::Network, "dropped", None).await;
        recorder.start_metric("m", None);
        assert!(recorder.end_metric("m", false, None).await.is_some());
    }
}
