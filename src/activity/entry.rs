use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Subsystem an activity entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Bot,
    Session,
    Network,
    Captcha,
    Performance,
    Action,
    Queue,
}

impl LogCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bot => "bot",
            Self::Session => "session",
            Self::Network => "network",
            Self::Captcha => "captcha",
            Self::Performance => "performance",
            Self::Action => "action",
            Self::Queue => "queue",
        }
    }
}

impl std::fmt::Display for LogCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialized form of an error attached to a log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    /// Causes, outermost first, excluding `message` itself.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<String>,
}

impl ErrorInfo {
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self {
            message: err.to_string(),
            chain: err.chain().skip(1).map(|cause| cause.to_string()).collect(),
        }
    }
}

/// One line of the day-partitioned activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub category: LogCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl LogEntry {
    /// Forward the entry to the process `tracing` subscriber.
    pub(super) fn mirror(&self) {
        let category = self.category.as_str();
        let error = self.error.as_ref().map(|e| e.message.as_str());
        match self.level {
            LogLevel::Debug => {
                tracing::debug!(category, metadata = ?self.metadata, error, "{}", self.message)
            }
            LogLevel::Info => {
                tracing::info!(category, metadata = ?self.metadata, error, "{}", self.message)
            }
            LogLevel::Warn => {
                tracing::warn!(category, metadata = ?self.metadata, error, "{}", self.message)
            }
            LogLevel::Error => {
                tracing::error!(category, metadata = ?self.metadata, error, "{}", self.message)
            }
        }
    }
}

/// A finalized timing measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricEntry {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub duration_ms: f64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Shallow-merge `extra` into `base`; object keys in `extra` win.
pub(super) fn merge_metadata(base: Option<Value>, extra: Option<Value>) -> Option<Value> {
    match (base, extra) {
        (Some(Value::Object(mut base)), Some(Value::Object(extra))) => {
            base.extend(extra);
            Some(Value::Object(base))
        }
        (base, None) => base,
        (_, extra) => extra,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entry_serializes_as_lowercase_json() {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level: LogLevel::Warn,
            category: LogCategory::Captcha,
            message: "slider still present".into(),
            metadata: None,
            error: None,
        };
        let line = serde_json::to_value(&entry).unwrap();
        assert_eq!(line["level"], "warn");
        assert_eq!(line["category"], "captcha");
        assert!(line.get("metadata").is_none());
    }

    #[test]
    fn error_info_keeps_cause_chain() {
        let err = anyhow::anyhow!("socket closed").context("navigation failed");
        let info = ErrorInfo::from_error(&err);
        assert_eq!(info.message, "navigation failed");
        assert_eq!(info.chain, vec!["socket closed".to_string()]);
    }

    #[test]
    fn metadata_merge_prefers_later_keys() {
        let merged = merge_metadata(
            Some(json!({"attempt": 1, "phase": "login"})),
            Some(json!({"attempt": 2})),
        );
        assert_eq!(merged, Some(json!({"attempt": 2, "phase": "login"})));
        assert_eq!(merge_metadata(None, Some(json!({"a": 1}))), Some(json!({"a": 1})));
        assert_eq!(merge_metadata(Some(json!({"a": 1})), None), Some(json!({"a": 1})));
    }
}
