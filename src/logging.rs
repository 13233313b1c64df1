//! Process diagnostics on stderr via `tracing`.
//!
//! This is the console side of logging. Durable per-run history lives in the
//! activity recorder, which mirrors its entries here and falls back to this
//! channel when its own files cannot be written.
//!
//! `OUTREACH_LOG` (or `RUST_LOG`) sets the filter and `OUTREACH_LOG_FORMAT`
//! picks `pretty`, `compact` or `json`.

use std::io::IsTerminal;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

const DEFAULT_FILTER: &str = "outreach=info,warn";

// The CDP handler reports every protocol message it cannot decode at error
// level; none of them affect a run.
const QUIET_DIRECTIVES: &[&str] = &["chromiumoxide::conn=off", "chromiumoxide::handler=off"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    /// One JSON object per line, for unattended runs.
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            format: LogFormat::default(),
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self {
            filter: std::env::var("OUTREACH_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
            format: std::env::var("OUTREACH_LOG_FORMAT")
                .map(|s| LogFormat::parse(&s))
                .unwrap_or_default(),
        }
    }

    /// `--verbose`: everything this crate emits, keeping the env format.
    pub fn debug() -> Self {
        Self {
            filter: "outreach=debug,info".to_string(),
            ..Self::from_env()
        }
    }

    /// The effective filter: the configured directive (or the default when it
    /// does not parse) with the browser handler noise switched off.
    pub fn env_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::try_new(&self.filter).unwrap_or_else(|err| {
            eprintln!("ignoring invalid log filter {:?}: {err}", self.filter);
            EnvFilter::new(DEFAULT_FILTER)
        });
        for directive in QUIET_DIRECTIVES {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
        filter
    }
}

/// Install the global subscriber. A second call leaves the first in place.
pub fn init(config: LogConfig) {
    let ansi = std::io::stderr().is_terminal();
    let layer = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(ansi)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_ansi(ansi)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    if tracing_subscriber::registry()
        .with(layer)
        .with(config.env_filter())
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
}
