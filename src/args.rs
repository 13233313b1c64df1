use clap::{ArgAction, Args};
use std::path::PathBuf;

use crate::logging::{LogConfig, LogFormat};

// Global flags shared across every subcommand.
//
//   -c / --config   Path to a config.toml file
//   -v / --verbose  Debug-level diagnostics
//   --log-format    pretty | compact | json
#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Path to a config.toml file (default: ~/.outreach/config.toml)
    #[arg(
        short = 'c',
        long,
        value_name = "PATH",
        env = "OUTREACH_CONFIG",
        global = true
    )]
    pub config: Option<PathBuf>,

    /// Verbose diagnostics
    #[arg(short, long, action = ArgAction::SetTrue, global = true)]
    pub verbose: bool,

    /// Diagnostic output format
    #[arg(long, value_name = "FORMAT", env = "OUTREACH_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,
}

impl CommonArgs {
    pub fn config_path(&self) -> Option<PathBuf> {
        self.config.clone()
    }

    /// Logging settings: environment first, then command-line overrides.
    pub fn log_config(&self) -> LogConfig {
        let mut config = if self.verbose {
            LogConfig::debug()
        } else {
            LogConfig::from_env()
        };
        if let Some(format) = &self.log_format {
            config.format = LogFormat::parse(format);
        }
        config
    }
}
