use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::sync::Arc;

use outreach::activity::ActivityRecorder;
use outreach::args::CommonArgs;
use outreach::config::Config;
use outreach::session::{FileSessionStore, SessionKey, SessionManager};

// ── CLI ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "outreach",
    version,
    about = "Rate-limited, session-aware creator outreach automation"
)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in (or restore the saved session) and run the outreach campaign
    Run {
        /// Verification code to use if the site asks for one
        #[arg(long, value_name = "CODE", env = "OUTREACH_VERIFICATION_CODE")]
        verification_code: Option<String>,
        /// Print Prometheus metrics to stderr when the run ends
        #[arg(long)]
        metrics: bool,
    },
    /// Log in and save the session, nothing else
    Login {
        #[arg(long, value_name = "CODE", env = "OUTREACH_VERIFICATION_CODE")]
        verification_code: Option<String>,
    },
    /// Inspect or clear the saved session
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Print a fresh base64 session encryption key
    Keygen,
}

#[derive(Debug, Subcommand)]
enum SessionAction {
    /// Show whether a saved session exists and is still valid
    Status,
    /// Delete the saved session
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    outreach::logging::init(cli.common.log_config());
    let config = Config::load(cli.common.config_path())?;

    match cli.command {
        Command::Run {
            verification_code,
            metrics,
        } => {
            let succeeded = run(config, verification_code, false).await?;
            if metrics {
                eprint!("{}", outreach::metrics::render());
            }
            exit_on_failure(succeeded)
        }
        Command::Login { verification_code } => {
            exit_on_failure(run(config, verification_code, true).await?)
        }
        Command::Session { action } => session_command(config, action).await,
        Command::Keygen => {
            println!("{}", SessionKey::generate().to_base64());
            Ok(())
        }
    }
}

fn exit_on_failure(succeeded: bool) -> Result<()> {
    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

fn session_manager(config: &Config) -> Result<SessionManager> {
    let recorder = Arc::new(ActivityRecorder::new(config.activity.clone()));
    Ok(SessionManager::new(
        config.session.policy(),
        config.session.key()?,
        Arc::new(FileSessionStore::new(config.session.store_path.clone())),
        recorder,
    ))
}

async fn session_command(config: Config, action: SessionAction) -> Result<()> {
    let manager = session_manager(&config)?;
    match action {
        SessionAction::Status => {
            let state = manager.stored_state().await;
            let record = manager.stored_record().await;
            let status = json!({
                "state": state,
                "path": config.session.store_path,
                "capturedAt": record.as_ref().map(|r| r.captured_at),
                "expiresAt": record.as_ref().map(|r| r.expires_at),
                "cookies": record.as_ref().map(|r| r.cookies.len()),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        SessionAction::Clear => {
            manager.invalidate().await?;
            println!("Session cleared");
        }
    }
    Ok(())
}

#[cfg(feature = "browser")]
async fn run(config: Config, verification_code: Option<String>, login_only: bool) -> Result<bool> {
    use anyhow::Context as _;
    use outreach::browser::BrowserSession;
    use outreach::context::Viewport;
    use outreach::{Orchestrator, OrchestratorConfig, RunStatus};

    let settings = OrchestratorConfig::from_config(&config)?;
    let key = config.session.key()?;
    let recorder = Arc::new(ActivityRecorder::new(config.activity.clone()));
    let browser = BrowserSession::launch(config.site.headless, Viewport::default()).await?;

    let orchestrator = Orchestrator::new(
        settings,
        Arc::new(browser.context()),
        Arc::new(browser.site(config.site.base_url.clone())),
        Arc::new(FileSessionStore::new(config.session.store_path.clone())),
        key,
        recorder,
    );
    if let Some(code) = verification_code {
        orchestrator.code_slot().supply(code);
    }

    // Ctrl+C requests a cooperative stop; the current step finishes first.
    let stop = orchestrator.stop_token();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("interrupt received; stopping after the current step");
        stop.cancel();
    });

    let failed = if login_only {
        let source = orchestrator.establish_session().await;
        let failed = source.is_err();
        let output = match source {
            Ok(source) => json!({ "session": source }),
            Err(err) => json!({ "error": err.to_string() }),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        failed
    } else {
        let report = orchestrator.run().await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        report.status == RunStatus::Failed
    };

    browser.close().await.context("Failed to shut down browser")?;
    Ok(!failed)
}

#[cfg(not(feature = "browser"))]
async fn run(_config: Config, _verification_code: Option<String>, _login_only: bool) -> Result<bool> {
    anyhow::bail!("this build has no browser support; rebuild with `--features browser`")
}
