//! End-to-end runs of the orchestrator against in-memory collaborators.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, OnceLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use outreach::activity::{ActivityConfig, ActivityRecorder, LogCategory, LogEntry, LogLevel, read_entries};
use outreach::context::{Cookie, MemoryContext};
use outreach::orchestrator::{
    Creator, Credentials, FilterOptions, Phase, RunPlan, SessionSource, SiteActions,
};
use outreach::queue::{PacingPolicy, TaskQueue};
use outreach::retry::{RetryController, RetryPolicy};
use outreach::secret::SecretString;
use outreach::session::{MemorySessionStore, SessionKey, SessionManager, SessionPolicy};
use outreach::verification::VerificationConfig;
use outreach::{AutomationError, Orchestrator, OrchestratorConfig, RunStatus};

/// Site double: each step fails a scripted number of times before succeeding.
#[derive(Default)]
struct ScriptedSite {
    login_failures: AtomicUsize,
    filter_failures: AtomicUsize,
    creators: Vec<Creator>,
    failing_invites: Vec<String>,
    /// Cancel `stop` once this many invitations have succeeded.
    stop_after: Option<usize>,
    stop: OnceLock<CancellationToken>,
    logins: AtomicUsize,
    filter_calls: AtomicUsize,
    invited: Mutex<Vec<String>>,
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl SiteActions for ScriptedSite {
    async fn login(&self, _credentials: &Credentials) -> anyhow::Result<()> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.login_failures) {
            anyhow::bail!("login form did not submit");
        }
        Ok(())
    }

    async fn navigate_to_affiliate_center(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn apply_filters(&self, _filters: &FilterOptions) -> anyhow::Result<()> {
        self.filter_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.filter_failures) {
            anyhow::bail!("filter modal never opened");
        }
        Ok(())
    }

    async fn extract_creators(&self) -> anyhow::Result<Vec<Creator>> {
        Ok(self.creators.clone())
    }

    async fn invite_creator(&self, creator: &Creator) -> anyhow::Result<()> {
        if self.failing_invites.contains(&creator.username) {
            anyhow::bail!("no confirmation for {}", creator.username);
        }
        let count = {
            let mut invited = self.invited.lock().unwrap();
            invited.push(creator.username.clone());
            invited.len()
        };
        if self.stop_after == Some(count) {
            if let Some(token) = self.stop.get() {
                token.cancel();
            }
        }
        Ok(())
    }
}

fn creators(n: usize) -> Vec<Creator> {
    (0..n)
        .map(|i| Creator::new(format!("creator{i}"), 10_000 + i as u64))
        .collect()
}

fn recorder(dir: &std::path::Path) -> Arc<ActivityRecorder> {
    Arc::new(ActivityRecorder::new(ActivityConfig {
        mirror_to_tracing: false,
        ..ActivityConfig::in_dir(dir)
    }))
}

fn config(invitation_limit: usize) -> OrchestratorConfig {
    OrchestratorConfig {
        pacing: PacingPolicy::immediate(),
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        session: SessionPolicy::default(),
        verification: VerificationConfig::default(),
        plan: RunPlan {
            credentials: Credentials {
                email: "seller@example.com".to_string(),
                password: SecretString::from("hunter2"),
            },
            filters: FilterOptions {
                min_followers: 1_000,
                max_followers: 100_000,
                categories: vec!["beauty".to_string()],
            },
            invitation_limit,
            invite_spacing: Duration::ZERO,
        },
    }
}

fn key() -> SessionKey {
    SessionKey::from_bytes([7; 32])
}

struct Harness {
    orchestrator: Orchestrator,
    context: Arc<MemoryContext>,
    store: Arc<MemorySessionStore>,
    recorder: Arc<ActivityRecorder>,
    _dir: tempfile::TempDir,
}

fn harness(site: Arc<ScriptedSite>, invitation_limit: usize) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let context = Arc::new(MemoryContext::new());
    let store = Arc::new(MemorySessionStore::new());
    let recorder = recorder(dir.path());
    let orchestrator = Orchestrator::new(
        config(invitation_limit),
        context.clone(),
        site,
        store.clone(),
        key(),
        recorder.clone(),
    );
    Harness {
        orchestrator,
        context,
        store,
        recorder,
        _dir: dir,
    }
}

#[tokio::test]
async fn fresh_login_runs_every_phase_and_saves_the_session() {
    let site = Arc::new(ScriptedSite {
        login_failures: AtomicUsize::new(1),
        creators: creators(4),
        failing_invites: vec!["creator2".to_string()],
        ..Default::default()
    });
    let h = harness(site.clone(), 60);
    h.context
        .push_cookie(Cookie::new("sid", "abc", ".seller.example.com"));

    let report = h.orchestrator.run().await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.session, Some(SessionSource::FreshLogin));
    assert_eq!(report.creators_found, 4);
    assert_eq!(report.invited, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 0);
    assert!(report.fatal.is_none());
    assert_eq!(site.logins.load(Ordering::SeqCst), 2);

    let saved = h.orchestrator.sessions().stored_record().await.unwrap();
    assert_eq!(saved.cookies.len(), 1);
    assert_eq!(saved.cookies[0].name, "sid");
}

#[tokio::test]
async fn failed_login_attempt_is_logged_once() {
    let site = Arc::new(ScriptedSite {
        login_failures: AtomicUsize::new(1),
        ..Default::default()
    });
    let h = harness(site.clone(), 60);

    let report = h.orchestrator.run().await;
    assert_eq!(report.status, RunStatus::Completed);

    let entries: Vec<LogEntry> = read_entries(&h.recorder.log_path(chrono::Utc::now()))
        .await
        .unwrap();
    let warnings: Vec<&str> = entries
        .iter()
        .filter(|e| e.level == LogLevel::Warn)
        .map(|e| e.message.as_str())
        .collect();
    assert_eq!(warnings, ["Login failed, attempt 1/2"]);
}

#[tokio::test]
async fn valid_saved_session_skips_login() {
    let site = Arc::new(ScriptedSite {
        creators: creators(2),
        ..Default::default()
    });
    let h = harness(site.clone(), 60);

    // Save a session captured from another context with the same key.
    let dir = tempfile::tempdir().unwrap();
    let previous = MemoryContext::new();
    previous.push_cookie(Cookie::new("sid", "kept", ".seller.example.com"));
    previous.put_local("token", "t-1");
    let manager = SessionManager::new(
        SessionPolicy::default(),
        key(),
        h.store.clone(),
        recorder(dir.path()),
    );
    let record = manager.capture(&previous).await.unwrap();
    manager.persist(&record).await.unwrap();

    let report = h.orchestrator.run().await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.session, Some(SessionSource::Restored));
    assert_eq!(report.invited, 2);
    assert_eq!(site.logins.load(Ordering::SeqCst), 0);
    assert_eq!(h.context.snapshot_cookies()[0].value, "kept");
    assert_eq!(h.context.snapshot_local().get("token").map(String::as_str), Some("t-1"));
}

#[tokio::test]
async fn failed_restore_falls_back_to_login() {
    let site = Arc::new(ScriptedSite::default());
    let h = harness(site.clone(), 60);

    let dir = tempfile::tempdir().unwrap();
    let manager = SessionManager::new(
        SessionPolicy::default(),
        key(),
        h.store.clone(),
        recorder(dir.path()),
    );
    let record = manager.capture(&MemoryContext::new()).await.unwrap();
    manager.persist(&record).await.unwrap();
    h.context.fail_on("set_local_storage");

    let source = h.orchestrator.establish_session().await.unwrap();

    assert_eq!(source, SessionSource::FreshLogin);
    assert_eq!(site.logins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhausted_phase_ends_the_run_with_its_error() {
    let site = Arc::new(ScriptedSite {
        filter_failures: AtomicUsize::new(usize::MAX),
        creators: creators(3),
        ..Default::default()
    });
    let h = harness(site.clone(), 60);

    let report = h.orchestrator.run().await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.session, Some(SessionSource::FreshLogin));
    assert_eq!(report.creators_found, 0);
    assert_eq!(report.invited, 0);
    assert_eq!(site.filter_calls.load(Ordering::SeqCst), 2);
    let fatal = report.fatal.unwrap();
    assert_eq!(fatal.phase, Phase::Filter);
    assert!(
        fatal.message.starts_with("Apply filters failed after 2 attempts"),
        "{}",
        fatal.message
    );
}

#[tokio::test]
async fn stop_during_invitations_skips_the_rest() {
    let site = Arc::new(ScriptedSite {
        creators: creators(10),
        stop_after: Some(3),
        ..Default::default()
    });
    let h = harness(site.clone(), 5);
    site.stop.set(h.orchestrator.stop_token()).unwrap();

    let report = h.orchestrator.run().await;

    assert_eq!(report.status, RunStatus::Stopped);
    assert_eq!(report.creators_found, 10);
    assert_eq!(report.invited, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.skipped, 7);
    assert!(report.fatal.is_none());
    assert_eq!(site.invited.lock().unwrap().len(), 3);
    assert!(h.orchestrator.status().stop_requested);
}

#[tokio::test]
async fn limit_counts_successful_invitations() {
    let site = Arc::new(ScriptedSite {
        failing_invites: vec!["creator0".to_string(), "creator1".to_string()],
        ..Default::default()
    });
    let h = harness(site.clone(), 3);

    let summary = h.orchestrator.invite_creators(&creators(10), 3).await;

    assert_eq!(summary.invited, 3);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.skipped, 5);
    assert!(!summary.stopped);
}

#[tokio::test]
async fn stop_before_run_reports_stopped() {
    let site = Arc::new(ScriptedSite::default());
    let h = harness(site.clone(), 60);
    h.orchestrator.stop();

    let report = h.orchestrator.run().await;

    assert_eq!(report.status, RunStatus::Stopped);
    assert!(report.fatal.is_none());
    assert_eq!(site.logins.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn retries_log_one_warning_per_failed_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = recorder(dir.path());
    let queue = TaskQueue::new(PacingPolicy::immediate());
    let controller = RetryController::new(
        queue,
        recorder.clone(),
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        },
    );

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let value = controller
        .run_with_retry(
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        anyhow::bail!("attempt {n} failed");
                    }
                    Ok(n)
                }
            },
            "Navigate to affiliate center",
            3,
        )
        .await
        .unwrap();

    assert_eq!(value, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let entries: Vec<LogEntry> = read_entries(&recorder.log_path(chrono::Utc::now()))
        .await
        .unwrap();
    let warnings: Vec<&LogEntry> = entries
        .iter()
        .filter(|e| e.level == LogLevel::Warn)
        .collect();
    assert_eq!(warnings.len(), 2, "{warnings:#?}");
    assert!(warnings.iter().all(|e| e.category == LogCategory::Bot));
    assert!(warnings.iter().all(|e| e.error.is_some()));
    assert_eq!(warnings[0].message, "Navigate to affiliate center failed, attempt 1/3");
    assert_eq!(warnings[1].message, "Navigate to affiliate center failed, attempt 2/3");
}

#[tokio::test]
async fn record_under_another_key_forces_fresh_login() {
    // A record written under another key is an integrity failure, which the
    // orchestrator treats like an absent session.
    let site = Arc::new(ScriptedSite::default());
    let h = harness(site.clone(), 60);
    let dir = tempfile::tempdir().unwrap();
    let other = SessionManager::new(
        SessionPolicy::default(),
        SessionKey::from_bytes([9; 32]),
        h.store.clone(),
        recorder(dir.path()),
    );
    let record = other.capture(&MemoryContext::new()).await.unwrap();
    other.persist(&record).await.unwrap();

    match h.orchestrator.sessions().load_valid().await {
        Err(err @ AutomationError::Session(_)) => assert!(err.requires_fresh_login()),
        unexpected => panic!("expected a session crypto error, got {unexpected:?}"),
    }
    let source = h.orchestrator.establish_session().await.unwrap();
    assert_eq!(source, SessionSource::FreshLogin);
    assert_eq!(site.logins.load(Ordering::SeqCst), 1);
}
