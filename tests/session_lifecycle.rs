use chrono::{Duration, Utc};
use std::sync::Arc;

use outreach::AutomationError;
use outreach::activity::{ActivityConfig, ActivityRecorder};
use outreach::context::{Cookie, MemoryContext, Viewport};
use outreach::secret::SecretString;
use outreach::session::{
    EncryptedSessionRecord, FileSessionStore, SessionCryptoError, SessionKey, SessionManager,
    SessionPolicy, SessionRecord, SessionState, SessionStore,
};

fn manager(dir: &std::path::Path, key: SessionKey) -> (SessionManager, Arc<FileSessionStore>) {
    let recorder = Arc::new(ActivityRecorder::new(ActivityConfig {
        mirror_to_tracing: false,
        ..ActivityConfig::in_dir(dir.join("logs"))
    }));
    let store = Arc::new(FileSessionStore::new(dir.join("session.json")));
    let manager = SessionManager::new(SessionPolicy::default(), key, store.clone(), recorder);
    (manager, store)
}

fn record(captured_hours_ago: i64, expires_in_hours: i64) -> SessionRecord {
    let now = Utc::now();
    SessionRecord {
        origin: Some("https://seller.example.com".to_string()),
        cookies: vec![Cookie::new("sessionid", "very-secret-cookie", ".seller.example.com")],
        local_storage: [("auth".to_string(), "token-123".to_string())].into(),
        session_storage: Default::default(),
        user_agent: "Mozilla/5.0 (X11; Linux x86_64)".to_string(),
        viewport: Viewport::default(),
        captured_at: now - Duration::hours(captured_hours_ago),
        expires_at: now + Duration::hours(expires_in_hours),
    }
}

#[tokio::test]
async fn persisted_session_round_trips_through_the_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, store) = manager(dir.path(), SessionKey::generate());
    let original = record(1, 23);

    manager.persist(&original).await.unwrap();

    let on_disk = std::fs::read_to_string(store.path()).unwrap();
    assert!(!on_disk.contains("very-secret-cookie"));
    assert!(!on_disk.contains("token-123"));

    let loaded = manager.load_valid().await.unwrap();
    assert_eq!(loaded, original);
    assert_eq!(manager.stored_state().await, SessionState::Valid);
}

#[tokio::test]
async fn passphrase_key_reads_what_it_wrote() {
    let dir = tempfile::tempdir().unwrap();
    let secret = SecretString::from("correct horse battery staple");
    let (writer, _) = manager(dir.path(), SessionKey::from_secret(&secret).unwrap());
    writer.persist(&record(0, 24)).await.unwrap();

    let (reader, _) = manager(dir.path(), SessionKey::from_secret(&secret).unwrap());
    assert!(reader.load_valid().await.is_ok());
}

#[tokio::test]
async fn wrong_key_fails_the_integrity_check() {
    let dir = tempfile::tempdir().unwrap();
    let (writer, _) = manager(dir.path(), SessionKey::generate());
    writer.persist(&record(1, 23)).await.unwrap();

    let (reader, _) = manager(dir.path(), SessionKey::generate());
    match reader.load_valid().await {
        Err(AutomationError::Session(SessionCryptoError::Integrity)) => {}
        other => panic!("expected an integrity failure, got {other:?}"),
    }
    assert_eq!(reader.stored_state().await, SessionState::Absent);
}

#[tokio::test]
async fn tampered_ciphertext_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, store) = manager(dir.path(), SessionKey::generate());
    manager.persist(&record(1, 23)).await.unwrap();

    let mut encrypted: EncryptedSessionRecord = store.load().await.unwrap().unwrap();
    encrypted.ciphertext[0] ^= 0x01;
    store.save(&encrypted).await.unwrap();

    let err = manager.load_valid().await.unwrap_err();
    assert!(matches!(err, AutomationError::Session(SessionCryptoError::Integrity)));
    assert!(err.requires_fresh_login());
}

#[tokio::test]
async fn validity_follows_both_age_and_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, _) = manager(dir.path(), SessionKey::generate());

    // Captured an hour ago, expiring in 23 hours.
    assert!(manager.is_valid(&record(1, 23)));
    // Older than the 24h maximum even though not yet expired.
    assert!(!manager.is_valid(&record(25, 1)));
    // Past its own expiry.
    assert!(!manager.is_valid(&record(1, -1)));

    manager.persist(&record(25, 1)).await.unwrap();
    match manager.load_valid().await {
        Err(err @ AutomationError::SessionExpired { .. }) => assert!(err.requires_fresh_login()),
        other => panic!("expected an expired session, got {other:?}"),
    }
    assert_eq!(manager.stored_state().await, SessionState::Expired);
}

#[tokio::test]
async fn missing_file_means_no_session() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, _) = manager(dir.path(), SessionKey::generate());

    assert!(matches!(
        manager.load_valid().await,
        Err(AutomationError::SessionMissing)
    ));
    assert_eq!(manager.stored_state().await, SessionState::Absent);
}

#[tokio::test]
async fn invalidate_removes_the_record() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, store) = manager(dir.path(), SessionKey::generate());
    manager.persist(&record(0, 24)).await.unwrap();

    manager.invalidate().await.unwrap();
    assert!(!store.path().exists());
    // Clearing twice is fine.
    manager.invalidate().await.unwrap();
}

#[tokio::test]
async fn capture_then_restore_reproduces_the_context() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, _) = manager(dir.path(), SessionKey::generate());

    let source = MemoryContext::new();
    source.push_cookie(Cookie::new("sessionid", "abc", ".seller.example.com"));
    source.put_local("auth", "token-123");
    source.put_session("tab", "1");
    source.set_user_agent_now("Mozilla/5.0 (test)");
    source.set_url_now("https://seller.example.com/affiliate/center");
    let captured = manager.capture(&source).await.unwrap();
    assert_eq!(captured.expires_at - captured.captured_at, Duration::hours(24));
    manager.persist(&captured).await.unwrap();

    let target = MemoryContext::new();
    let loaded = manager.load_valid().await.unwrap();
    assert!(manager.restore(&loaded, &target).await);

    assert_eq!(target.snapshot_cookies(), source.snapshot_cookies());
    assert_eq!(target.snapshot_local(), source.snapshot_local());
    assert_eq!(target.opened(), vec!["https://seller.example.com".to_string()]);
    assert_eq!(
        target.calls(),
        vec![
            "set_cookies",
            "open",
            "set_local_storage",
            "set_session_storage",
            "set_viewport",
            "set_user_agent"
        ]
    );
}
