//! Watch session lifecycle: scripted event sources and one real watch.

mod support;

use docket::error::DocketError;
use docket::lock::try_lock_session;
use docket::{SessionState, ShutdownToken, WatchEvent, WatchSession};
use std::fs;
use std::sync::mpsc;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use support::TestEnv;

/// Sessions are limited to one per process; run these tests one at a time.
static SESSION_SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SESSION_SERIAL
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    done()
}

#[test]
fn test_session_drains_queued_events_on_close() {
    let _serial = serial();
    let mut env = TestEnv::new();
    env.config.workers = 3;
    let docs = [
        ("a.pdf", "BARCODE:240115FRM1AA"),
        ("b.pdf", "BARCODE:240216FRM2BB"),
        ("c.pdf", "BARCODE:231231FRM1CC"),
    ];
    let (tx, rx) = mpsc::channel();
    for (name, page) in docs {
        tx.send(WatchEvent::created(env.write_doc(name, &[page])))
            .unwrap();
    }
    drop(tx);

    let mut session = WatchSession::new(&env.inbox, env.pipeline());
    assert_eq!(session.state(), SessionState::Idle);
    session.run_with_events(rx, &ShutdownToken::new()).unwrap();
    assert_eq!(session.state(), SessionState::Stopped);

    assert!(env.organized("FRM1", "2024-01", "240115FRM1AA.pdf").exists());
    assert!(env.organized("FRM2", "2024-02", "240216FRM2BB.pdf").exists());
    assert!(env.organized("FRM1", "2023-12", "231231FRM1CC.pdf").exists());
    assert_eq!(env.ledger().len(), 3);
    assert!(env.logged("Monitoring started"));
    assert!(env.logged("Monitoring stopped"));
}

#[test]
fn test_events_for_one_path_run_in_order() {
    let _serial = serial();
    let mut env = TestEnv::new();
    env.config.workers = 4;
    let src = env.write_doc("scan.pdf", &["BARCODE:240115FRM1JD"]);

    let (tx, rx) = mpsc::channel();
    for _ in 0..5 {
        tx.send(WatchEvent::created(&src)).unwrap();
    }
    drop(tx);

    let mut session = WatchSession::new(&env.inbox, env.pipeline());
    session.run_with_events(rx, &ShutdownToken::new()).unwrap();

    // One run moved the file; the rest found it gone.
    let skipped = env
        .messages()
        .iter()
        .filter(|m| m.starts_with("File not stable, skipped"))
        .count();
    assert_eq!(skipped, 4);
    assert!(!env.logged("Error processing"));
    assert_eq!(env.ledger().len(), 1);
}

#[test]
fn test_sources_sharing_a_token_both_survive() {
    let _serial = serial();
    for round in 0..20 {
        let mut env = TestEnv::new();
        env.config.workers = 4;
        let first = env.write_doc(&format!("a{round}.pdf"), &["BARCODE:240115FRM1JD", "copy A"]);
        let second = env.write_doc(&format!("b{round}.pdf"), &["BARCODE:240115FRM1JD", "copy B"]);

        let (tx, rx) = mpsc::channel();
        tx.send(WatchEvent::created(&first)).unwrap();
        tx.send(WatchEvent::created(&second)).unwrap();
        drop(tx);

        let mut session = WatchSession::new(&env.inbox, env.pipeline());
        session.run_with_events(rx, &ShutdownToken::new()).unwrap();

        assert_eq!(
            env.inbox_contents(),
            vec![
                "BARCODE:240115FRM1JD\ncopy A".to_string(),
                "BARCODE:240115FRM1JD\ncopy B".to_string(),
            ],
            "round {round}"
        );
        assert!(env.organized("FRM1", "2024-01", "240115FRM1JD.pdf").exists());
        assert_eq!(env.ledger().len(), 2, "round {round}");
    }
}

#[test]
fn test_shutdown_stops_an_open_session() {
    let _serial = serial();
    let env = TestEnv::new();
    let (tx, rx) = mpsc::channel::<WatchEvent>();
    let shutdown = ShutdownToken::new();

    let mut session = WatchSession::new(&env.inbox, env.pipeline());
    let observer = session.observer();
    let stopper = shutdown.clone();
    let handle = thread::spawn(move || {
        let result = session.run_with_events(rx, &stopper);
        (result, session)
    });

    assert!(wait_for(Duration::from_secs(5), || {
        observer.state() == SessionState::Watching
    }));
    shutdown.request();
    let (result, session) = handle.join().unwrap();
    result.unwrap();
    assert_eq!(session.state(), SessionState::Stopped);

    // The ledger file exists after the final flush even with nothing recorded.
    assert!(env.config.ledger_path.exists());
    drop(tx);
}

#[test]
fn test_stopped_session_cannot_restart() {
    let _serial = serial();
    let env = TestEnv::new();
    let mut session = WatchSession::new(&env.inbox, env.pipeline());

    let (tx, rx) = mpsc::channel::<WatchEvent>();
    drop(tx);
    session.run_with_events(rx, &ShutdownToken::new()).unwrap();

    let (_tx, rx) = mpsc::channel::<WatchEvent>();
    let err = session
        .run_with_events(rx, &ShutdownToken::new())
        .unwrap_err();
    assert!(matches!(err, DocketError::InvalidState(_)));
}

#[test]
fn test_ledger_in_use_refuses_session() {
    let _serial = serial();
    let env = TestEnv::new();
    let _held = try_lock_session(&env.config.ledger_path).unwrap();

    let (_tx, rx) = mpsc::channel::<WatchEvent>();
    let mut session = WatchSession::new(&env.inbox, env.pipeline());
    let err = session
        .run_with_events(rx, &ShutdownToken::new())
        .unwrap_err();

    assert!(matches!(err, DocketError::Lock(_)));
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn test_watch_picks_up_new_document() {
    let _serial = serial();
    let env = TestEnv::new();
    let shutdown = ShutdownToken::new();

    let mut session = WatchSession::new(&env.inbox, env.pipeline());
    let observer = session.observer();
    let stopper = shutdown.clone();
    let handle = thread::spawn(move || session.run(&stopper));

    assert!(wait_for(Duration::from_secs(5), || {
        observer.state() == SessionState::Watching
    }));

    // A hard link appears in the inbox fully written, as a single creation.
    let staged = env.stage_doc("scan.pdf", &["BARCODE:240115FRM1JD"]);
    fs::hard_link(&staged, env.inbox.join("scan.pdf")).unwrap();

    let expected = env.organized("FRM1", "2024-01", "240115FRM1JD.pdf");
    let organized = wait_for(Duration::from_secs(10), || {
        env.ledger().contains(&expected)
    });

    shutdown.request();
    handle.join().unwrap().unwrap();
    assert!(organized, "log: {:?}", env.messages());
    assert!(expected.exists());
    assert_eq!(observer.state(), SessionState::Stopped);
}
