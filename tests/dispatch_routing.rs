//! Routing properties of the dispatcher, checked against test doubles for
//! the locator, transport, lifecycle and collaborators.

mod common;

use std::fs;
use std::time::Duration;

use common::{valid_request, Harness, DAEMON_PID};
use tempfile::TempDir;
use varroa::{
    classify, Action, CommandRequest, DispatchError, Outcome, RoutingClass, TransportError,
    TransportMessage,
};

fn local_only() -> impl Iterator<Item = Action> {
    Action::ALL
        .into_iter()
        .filter(|action| !classify(*action).can_use_daemon)
}

fn prefer_daemon() -> impl Iterator<Item = Action> {
    Action::ALL
        .into_iter()
        .filter(|action| classify(*action).class == RoutingClass::PreferDaemon)
}

// ============================================================================
// Local-only actions
// ============================================================================

#[test]
fn local_only_actions_never_touch_a_running_daemon() {
    let dir = TempDir::new().unwrap();
    for action in local_only() {
        let harness = Harness::with_daemon();
        let outcome = harness
            .dispatch(valid_request(action, dir.path()))
            .unwrap_or_else(|e| panic!("{action} failed: {e}"));
        assert_eq!(outcome, Outcome::Local { action });
        assert!(!harness.used_transport(), "{action} used the transport");
        assert_eq!(harness.collaborator_calls().len(), 1, "{action}");
    }
}

#[test]
fn local_only_actions_run_without_a_daemon() {
    let dir = TempDir::new().unwrap();
    for action in local_only() {
        let harness = Harness::without_daemon();
        let outcome = harness.dispatch(valid_request(action, dir.path())).unwrap();
        assert_eq!(outcome, Outcome::Local { action });
        assert!(!harness.used_transport());
        assert!(harness.journal().contains(&"set_up daemon=false".to_string()));
    }
}

#[test]
fn backup_without_daemon_archives_locally() {
    let harness = Harness::without_daemon();
    let outcome = harness.dispatch(CommandRequest::new(Action::Backup)).unwrap();
    assert_eq!(
        outcome,
        Outcome::Local {
            action: Action::Backup
        }
    );
    assert_eq!(
        harness.journal(),
        vec![
            "locate",
            "set_up daemon=false",
            "collaborator archive_user_files"
        ]
    );
}

#[test]
fn show_config_ignores_its_requires_daemon_flag() {
    assert!(classify(Action::ShowConfig).requires_daemon);
    let harness = Harness::without_daemon();
    harness.dispatch(CommandRequest::new(Action::ShowConfig)).unwrap();
    assert_eq!(harness.collaborator_calls(), vec!["show_config"]);
}

// ============================================================================
// Prefer-daemon actions
// ============================================================================

#[test]
fn prefer_daemon_actions_are_forwarded_when_running() {
    let dir = TempDir::new().unwrap();
    for action in prefer_daemon() {
        let harness = Harness::with_daemon();
        let outcome = harness.dispatch(valid_request(action, dir.path())).unwrap();
        assert_eq!(
            outcome,
            Outcome::Delivered {
                action,
                pid: DAEMON_PID
            }
        );
        assert!(harness.collaborator_calls().is_empty(), "{action} ran locally");
        assert_eq!(harness.transport.sent()[0].command, action.as_str());
    }
}

#[test]
fn prefer_daemon_actions_run_locally_otherwise() {
    let dir = TempDir::new().unwrap();
    for action in prefer_daemon() {
        let harness = Harness::without_daemon();
        let outcome = harness.dispatch(valid_request(action, dir.path())).unwrap();
        assert_eq!(outcome, Outcome::Local { action });
        assert!(!harness.used_transport());
        assert_eq!(harness.collaborator_calls().len(), 1);
    }
}

#[test]
fn snatch_with_freeleech_is_encoded_for_the_daemon() {
    let harness = Harness::with_daemon();
    harness
        .dispatch(
            CommandRequest::new(Action::Snatch)
                .tracker("blue")
                .ids(["101", "202"])
                .with_fl_token(true),
        )
        .unwrap();

    let sent = harness.transport.sent();
    assert_eq!(sent.len(), 1);
    let decoded = TransportMessage::decode(&sent[0].encode().unwrap()).unwrap();
    assert_eq!(decoded.command, "snatch");
    assert_eq!(decoded.site, "blue");
    assert_eq!(decoded.args, vec!["101", "202"]);
    assert!(decoded.fl_token);
}

#[test]
fn forwarding_failure_is_a_transport_error() {
    let harness = Harness::with_daemon().failing_transport();
    let err = harness
        .dispatch(CommandRequest::new(Action::Stats))
        .unwrap_err();
    assert!(matches!(err, DispatchError::Transport(TransportError::Write(_))));
    assert!(harness.collaborator_calls().is_empty());
}

#[test]
fn local_collaborator_failure_is_reported() {
    let harness = Harness::without_daemon().failing_collaborators();
    let err = harness
        .dispatch(CommandRequest::new(Action::Stats))
        .unwrap_err();
    assert!(matches!(err, DispatchError::Collaborator(_)));
}

// ============================================================================
// Require-daemon actions
// ============================================================================

#[test]
fn require_daemon_actions_fail_without_daemon() {
    for action in [Action::Stop, Action::Uptime, Action::Status] {
        let harness = Harness::without_daemon();
        let err = harness.dispatch(CommandRequest::new(action)).unwrap_err();
        assert!(err.to_string().contains("run 'varroa start'"));
        match err {
            DispatchError::DaemonUnavailable { action: got } => assert_eq!(got, action),
            other => panic!("expected DaemonUnavailable for {action}, got {other:?}"),
        }
        assert_eq!(harness.journal(), vec!["locate"]);
    }
}

#[test]
fn stop_delivers_then_signals() {
    let harness = Harness::with_daemon();
    let outcome = harness.dispatch(CommandRequest::new(Action::Stop)).unwrap();
    assert_eq!(outcome, Outcome::Stopped { pid: DAEMON_PID });
    let signal = format!("signal {DAEMON_PID}");
    assert_eq!(
        harness.journal(),
        vec!["locate", "deliver stop", signal.as_str()]
    );
}

#[test]
fn stop_without_delivery_sends_no_signal() {
    let harness = Harness::with_daemon().failing_transport();
    let err = harness.dispatch(CommandRequest::new(Action::Stop)).unwrap_err();
    assert!(matches!(err, DispatchError::Transport(_)));
    assert!(!harness.journal().iter().any(|e| e.starts_with("signal")));
}

#[test]
fn uptime_reads_process_metadata() {
    let harness = Harness::with_daemon();
    let outcome = harness.dispatch(CommandRequest::new(Action::Uptime)).unwrap();
    assert_eq!(outcome, Outcome::Uptime(Duration::from_secs(3720)));
    assert!(!harness.used_transport());
}

#[test]
fn status_round_trips() {
    let harness = Harness::with_daemon();
    match harness.dispatch(CommandRequest::new(Action::Status)).unwrap() {
        Outcome::Status(report) => {
            assert_eq!(report.pid, DAEMON_PID);
            assert_eq!(report.workers, vec!["stats"]);
        }
        other => panic!("expected a status report, got {other:?}"),
    }
    assert_eq!(harness.journal(), vec!["locate", "query status"]);
}

// ============================================================================
// Start
// ============================================================================

#[test]
fn start_refuses_when_already_running() {
    let harness = Harness::with_daemon();
    let err = harness.dispatch(CommandRequest::new(Action::Start)).unwrap_err();
    match err {
        DispatchError::PreconditionFailed(message) => {
            assert!(message.contains(&DAEMON_PID.to_string()))
        }
        other => panic!("expected PreconditionFailed, got {other:?}"),
    }
    assert_eq!(harness.journal(), vec!["locate"]);
}

#[test]
fn start_in_launcher_reports_the_daemon_pid() {
    let harness = Harness::without_daemon();
    let outcome = harness.dispatch(CommandRequest::new(Action::Start)).unwrap();
    assert_eq!(outcome, Outcome::Launched { pid: DAEMON_PID });
    assert_eq!(harness.journal(), vec!["locate", "start"]);
}

#[test]
fn start_in_daemon_serves() {
    let harness = Harness::without_daemon().starting_in_daemon();
    let outcome = harness.dispatch(CommandRequest::new(Action::Start)).unwrap();
    assert_eq!(outcome, Outcome::Served);
    assert_eq!(harness.journal(), vec!["locate", "start", "serve"]);
}

// ============================================================================
// Validation happens first
// ============================================================================

#[test]
fn malformed_id_never_reaches_the_locator() {
    let harness = Harness::with_daemon();
    let err = harness
        .dispatch(CommandRequest::new(Action::Info).tracker("blue").ids(["abc"]))
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidArguments(_)));
    assert!(err.to_string().contains("'abc'"));
    assert!(harness.journal().is_empty());
}

#[test]
fn busy_mount_point_is_a_precondition_failure() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("leftover"), "x").unwrap();
    let harness = Harness::with_daemon();
    let err = harness
        .dispatch(CommandRequest::new(Action::DownloadsFuse).mount_point(dir.path()))
        .unwrap_err();
    match err {
        DispatchError::PreconditionFailed(message) => assert!(message.contains("not empty")),
        other => panic!("expected PreconditionFailed, got {other:?}"),
    }
    assert!(harness.journal().is_empty());
}

#[test]
fn missing_unmount_helper_blocks_fuse() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::without_daemon().without_unmount_helper();
    let err = harness
        .dispatch(CommandRequest::new(Action::LibraryFuse).mount_point(dir.path()))
        .unwrap_err();
    assert!(matches!(err, DispatchError::PreconditionFailed(_)));
    assert!(harness.journal().is_empty());
}

#[test]
fn tracker_on_a_trackerless_command_is_rejected() {
    let harness = Harness::without_daemon();
    let err = harness
        .dispatch(CommandRequest::new(Action::Backup).tracker("blue"))
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidArguments(_)));
    assert!(harness.journal().is_empty());
}
