use crate::*;
use gatekeeper_services::{Fault, Outcome};

#[test]
fn removal_mid_stream_aborts_session() {
    let mut rig = rig().chunks(vec![vec![5; 256]; 6]).build();
    rig.run_until(State::Streaming, 5);
    rig.tick();
    assert!(rig.relay.is_connected());

    rig.drive.remove();
    rig.tick();

    assert_eq!(rig.gk.state(), State::Idle);
    assert!(!rig.relay.is_connected());
    assert_eq!(rig.gk.last_fault(), Some(&Fault::DriveRemoved));
    assert_eq!(rig.gk.outcome(), Outcome::Cut);
    let lines = rig.lines();
    assert_eq!(
        &lines[lines.len() - 2..],
        &["EVENT:USB_REMOVED".to_string(), "ACTION:RELAY_CUT".to_string()]
    );
    assert!(!lines.iter().any(|l| l.starts_with("HASH:")));
}

#[test]
fn removal_during_authentication_cancels_the_attempt() {
    let mut rig = rig().auth(AuthPoll::Pending).build();
    rig.tick();
    assert_eq!(rig.gk.state(), State::Authenticating);

    rig.drive.remove();
    rig.tick();

    assert_eq!(rig.gk.state(), State::Idle);
    assert_eq!(rig.gk.last_fault(), Some(&Fault::DriveRemoved));
    assert!(rig.auth.cancels.load(Ordering::SeqCst) >= 1);
    assert!(!rig.relay.is_connected());
    assert_eq!(rig.scans(), 0);
    assert_eq!(
        rig.lines().last().map(String::as_str),
        Some("ACTION:RELAY_CUT")
    );

    // A grant that resolves after the removal changes nothing.
    rig.auth.set(AuthPoll::Granted);
    for _ in 0..3 {
        rig.tick();
    }
    assert_eq!(rig.gk.state(), State::Idle);
    assert!(!rig.relay.is_connected());
    assert_eq!(rig.scans(), 0);
    assert!(!rig.lines().iter().any(|l| l == "AUTH:OK"));
}

#[test]
fn removal_while_awaiting_decision_cuts() {
    let mut rig = rig().chunks(vec![vec![5; 256]]).build();
    rig.run_until(State::AwaitingHostDecision, 10);
    rig.drive.remove();
    rig.tick();
    assert!(!rig.relay.is_connected());
    assert_eq!(rig.gk.state(), State::Idle);

    // A late ALLOW has nothing to apply to.
    rig.send(HostCommand::Allow);
    rig.tick();
    assert!(!rig.relay.is_connected());
    assert!(matches!(rig.gk.last_fault(), Some(Fault::ProtocolViolation(_))));
}

#[test]
fn removal_after_allow_disconnects() {
    let mut rig = rig().chunks(vec![vec![5; 256]]).build();
    rig.run_until(State::AwaitingHostDecision, 10);
    rig.send(HostCommand::Allow);
    rig.tick();
    assert!(rig.relay.is_connected());

    rig.drive.remove();
    rig.tick();
    assert!(!rig.relay.is_connected());
    assert!(!rig.gk.is_released());
    let lines = rig.lines();
    assert_eq!(
        &lines[lines.len() - 2..],
        &["EVENT:USB_REMOVED".to_string(), "ACTION:RELAY_CUT".to_string()]
    );
}

#[test]
fn presence_during_live_session_is_not_a_new_session() {
    let mut rig = rig().auth(AuthPoll::Pending).build();
    rig.tick();
    let id = rig.gk.session().unwrap().id();

    // Still present on every tick: no second insertion event.
    for _ in 0..5 {
        rig.tick();
    }
    assert_eq!(rig.gk.session().unwrap().id(), id);
    assert_eq!(rig.auth.begins.load(Ordering::SeqCst), 1);
    let inserted = rig
        .lines()
        .iter()
        .filter(|l| *l == "EVENT:USB_INSERTED")
        .count();
    assert_eq!(inserted, 1);
}

#[test]
fn reinsertion_starts_a_new_session() {
    let mut rig = rig().auth(AuthPoll::Denied).build();
    rig.tick();
    assert_eq!(rig.gk.state(), State::Idle);

    rig.drive.remove();
    rig.tick();
    rig.auth.set(AuthPoll::Granted);
    rig.drive.insert();
    rig.tick();

    assert_eq!(rig.gk.state(), State::Scanning);
    assert_eq!(rig.gk.session().unwrap().id().0, 2);
    assert!(rig.gk.last_fault().is_none());
}
