use crate::*;
use gatekeeper_services::{Fault, Outcome};

#[test]
fn auth_timeout_is_treated_as_failure() {
    let mut rig = rig()
        .auth(AuthPoll::Pending)
        .config(|c| c.auth_timeout = Duration::from_secs(2))
        .build();

    rig.tick();
    rig.tick_after(Duration::from_millis(1500));
    assert_eq!(rig.gk.state(), State::Authenticating);

    rig.tick_after(Duration::from_millis(600));
    assert_eq!(rig.gk.state(), State::Idle);
    assert_eq!(
        rig.gk.last_fault(),
        Some(&Fault::AuthFailure { timed_out: true })
    );
    assert!(rig.auth.cancels.load(Ordering::SeqCst) >= 1);
    assert_eq!(rig.scans(), 0);
    assert!(!rig.relay.is_connected());
    assert_eq!(
        rig.lines(),
        vec!["EVENT:USB_INSERTED", "AUTH:FAIL", "ACTION:RELAY_CUT"]
    );
}

#[test]
fn decision_timeout_cuts() {
    let mut rig = rig()
        .chunks(vec![vec![1; 32]])
        .config(|c| c.decision_timeout = Some(Duration::from_secs(5)))
        .build();
    rig.run_until(State::AwaitingHostDecision, 10);
    assert!(rig.relay.is_connected());

    rig.tick_after(Duration::from_secs(4));
    assert_eq!(rig.gk.state(), State::AwaitingHostDecision);

    rig.tick_after(Duration::from_secs(2));
    assert_eq!(rig.gk.state(), State::Idle);
    assert_eq!(rig.gk.outcome(), Outcome::Cut);
    assert_eq!(rig.gk.last_fault(), Some(&Fault::DecisionTimeout));
    assert!(!rig.relay.is_connected());
    let lines = rig.lines();
    assert_eq!(
        &lines[lines.len() - 2..],
        &["ERROR:TIMEOUT".to_string(), "ACTION:RELAY_CUT".to_string()]
    );
}

#[test]
fn no_decision_timeout_waits_for_the_host() {
    let mut rig = rig()
        .chunks(vec![vec![1; 32]])
        .config(|c| c.decision_timeout = None)
        .build();
    rig.run_until(State::AwaitingHostDecision, 10);

    rig.tick_after(Duration::from_secs(24 * 3600));
    assert_eq!(rig.gk.state(), State::AwaitingHostDecision);
    assert!(rig.relay.is_connected());

    rig.send(HostCommand::Allow);
    rig.tick();
    assert_eq!(rig.gk.outcome(), Outcome::Allowed);
}
