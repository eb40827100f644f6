use crate::*;
use gatekeeper_core::wire::{Frame, CHUNK_CAPACITY};
use gatekeeper_services::{Fault, Outcome};

fn streaming_rig() -> Rig {
    let mut rig = rig().chunks(vec![vec![9; 512]; 8]).build();
    rig.run_until(State::Streaming, 5);
    rig.tick();
    rig.tick();
    assert_eq!(rig.frames(), 2);
    rig
}

#[test]
fn cut_during_streaming_disconnects_within_one_tick() {
    let mut rig = streaming_rig();
    assert!(rig.relay.is_connected());

    rig.send(HostCommand::Cut);
    rig.tick();

    assert!(!rig.relay.is_connected());
    assert_eq!(rig.gk.state(), State::Idle);
    assert_eq!(rig.gk.outcome(), Outcome::Cut);
    assert_eq!(rig.gk.last_fault(), Some(&Fault::HostCut));

    // No frame for the aborted session after the cut.
    let frames = rig.frames();
    for _ in 0..5 {
        rig.tick();
    }
    assert_eq!(rig.frames(), frames);
    assert_eq!(rig.frames(), 2);
    assert_eq!(rig.lines().last().map(String::as_str), Some("ACTION:RELAY_CUT"));
}

#[test]
fn cut_preempts_the_step_in_the_same_tick() {
    let mut rig = streaming_rig();
    let reads = rig.reads();
    rig.send(HostCommand::Cut);
    rig.tick();
    assert_eq!(rig.reads(), reads, "no chunk read after a CUT in the same tick");
}

#[test]
fn bad_frame_then_cut_still_disconnects() {
    let mut rig = streaming_rig();

    let mut garbage = Frame::new(vec![1, 2, 3, 4], CHUNK_CAPACITY).unwrap().encode();
    let last = garbage.len() - 1;
    garbage[last] = 0x00;
    rig.gk.receive(&garbage);
    rig.send(HostCommand::Cut);
    rig.tick();

    assert!(!rig.relay.is_connected());
    assert_eq!(rig.gk.state(), State::Idle);
    assert_eq!(rig.gk.last_fault(), Some(&Fault::HostCut));
}

#[test]
fn truncated_frame_does_not_delay_cut() {
    let mut rig = streaming_rig();

    // Declares 8 bytes of payload, delivers three, no end marker.
    rig.gk.receive(&[0xAA, 0x00, 0x00, 0x00, 0x08, 0x11, 0x22, 0x00]);
    rig.send(HostCommand::Cut);
    rig.tick();

    assert!(!rig.relay.is_connected());
    assert_eq!(rig.gk.state(), State::Idle);
    assert_eq!(rig.gk.outcome(), Outcome::Cut);
    assert_eq!(rig.gk.last_fault(), Some(&Fault::HostCut));
    let lines = rig.lines();
    assert_eq!(
        &lines[lines.len() - 2..],
        &["ERROR:PROTOCOL".to_string(), "ACTION:RELAY_CUT".to_string()]
    );
}

#[test]
fn truncated_frame_in_its_own_read_does_not_delay_cut() {
    let mut rig = streaming_rig();

    rig.gk.receive(&[0xAA, 0x00, 0x00, 0x00, 0x08, 0x11]);
    rig.tick();
    assert!(rig.relay.is_connected());
    assert_eq!(rig.gk.state(), State::Streaming);

    rig.send(HostCommand::Cut);
    rig.tick();
    assert!(!rig.relay.is_connected());
    assert_eq!(rig.gk.last_fault(), Some(&Fault::HostCut));
}

#[test]
fn cut_during_authentication_cancels_the_attempt() {
    let mut rig = rig().auth(AuthPoll::Pending).build();
    rig.tick();
    assert_eq!(rig.gk.state(), State::Authenticating);
    assert_eq!(rig.auth.begins.load(Ordering::SeqCst), 1);

    rig.send(HostCommand::Cut);
    rig.tick();

    assert_eq!(rig.gk.state(), State::Idle);
    assert!(rig.auth.cancels.load(Ordering::SeqCst) >= 1);
    assert_eq!(rig.scans(), 0);

    // Late grant after the cut changes nothing.
    rig.auth.set(AuthPoll::Granted);
    rig.tick();
    assert_eq!(rig.gk.state(), State::Idle);
    assert!(!rig.relay.is_connected());
}

#[test]
fn cut_after_allow_disconnects_released_drive() {
    let mut rig = rig().chunks(vec![vec![3; 16]]).build();
    rig.run_until(State::AwaitingHostDecision, 10);
    rig.send(HostCommand::Allow);
    rig.tick();
    assert!(rig.relay.is_connected());

    rig.send(HostCommand::Cut);
    rig.tick();
    assert!(!rig.relay.is_connected());
    assert!(!rig.gk.is_released());
    assert_eq!(rig.gk.outcome(), Outcome::Cut);
}

#[test]
fn cut_and_allow_in_one_read_are_taken_in_order() {
    let mut rig = rig().chunks(vec![vec![3; 16]]).build();
    rig.run_until(State::AwaitingHostDecision, 10);

    rig.gk.receive(b"CUT\nALLOW\n");
    rig.tick();

    assert!(!rig.relay.is_connected());
    assert!(matches!(rig.gk.last_fault(), Some(Fault::ProtocolViolation(_))));
    let lines = rig.lines();
    assert_eq!(
        &lines[lines.len() - 2..],
        &["ACTION:RELAY_CUT".to_string(), "ERROR:PROTOCOL".to_string()]
    );
}
