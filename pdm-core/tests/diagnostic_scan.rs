mod support;

use pdm_core::board::HeadUnit;
use pdm_core::can::ids;
use pdm_core::isotp::LinkError;
use pdm_core::tasks::scanner::{REPEAT_REQUEST, SETUP_REQUEST, TESTER_ADDRESS};
use pdm_core::telemetry::TelemetryEvent;

use support::{DRIVE, REVERSE, Rig, gear_frame};

/// Status bytes, four temperatures/pressures, gear 3, oil temperature,
/// oil pressure status.
const REPLY: [u8; 13] = [
    0x6c, 0x10, 0x01, 0x2c, 0x01, 0x40, 0x02, 0x58, 0x03, 0xe8, 3, 0x5a, 0x01,
];

const TESTER_ID: u16 = ids::ISOTP_FIRST + TESTER_ADDRESS as u16;
const TIMEOUT: TelemetryEvent = TelemetryEvent::ScanFailed(LinkError::Timeout);

fn scanning_head() -> Rig<HeadUnit> {
    let mut rig = Rig::head();
    rig.ecu.as_mut().expect("ecu").set_reply(&REPLY);
    rig
}

fn set_silent(rig: &mut Rig<HeadUnit>, silent: bool) {
    rig.ecu.as_mut().expect("ecu").set_silent(silent);
}

fn ecu_requests(rig: &Rig<HeadUnit>) -> u32 {
    rig.ecu.as_ref().expect("ecu").requests()
}

fn last_request(rig: &Rig<HeadUnit>) -> Vec<u8> {
    rig.ecu.as_ref().expect("ecu").last_request().to_vec()
}

fn timeouts(rig: &Rig<HeadUnit>) -> usize {
    rig.telemetry()
        .oldest_first()
        .filter(|record| record.event == TIMEOUT)
        .count()
}

fn run_until(rig: &mut Rig<HeadUnit>, what: &str, done: impl Fn(&Rig<HeadUnit>) -> bool) {
    for _ in 0..2000 {
        if done(rig) {
            return;
        }
        rig.pass();
    }
    panic!("timed out waiting for {what}");
}

#[test]
fn setup_is_resent_until_it_is_answered() {
    let mut rig = scanning_head();
    set_silent(&mut rig, true);
    rig.power_up();

    run_until(&mut rig, "first timeout", |rig| timeouts(rig) == 1);
    assert!(!rig.board.scanner().setup_sent());
    // First frame announcing the sixteen byte setup request.
    let setup_first_frames = rig
        .io
        .sent_with_id(TESTER_ID)
        .filter(|frame| frame.data()[1..3] == [0x10, 0x10])
        .count();
    assert_eq!(setup_first_frames, 1);

    set_silent(&mut rig, false);
    run_until(&mut rig, "second request", |rig| ecu_requests(rig) == 1);
    assert_eq!(last_request(&rig), SETUP_REQUEST);

    run_until(&mut rig, "setup answered", |rig| rig.board.scanner().setup_sent());
    assert!(rig.telemetry().contains(TelemetryEvent::ScanComplete { setup: true }));

    run_until(&mut rig, "next cycle", |rig| ecu_requests(rig) == 2);
    assert_eq!(last_request(&rig), REPEAT_REQUEST);
    assert_eq!(timeouts(&rig), 1);
}

#[test]
fn a_failure_after_success_falls_back_to_setup() {
    let mut rig = scanning_head();
    rig.power_up();
    run_until(&mut rig, "setup answered", |rig| rig.board.scanner().setup_sent());

    set_silent(&mut rig, true);
    run_until(&mut rig, "timeout", |rig| timeouts(rig) == 1);
    assert!(!rig.board.scanner().setup_sent());

    set_silent(&mut rig, false);
    let answered = ecu_requests(&rig);
    run_until(&mut rig, "retry", |rig| ecu_requests(rig) == answered + 1);
    assert_eq!(last_request(&rig), SETUP_REQUEST);
}

#[test]
fn rebroadcast_reports_the_lever_unless_in_drive() {
    let mut rig = scanning_head();
    rig.deliver(gear_frame(REVERSE, false));
    rig.power_up();
    run_until(&mut rig, "setup answered", |rig| rig.board.scanner().setup_sent());

    let gear = rig.io.sent_with_id(0x701).last().expect("second frame");
    assert_eq!(gear.data()[0], b'R');
    assert_eq!(rig.board.scanner().last_response()[10], b'R');
    let first = rig.io.sent_with_id(0x700).last().expect("first frame");
    assert_eq!(first.data(), &REPLY[2..10]);

    rig.deliver(gear_frame(DRIVE, true));
    rig.io.clear_sent();
    run_until(&mut rig, "next rebroadcast", |rig| {
        rig.io.sent_with_id(0x701).next().is_some()
    });
    let gear = rig.io.sent_with_id(0x701).last().expect("second frame");
    assert_eq!(gear.data()[0], b'3');
}
