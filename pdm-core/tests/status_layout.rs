mod support;

use pdm_core::state::{
    BusSignals, Gear, LightStatus, STATUS_LEN, StartStatus, VehicleState,
};
use pdm_core::tasks::status::TAIL_STATUS_ID;

use support::{DRIVE, Rig, brake_frame, gear_frame};

fn known_record() -> VehicleState {
    VehicleState {
        bus: BusSignals {
            engine_rpm: 0x1234,
            engine_running: true,
            selected_gear: Gear::Reverse,
            brake_applied: true,
            lights_requested: false,
            rain_requested: false,
            reverse_requested: false,
            can_idle: true,
            debug_enable: true,
        },
        lights: LightStatus {
            lights_on: true,
            rain_on: false,
            reverse_on: true,
        },
        start: StartStatus {
            inhibited: false,
            waiting: false,
            starting: true,
        },
        keypad_active: false,
        switch_mv: 4321,
    }
}

#[test]
fn record_layout_is_byte_exact() {
    let record = known_record();
    let bytes = record.encode();
    assert_eq!(bytes, [0x12, 0x34, b'R', 0x8b, 0x29, 0x10, 0xe1]);
    assert_eq!(VehicleState::decode(&bytes), record);
}

#[test]
fn every_flag_survives_the_round_trip() {
    let mut record = known_record();
    record.bus.lights_requested = true;
    record.bus.rain_requested = true;
    record.bus.reverse_requested = true;
    record.lights.rain_on = true;
    record.start.inhibited = true;
    record.start.waiting = true;
    record.keypad_active = true;
    record.bus.selected_gear = Gear::Unknown;

    let bytes = record.encode();
    assert_eq!(bytes[3], 0xff);
    assert_eq!(bytes[4], 0x3f);
    assert_eq!(VehicleState::decode(&bytes), record);
}

#[test]
fn tail_broadcasts_its_record() {
    let mut rig = Rig::tail();
    rig.run_with_traffic(300, 100, &[gear_frame(DRIVE, true), brake_frame(true)]);

    let frame = rig.io.sent_with_id(TAIL_STATUS_ID).last().expect("status frame");
    let bytes: [u8; STATUS_LEN] = frame.payload().try_into().expect("status length");
    let decoded = VehicleState::decode(&bytes);
    assert_eq!(decoded, *rig.state());
    assert!(decoded.bus.brake_applied && decoded.bus.engine_running);
}
