mod support;

use pdm_core::board::HeadUnit;
use pdm_core::hal::{Input, KeyEvent, Pin};
use pdm_core::sim::KeyLed;
use pdm_core::tasks::{KeypadConfig, PowerState, StarterConfig};
use pdm_core::telemetry::TelemetryEvent;

use support::{PARK, Rig, brake_frame, gear_frame};

/// Everything the gated head-unit tasks can touch.
#[derive(Debug, PartialEq)]
struct GatedOutputs {
    relay: bool,
    leds: [KeyLed; 8],
    sent: usize,
    last_sent: Option<pdm_core::hal::CanFrame>,
}

fn gated(rig: &Rig<HeadUnit>) -> GatedOutputs {
    GatedOutputs {
        relay: rig.io.level(StarterConfig::DEFAULT.relay),
        leds: rig.io.outputs().leds,
        sent: rig.io.sent().len(),
        last_sent: rig.io.sent().last().copied(),
    }
}

fn press_everything(rig: &mut Rig<HeadUnit>) {
    rig.io.press(StarterConfig::DEFAULT.key, KeyEvent::LongPress1);
    rig.io.press(KeypadConfig::DEFAULT.lights_key, KeyEvent::ShortPress);
}

#[test]
fn nothing_runs_without_ignition() {
    let mut rig = Rig::head();
    rig.io.set_millivolts(Input::Kl15, 0);
    rig.deliver(gear_frame(PARK, false));
    rig.deliver(brake_frame(true));
    let before = gated(&rig);

    for _ in 0..1000 {
        press_everything(&mut rig);
        rig.pass();
        assert_eq!(gated(&rig), before);
    }
    assert_eq!(rig.board.power_state(), PowerState::Off);
    assert!(!rig.state().keypad_active);
    assert!(!rig.state().lights.lights_on);
    assert!(!rig.telemetry().contains(TelemetryEvent::PowerGate(true)));
}

#[test]
fn nothing_runs_while_power_comes_up() {
    let mut rig = Rig::head();
    rig.deliver(gear_frame(PARK, false));
    rig.deliver(brake_frame(true));
    let before = gated(&rig);

    while rig.board.power_state() != PowerState::On {
        press_everything(&mut rig);
        let writes = rig.io.actuator_writes();
        rig.pass();
        if rig.board.power_state() == PowerState::On {
            break;
        }
        assert_eq!(gated(&rig), before);
        assert!(rig.io.actuator_writes() - writes <= 6, "only power rails move");
    }
    assert!(rig.io.level(Pin::Out4), "main power is up");
}

#[test]
fn gated_tasks_stop_when_ignition_drops() {
    let mut rig = Rig::head();
    rig.power_up();
    rig.run(300);
    assert!(rig.io.sent_with_id(0x780).count() > 1);

    rig.io.set_millivolts(Input::Kl15, 0);
    rig.pass();
    assert!(!rig.board.gate_open());
    let after_close = gated(&rig);

    for _ in 0..1000 {
        press_everything(&mut rig);
        rig.pass();
        assert_eq!(gated(&rig), after_close);
    }
    assert!(rig.telemetry().contains(TelemetryEvent::PowerGate(false)));
}
