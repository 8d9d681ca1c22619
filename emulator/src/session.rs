use std::collections::VecDeque;

use crossterm::style::Stylize;
use pdm_core::board::{Board, HeadConfig, HeadUnit, TailConfig, TailUnit, drain_frames};
use pdm_core::can::ids;
use pdm_core::hal::{CanFrame, Input, Pin};
use pdm_core::sim::{KEY_COUNT, SimEcu, SimIo};
use pdm_core::tasks::scanner::TESTER_ADDRESS;
use pdm_core::telemetry::{EventId, TelemetryRecord};
use pdm_core::timer::{TimerBank, TimerError};

use crate::command::{Command, Lever};

/// Engine controller address on the diagnostic bus.
const ECU_ADDRESS: u8 = 0x12;

/// Status + eleven data bytes, as a warm engine controller answers.
const ECU_REPLY: [u8; 13] = [
    0x6c, 0x10, 0x0d, 0x48, 0x01, 0x9a, 0x00, 0x5f, 0x0c, 0x80, 0x03, 0x21, 0x00,
];

/// Cadence of the periodic vehicle traffic when `bus on`.
const TRAFFIC_PERIOD_MS: u32 = 100;

const ASSERTED_MV: u16 = 12_000;

const FRAMES_SHOWN: usize = 12;

pub const HELP: &[(&str, &str)] = &[
    ("tick <ms>", "advance the bench clock one pass per millisecond"),
    ("rpm <n>", "engine speed"),
    ("gear <p|r|n|d>", "selector lever"),
    ("brake <on|off>", "brake pedal"),
    ("lights <on|off>", "lighting request on 0x21a"),
    ("rain <on|off>", "rain light request on 0x21a"),
    ("reverse <on|off>", "reverse light request on 0x21a"),
    ("bus <on|off>", "periodic vehicle traffic every 100 ms"),
    ("kl15 <mv>", "ignition sense level"),
    ("kill <on|off>", "kill switch input"),
    ("switch <mv>", "switch signal input (fuel sender on the tail)"),
    ("key <n> <event>", "keypad event: short|long|long2|long3|release|disconnect"),
    ("ecu <ok|silent>", "engine controller answers scans or not"),
    ("status", "shared vehicle record"),
    ("outputs", "pin levels, duty, and key indicators"),
    ("frames", "most recent transmitted frames"),
    ("exit", "leave the emulator"),
];

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BoardKind {
    Head,
    Tail,
}

impl BoardKind {
    pub fn from_tag(tag: &str) -> Result<Self, String> {
        if tag.eq_ignore_ascii_case("head") {
            Ok(Self::Head)
        } else if tag.eq_ignore_ascii_case("tail") {
            Ok(Self::Tail)
        } else {
            Err(format!("Unknown board `{tag}`"))
        }
    }
}

enum Unit {
    Head(Box<HeadUnit>),
    Tail(Box<TailUnit>),
}

impl Unit {
    fn as_board(&self) -> &dyn Board<SimIo> {
        match self {
            Unit::Head(head) => head.as_ref(),
            Unit::Tail(tail) => tail.as_ref(),
        }
    }

    fn as_board_mut(&mut self) -> &mut dyn Board<SimIo> {
        match self {
            Unit::Head(head) => head.as_mut(),
            Unit::Tail(tail) => tail.as_mut(),
        }
    }
}

/// What the rest of the car is currently saying on the bus.
#[allow(clippy::struct_excessive_bools)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Vehicle {
    rpm: u16,
    lever: Lever,
    brake: bool,
    lights: bool,
    rain: bool,
    reverse: bool,
}

impl Vehicle {
    const PARKED: Self = Self {
        rpm: 0,
        lever: Lever::Park,
        brake: false,
        lights: false,
        rain: false,
        reverse: false,
    };

    fn frames(&self) -> [CanFrame; 4] {
        let [rpm_hi, rpm_lo] = self.rpm.saturating_mul(4).to_be_bytes();
        let lighting = (u8::from(self.lights) << 2) | (u8::from(self.rain) << 6);
        [
            CanFrame::full(ids::BRAKE, [0, 0, 0, 0, 0, 0, 0, if self.brake { 40 } else { 0 }]),
            CanFrame::full(ids::ENGINE_SPEED, [0, 0, 0, 0, rpm_hi, rpm_lo, 0, 0]),
            CanFrame::full(
                ids::GEAR,
                [self.lever.code(), 0, 0, 0, u8::from(self.rpm > 0), 0, 0, 0],
            ),
            CanFrame::full(ids::LIGHTING, [lighting, u8::from(self.reverse), 0xf7, 0, 0, 0, 0, 0]),
        ]
    }
}

/// Outcome of one console command.
#[derive(Debug, Default)]
pub struct Reply {
    pub lines: Vec<String>,
    pub exit: bool,
}

pub struct Session {
    timers: TimerBank,
    io: SimIo,
    unit: Unit,
    ecu: SimEcu,
    inbound: VecDeque<CanFrame>,
    vehicle: Vehicle,
    traffic: bool,
    seen: Option<EventId>,
}

impl Session {
    pub fn new(kind: BoardKind) -> Result<Self, TimerError> {
        let timers = TimerBank::new();
        let unit = match kind {
            BoardKind::Head => Unit::Head(Box::new(HeadUnit::new(&timers, HeadConfig::DEFAULT)?)),
            BoardKind::Tail => Unit::Tail(Box::new(TailUnit::new(&timers, TailConfig::DEFAULT)?)),
        };
        let mut ecu = SimEcu::new(ECU_ADDRESS, TESTER_ADDRESS);
        ecu.set_reply(&ECU_REPLY);
        Ok(Self {
            timers,
            io: SimIo::new(),
            unit,
            ecu,
            inbound: VecDeque::new(),
            vehicle: Vehicle::PARKED,
            traffic: true,
            seen: None,
        })
    }

    pub fn handle(&mut self, command: Command) -> Reply {
        let mut reply = Reply::default();
        match command {
            Command::Tick(ms) => {
                for _ in 0..ms {
                    self.step();
                }
                reply.lines.push(format!("t={}ms", self.timers.now_ms()));
            }
            Command::Rpm(rpm) => self.update(|vehicle| vehicle.rpm = rpm),
            Command::Gear(lever) => self.update(|vehicle| vehicle.lever = lever),
            Command::Brake(on) => self.update(|vehicle| vehicle.brake = on),
            Command::Lights(on) => self.update(|vehicle| vehicle.lights = on),
            Command::Rain(on) => self.update(|vehicle| vehicle.rain = on),
            Command::Reverse(on) => self.update(|vehicle| vehicle.reverse = on),
            Command::Bus(on) => self.traffic = on,
            Command::Kl15(mv) => self.io.set_millivolts(Input::Kl15, mv),
            Command::Kill(on) => self
                .io
                .set_millivolts(Input::In3, if on { ASSERTED_MV } else { 0 }),
            Command::Switch(mv) => self.io.set_millivolts(Input::In1, mv),
            Command::Key(key, event) => {
                if usize::from(key) < KEY_COUNT {
                    self.io.press(key, event);
                } else {
                    reply.lines.push(format!("ERR key {key} (0..{})", KEY_COUNT - 1));
                }
            }
            Command::Ecu(answering) => self.ecu.set_silent(!answering),
            Command::Status => reply.lines.extend(self.status()),
            Command::Outputs => reply.lines.extend(self.outputs()),
            Command::Frames => reply.lines.extend(self.frames()),
            Command::Help => reply.lines.extend(
                HELP.iter()
                    .map(|(usage, summary)| format!("{usage:<18} {summary}")),
            ),
            Command::Exit => reply.exit = true,
        }
        reply.lines.extend(self.fresh_telemetry());
        reply
    }

    /// One millisecond: vehicle traffic, one pass, the engine controller's
    /// answers, then the clock.
    fn step(&mut self) {
        if self.traffic && self.timers.now_ms() % TRAFFIC_PERIOD_MS == 0 {
            self.inbound.extend(self.vehicle.frames());
        }

        let board = self.unit.as_board_mut();
        drain_frames::<SimIo, _>(&mut *board, &self.timers, || self.inbound.pop_front());
        board.pass(&mut self.io, &self.timers);

        while let Some(frame) = self.io.take_outbound() {
            if matches!(self.unit, Unit::Head(_)) {
                self.inbound.extend(self.ecu.on_frame(&frame));
            }
        }
        self.timers.tick();
    }

    fn update(&mut self, change: impl FnOnce(&mut Vehicle)) {
        change(&mut self.vehicle);
        self.inbound.extend(self.vehicle.frames());
    }

    fn fresh_telemetry(&mut self) -> Vec<String> {
        let fresh: Vec<TelemetryRecord> = self
            .unit
            .as_board()
            .telemetry()
            .since(self.seen)
            .copied()
            .collect();
        if let Some(last) = fresh.last() {
            self.seen = Some(last.id);
        }
        fresh
            .iter()
            .map(|record| {
                if record.event.is_fault() {
                    record.to_string().red().to_string()
                } else {
                    record.to_string().dark_grey().to_string()
                }
            })
            .collect()
    }

    fn status(&self) -> Vec<String> {
        let state = self.unit.as_board().state();
        let bus = &state.bus;
        let unit = match &self.unit {
            Unit::Head(head) => format!(
                "head power={} gate={} cranking={}",
                head.power_state(),
                if head.gate_open() { "open" } else { "closed" },
                head.starter().is_cranking(),
            ),
            Unit::Tail(tail) => format!("tail brake={:?}", tail.brake_mode()),
        };
        vec![
            unit,
            format!(
                "bus rpm={} running={} gear={} brake={} idle={} debug={}",
                bus.engine_rpm,
                bus.engine_running,
                bus.selected_gear,
                bus.brake_applied,
                bus.can_idle,
                bus.debug_enable,
            ),
            format!(
                "requests lights={} rain={} reverse={}",
                bus.lights_requested, bus.rain_requested, bus.reverse_requested,
            ),
            format!(
                "lights on={} rain={} reverse={} keypad={}",
                state.lights.lights_on,
                state.lights.rain_on,
                state.lights.reverse_on,
                state.keypad_active,
            ),
            format!(
                "start inhibited={} waiting={} starting={} switch={}mV",
                state.start.inhibited, state.start.waiting, state.start.starting, state.switch_mv,
            ),
            format!("record {}", hex(&state.encode())),
        ]
    }

    fn outputs(&self) -> Vec<String> {
        let snapshot = self.io.outputs();
        let mut lines: Vec<String> = Pin::ALL
            .iter()
            .map(|pin| {
                let index = pin.as_index();
                let level = if snapshot.levels[index] { "on" } else { "off" };
                format!("{pin:?}: {level} duty={}%", snapshot.duty[index])
            })
            .collect();
        if matches!(self.unit, Unit::Head(_)) {
            lines.extend(snapshot.leds.iter().enumerate().map(|(key, led)| {
                format!("key {key}: {:?} pattern={:#04x}", led.color, led.pattern)
            }));
        }
        lines
    }

    fn frames(&self) -> Vec<String> {
        let sent = self.io.sent();
        let skip = sent.len().saturating_sub(FRAMES_SHOWN);
        sent[skip..]
            .iter()
            .map(|frame| format!("{:#05x} [{}]", frame.id, hex(frame.payload())))
            .collect()
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdm_core::tasks::PowerState;
    use pdm_core::telemetry::TelemetryEvent;

    fn run(session: &mut Session, line: &str) -> Reply {
        let command = crate::command::parse(line).expect("valid command");
        session.handle(command)
    }

    fn head(session: &Session) -> &HeadUnit {
        match &session.unit {
            Unit::Head(head) => head,
            Unit::Tail(_) => panic!("head session expected"),
        }
    }

    #[test]
    fn ignition_powers_up_the_head_unit() {
        let mut session = Session::new(BoardKind::Head).expect("timers");
        run(&mut session, "kl15 12000");
        let ticked = run(&mut session, "tick 400");
        assert_eq!(head(&session).power_state(), PowerState::On);
        assert_eq!(ticked.lines[0], "t=400ms");
        assert!(
            ticked.lines.iter().any(|line| line.contains("gate-open")),
            "telemetry follows the command output"
        );

        let status = run(&mut session, "status");
        assert!(status.lines[0].starts_with("head power=on gate=open"));
    }

    #[test]
    fn silent_engine_controller_shows_as_a_fault() {
        let mut session = Session::new(BoardKind::Head).expect("timers");
        run(&mut session, "ecu silent");
        run(&mut session, "kl15 12000");
        run(&mut session, "tick 1000");
        let telemetry = session.unit.as_board().telemetry();
        assert!(
            telemetry
                .oldest_first()
                .any(|record| matches!(record.event, TelemetryEvent::ScanFailed(_)))
        );

        run(&mut session, "ecu ok");
        run(&mut session, "tick 1000");
        assert!(head(&session).scanner().setup_sent());
    }

    #[test]
    fn tail_unit_lights_the_brakes() {
        let mut session = Session::new(BoardKind::Tail).expect("timers");
        run(&mut session, "brake on");
        run(&mut session, "tick 50");
        assert!(session.unit.as_board().state().bus.brake_applied);
        let outputs = run(&mut session, "outputs");
        assert!(
            outputs
                .lines
                .iter()
                .any(|line| line.starts_with("Out3: on")),
            "{:?}",
            outputs.lines
        );
    }

    #[test]
    fn out_of_range_key_is_refused() {
        let mut session = Session::new(BoardKind::Head).expect("timers");
        let reply = run(&mut session, "key 9 short");
        assert_eq!(reply.lines.first().map(String::as_str), Some("ERR key 9 (0..7)"));
    }

    #[test]
    fn exit_ends_the_session() {
        let mut session = Session::new(BoardKind::Tail).expect("timers");
        assert!(run(&mut session, "exit").exit);
        assert!(!run(&mut session, "help").exit);
    }
}
