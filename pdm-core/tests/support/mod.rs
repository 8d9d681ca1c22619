//! Whole-board harness shared by the integration tests.
#![allow(dead_code)]

use pdm_core::board::{Board, HeadConfig, HeadUnit, TailConfig, TailUnit};
use pdm_core::can::ids;
use pdm_core::hal::{CanFrame, Input};
use pdm_core::sim::{SimEcu, SimIo};
use pdm_core::state::VehicleState;
use pdm_core::tasks::scanner::{ECU_ADDRESS, TESTER_ADDRESS};
use pdm_core::telemetry::TelemetryRecorder;
use pdm_core::timer::TimerBank;

pub const IGNITION_ON_MV: u16 = 12_000;

/// One board wired to a simulated loom, optionally with an engine
/// controller answering on the diagnostic link.
pub struct Rig<B> {
    pub timers: TimerBank,
    pub io: SimIo,
    pub board: B,
    pub ecu: Option<SimEcu>,
}

impl Rig<HeadUnit> {
    pub fn head() -> Self {
        let timers = TimerBank::new();
        let board = HeadUnit::new(&timers, HeadConfig::DEFAULT).expect("timers");
        let mut io = SimIo::new();
        io.set_millivolts(Input::Kl15, IGNITION_ON_MV);
        Self {
            timers,
            io,
            board,
            ecu: Some(SimEcu::new(ECU_ADDRESS, TESTER_ADDRESS)),
        }
    }

    /// Runs passes until the power gate opens.
    pub fn power_up(&mut self) {
        for _ in 0..1000 {
            if self.board.gate_open() {
                return;
            }
            self.pass();
        }
        panic!("power never came up: {}", self.board.power_state());
    }
}

impl Rig<TailUnit> {
    pub fn tail() -> Self {
        let timers = TimerBank::new();
        let board = TailUnit::new(&timers, TailConfig::DEFAULT).expect("timers");
        Self {
            timers,
            io: SimIo::new(),
            board,
            ecu: None,
        }
    }
}

impl<B: Board<SimIo>> Rig<B> {
    /// One control-loop iteration followed by one millisecond tick.
    pub fn pass(&mut self) {
        self.board.pass(&mut self.io, &self.timers);
        self.exchange();
        self.timers.tick();
    }

    pub fn run(&mut self, ms: u32) {
        for _ in 0..ms {
            self.pass();
        }
    }

    /// Runs `ms` passes, re-sending `frames` every `every_ms` so the bus
    /// stays active.
    pub fn run_with_traffic(&mut self, ms: u32, every_ms: u32, frames: &[CanFrame]) {
        for elapsed in 0..ms {
            if elapsed % every_ms == 0 {
                for frame in frames {
                    self.deliver(*frame);
                }
            }
            self.pass();
        }
    }

    pub fn deliver(&mut self, frame: CanFrame) -> bool {
        self.board.receive(&self.timers, &frame)
    }

    pub fn state(&self) -> &VehicleState {
        self.board.state()
    }

    pub fn telemetry(&self) -> &TelemetryRecorder {
        self.board.telemetry()
    }

    fn exchange(&mut self) {
        while let Some(frame) = self.io.take_outbound() {
            let Some(ecu) = self.ecu.as_mut() else {
                continue;
            };
            for reply in &ecu.on_frame(&frame) {
                self.board.receive(&self.timers, reply);
            }
        }
    }
}

pub fn brake_frame(applied: bool) -> CanFrame {
    CanFrame::full(ids::BRAKE, [0, 0, 0, 0, 0, 0, 0, if applied { 40 } else { 0 }])
}

pub fn rpm_frame(rpm: u16) -> CanFrame {
    let [hi, lo] = (rpm * 4).to_be_bytes();
    CanFrame::full(ids::ENGINE_SPEED, [0, 0, 0, 0, hi, lo, 0, 0])
}

/// Gear message with the lever byte and the engine-running byte.
pub fn gear_frame(lever: u8, engine_running: bool) -> CanFrame {
    CanFrame::full(
        ids::GEAR,
        [lever, 0, 0, 0, u8::from(engine_running), 0, 0, 0],
    )
}

pub const PARK: u8 = 0xe1;
pub const REVERSE: u8 = 0xd2;
pub const DRIVE: u8 = 0x78;
