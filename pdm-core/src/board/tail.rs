//! Tail unit: brake lamps, tail/reverse/rain lamps, and the fuel sender.
//!
//! The tail unit has no power sequencer; every task runs every pass.

use crate::can::{self, IdleMonitor, ids};
use crate::hal::{CanFrame, Io};
use crate::scheduler::{Context, Runnable, TaskSlot, run_pass};
use crate::state::VehicleState;
use crate::tasks::{
    BrakeConfig, BrakeLights, BrakeMode, FuelConfig, FuelLevel, LightMirror, MirrorConfig,
    StatusConfig, StatusReporter,
};
use crate::telemetry::{TelemetryEvent, TelemetryRecorder};
use crate::timer::{TimerBank, TimerError};

use super::{Board, IdleEdges};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TailConfig {
    pub brake: BrakeConfig,
    pub lights: MirrorConfig,
    pub fuel: FuelConfig,
    pub status: StatusConfig,
    pub idle_timeout_ms: u32,
}

impl TailConfig {
    pub const DEFAULT: Self = Self {
        brake: BrakeConfig::DEFAULT,
        lights: MirrorConfig::DEFAULT,
        fuel: FuelConfig::DEFAULT,
        status: StatusConfig::TAIL,
        idle_timeout_ms: can::DEFAULT_IDLE_TIMEOUT_MS,
    };
}

impl Default for TailConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

pub struct TailUnit {
    state: VehicleState,
    telemetry: TelemetryRecorder,
    idle: IdleMonitor,
    idle_edges: IdleEdges,
    brake: TaskSlot<BrakeLights>,
    lights: TaskSlot<LightMirror>,
    fuel: TaskSlot<FuelLevel>,
    status: TaskSlot<StatusReporter>,
}

impl TailUnit {
    pub fn new(timers: &TimerBank, config: TailConfig) -> Result<Self, TimerError> {
        Ok(Self {
            state: VehicleState::new(),
            telemetry: TelemetryRecorder::new(),
            idle: IdleMonitor::new(timers, config.idle_timeout_ms)?,
            idle_edges: IdleEdges::default(),
            brake: TaskSlot::cyclic(BrakeLights::new(timers, config.brake)?),
            lights: TaskSlot::cyclic(LightMirror::new(timers, config.lights)?),
            fuel: TaskSlot::cyclic(FuelLevel::new(timers, config.fuel)?),
            status: TaskSlot::cyclic(StatusReporter::new(timers, config.status)?),
        })
    }

    pub fn brake_mode(&self) -> BrakeMode {
        self.brake.task().mode()
    }
}

impl<H: Io + ?Sized> Board<H> for TailUnit {
    fn accepts(&self, id: u16) -> bool {
        matches!(id, ids::BRAKE | ids::GEAR | ids::LIGHTING | ids::DEBUG)
    }

    fn receive(&mut self, timers: &TimerBank, frame: &CanFrame) -> bool {
        let data = frame.data();
        let bus = &mut self.state.bus;
        match frame.id {
            ids::BRAKE => bus.brake_applied = can::brake_applied(data),
            ids::GEAR => bus.engine_running = can::engine_running(data),
            ids::LIGHTING => {
                let request = can::lighting_request(data);
                bus.lights_requested = request.lights;
                bus.rain_requested = request.rain;
                bus.reverse_requested = request.reverse;
            }
            ids::DEBUG => {
                if let Some(enabled) = can::debug_request(data) {
                    bus.debug_enable = enabled;
                }
            }
            _ => return false,
        }
        if let Some(idle) = self.idle.activity(timers) {
            self.state.bus.can_idle = idle;
            self.idle_edges.note(Some(idle));
        }
        true
    }

    fn pass(&mut self, io: &mut H, timers: &TimerBank) {
        let Self {
            state,
            telemetry,
            idle,
            idle_edges,
            brake,
            lights,
            fuel,
            status,
        } = self;

        let edge = idle.poll(timers);
        if let Some(now_idle) = edge {
            state.bus.can_idle = now_idle;
            if now_idle && !state.bus.debug_enable {
                // Limp-home lighting until the bus returns.
                state.bus.lights_requested = true;
                state.bus.rain_requested = false;
                state.bus.reverse_requested = false;
            }
        }
        idle_edges.note(edge);

        let mut cx = Context {
            io,
            timers,
            state,
            telemetry,
        };
        for now_idle in idle_edges.take() {
            cx.record(TelemetryEvent::CanIdle(now_idle));
            Runnable::<H>::force_restart(brake, &mut cx);
        }

        let mut tasks: [&mut dyn Runnable<H>; 4] =
            [&mut *brake, &mut *lights, &mut *fuel, &mut *status];
        run_pass(&mut tasks, &mut cx);
    }

    fn state(&self) -> &VehicleState {
        &self.state
    }

    fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }
}
