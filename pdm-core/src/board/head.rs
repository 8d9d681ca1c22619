//! Head unit: master power, keypad, starter interlock, and the engine scan.
//!
//! The power sequencer runs every pass. Everything else runs only while it
//! reports `On`, and is restarted from entry each time power comes up.

use crate::can::{self, IdleMonitor, ids};
use crate::hal::{CanFrame, Io};
use crate::isotp::{DiagnosticLink, IsoTp};
use crate::scheduler::{Context, Runnable, TaskSlot, restart_all, run_pass};
use crate::state::VehicleState;
use crate::tasks::scanner::TESTER_ADDRESS;
use crate::tasks::{
    InputConfig, InputSampler, KeypadConfig, KeypadToggles, LightReporter, PowerConfig,
    PowerSequencer, PowerState, ReporterConfig, Scanner, ScannerConfig, Starter, StarterConfig,
    StatusConfig, StatusReporter,
};
use crate::telemetry::{TelemetryEvent, TelemetryRecorder};
use crate::timer::{TimerBank, TimerError};

use super::{Board, IdleEdges};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HeadConfig {
    pub power: PowerConfig,
    pub keypad: KeypadConfig,
    pub input: InputConfig,
    pub reporter: ReporterConfig,
    pub starter: StarterConfig,
    pub scanner: ScannerConfig,
    pub status: StatusConfig,
    pub idle_timeout_ms: u32,
}

impl HeadConfig {
    pub const DEFAULT: Self = Self {
        power: PowerConfig::DEFAULT,
        keypad: KeypadConfig::DEFAULT,
        input: InputConfig::DEFAULT,
        reporter: ReporterConfig::DEFAULT,
        starter: StarterConfig::DEFAULT,
        scanner: ScannerConfig::DEFAULT,
        status: StatusConfig::HEAD,
        idle_timeout_ms: can::DEFAULT_IDLE_TIMEOUT_MS,
    };
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

pub struct HeadUnit<L = IsoTp> {
    state: VehicleState,
    telemetry: TelemetryRecorder,
    idle: IdleMonitor,
    idle_edges: IdleEdges,
    power: TaskSlot<PowerSequencer>,
    keypad: TaskSlot<KeypadToggles>,
    input: TaskSlot<InputSampler>,
    reporter: TaskSlot<LightReporter>,
    starter: TaskSlot<Starter>,
    scanner: TaskSlot<Scanner<L>>,
    status: TaskSlot<StatusReporter>,
}

impl HeadUnit<IsoTp> {
    /// Builds the head unit with an ISO-TP endpoint at the tester address.
    pub fn new(timers: &TimerBank, config: HeadConfig) -> Result<Self, TimerError> {
        let link = IsoTp::new(timers, TESTER_ADDRESS)?;
        Self::with_link(timers, config, link)
    }
}

impl<L: DiagnosticLink> HeadUnit<L> {
    pub fn with_link(timers: &TimerBank, config: HeadConfig, link: L) -> Result<Self, TimerError> {
        Ok(Self {
            state: VehicleState::new(),
            telemetry: TelemetryRecorder::new(),
            idle: IdleMonitor::new(timers, config.idle_timeout_ms)?,
            idle_edges: IdleEdges::default(),
            power: TaskSlot::cyclic(PowerSequencer::new(timers, config.power)?),
            keypad: TaskSlot::cyclic(KeypadToggles::new(config.keypad)),
            input: TaskSlot::cyclic(InputSampler::new(timers, config.input)?),
            reporter: TaskSlot::cyclic(LightReporter::new(timers, config.reporter)?),
            starter: TaskSlot::cyclic(Starter::new(timers, config.starter)?),
            scanner: TaskSlot::cyclic(Scanner::new(timers, link, config.scanner)?),
            status: TaskSlot::cyclic(StatusReporter::new(timers, config.status)?),
        })
    }

    pub fn power_state(&self) -> PowerState {
        self.power.task().state()
    }

    /// `true` while the gated tasks are running.
    pub fn gate_open(&self) -> bool {
        self.power.task().is_on()
    }

    pub fn scanner(&self) -> &Scanner<L> {
        self.scanner.task()
    }

    pub fn starter(&self) -> &Starter {
        self.starter.task()
    }
}

impl<H: Io + ?Sized, L: DiagnosticLink> Board<H> for HeadUnit<L> {
    fn accepts(&self, id: u16) -> bool {
        matches!(
            id,
            ids::BRAKE | ids::ENGINE_SPEED | ids::GEAR | ids::DEBUG
        ) || self.scanner.task().link().accepts(id)
    }

    fn receive(&mut self, timers: &TimerBank, frame: &CanFrame) -> bool {
        if !Board::<H>::accepts(self, frame.id) {
            return false;
        }
        let data = frame.data();
        let bus = &mut self.state.bus;
        match frame.id {
            ids::BRAKE => bus.brake_applied = can::brake_applied(data),
            ids::ENGINE_SPEED => {
                bus.engine_rpm = can::engine_rpm(data);
                bus.engine_running = bus.engine_rpm > 0;
            }
            ids::GEAR => bus.selected_gear = can::selected_gear(data),
            ids::DEBUG => {
                if let Some(enabled) = can::debug_request(data) {
                    bus.debug_enable = enabled;
                }
            }
            _ => {
                self.scanner.task_mut().link_mut().accept(timers, frame);
            }
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
            power,
            keypad,
            input,
            reporter,
            starter,
            scanner,
            status,
        } = self;

        let edge = idle.poll(timers);
        if let Some(now_idle) = edge {
            state.bus.can_idle = now_idle;
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
        }

        let was_on = power.task().is_on();
        power.run(&mut cx);
        let on = power.task().is_on();

        let mut gated: [&mut dyn Runnable<H>; 6] = [
            &mut *keypad,
            &mut *input,
            &mut *reporter,
            &mut *starter,
            &mut *scanner,
            &mut *status,
        ];
        if on != was_on {
            cx.record(TelemetryEvent::PowerGate(on));
            if on {
                restart_all(&mut gated, &mut cx);
            }
        }
        if on {
            run_pass(&mut gated, &mut cx);
        } else if was_on {
            // Gate just closed with the starter possibly mid-crank.
            starter.task().release(&mut cx);
        }
    }

    fn state(&self) -> &VehicleState {
        &self.state
    }

    fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }
}
