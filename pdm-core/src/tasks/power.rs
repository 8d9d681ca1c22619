//! Master power sequencing.
//!
//! ```text
//! Init --settle--> InitDone --kl15 && !kill--> OnWait --delay--> On
//!                     |                          |               |
//!                     +------ kill || !kl15 -----+-- kill        kill || !kl15
//!                     v                          v               v
//!                    Off <--- engine off || timeout ------- OffWait
//! ```
//!
//! `Off` is terminal for this power cycle: the module keeps blinking its LED
//! and nudging the CAN transceiver towards standby until ignition-sense is
//! removed and the supply physically drops.

use core::fmt;

use crate::hal::{Input, Io, Pin};
use crate::scheduler::{Context, Step, Task};
use crate::telemetry::TelemetryEvent;
use crate::timer::{Timer, TimerBank, TimerError};

/// Power sequencing states.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
    Init,
    InitDone,
    OnWait,
    On,
    OffWait,
    Off,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PowerState::Init => "init",
            PowerState::InitDone => "init-done",
            PowerState::OnWait => "on-wait",
            PowerState::On => "on",
            PowerState::OffWait => "off-wait",
            PowerState::Off => "off",
        };
        f.write_str(label)
    }
}

/// Timing, thresholds, and wiring for the power sequencer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PowerConfig {
    /// Input filter settle time after reset.
    pub settle_ms: u32,
    /// Delay between main power and the wake line.
    pub on_delay_ms: u32,
    /// Longest wait for the engine controller to shut down.
    pub off_delay_ms: u32,
    pub blink_ms: u32,
    /// Ignition-sense and kill inputs read as asserted above this level.
    pub threshold_mv: u16,
    /// The engine-off sense reads "engine on" below this level.
    pub engine_on_below_mv: u16,
    /// Main power (terminal 30).
    pub main: Pin,
    /// System wake line (terminal 15).
    pub wake: Pin,
    pub led: Pin,
    pub ignition: Input,
    pub kill: Input,
    pub engine_sense: Input,
}

impl PowerConfig {
    pub const DEFAULT: Self = Self {
        settle_ms: 100,
        on_delay_ms: 100,
        off_delay_ms: 500,
        blink_ms: 100,
        threshold_mv: 5000,
        engine_on_below_mv: 5000,
        main: Pin::Out4,
        wake: Pin::Out2,
        led: Pin::Out3,
        ignition: Input::Kl15,
        kill: Input::In3,
        engine_sense: Input::In1,
    };
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Phase {
    Entry,
    Run,
}

/// Drives the supply rails and decides whether the rest of the system runs.
pub struct PowerSequencer {
    config: PowerConfig,
    timer: Timer,
    phase: Phase,
    state: PowerState,
    blink: bool,
}

impl PowerSequencer {
    pub fn new(timers: &TimerBank, config: PowerConfig) -> Result<Self, TimerError> {
        Ok(Self {
            config,
            timer: timers.register()?,
            phase: Phase::Entry,
            state: PowerState::Init,
            blink: false,
        })
    }

    pub const fn state(&self) -> PowerState {
        self.state
    }

    /// True only while fully powered; gated tasks run only then.
    pub const fn is_on(&self) -> bool {
        matches!(self.state, PowerState::On)
    }

    fn enter<H: Io + ?Sized>(&mut self, cx: &mut Context<'_, H>, state: PowerState) {
        let config = &self.config;
        match state {
            PowerState::Init => {
                cx.timers.reset(self.timer, config.settle_ms);
                cx.io.set(Pin::KillPullUp, true);
                cx.io.set(Pin::PowerHold, true);
                cx.io.set(Pin::CanWake, true);
                cx.io.set(config.led, true);
                cx.io.set(config.main, false);
                cx.io.set(config.wake, false);
            }
            PowerState::InitDone => {}
            PowerState::OnWait => {
                cx.timers.reset(self.timer, config.on_delay_ms);
                cx.io.set(config.main, true);
            }
            PowerState::On => cx.io.set(config.wake, true),
            PowerState::OffWait => {
                cx.timers.reset(self.timer, config.off_delay_ms);
                cx.io.set(config.led, false);
                cx.io.set(config.wake, false);
            }
            PowerState::Off => {
                cx.io.set(config.main, false);
                cx.io.set(Pin::PowerHold, false);
                cx.io.set(Pin::CanWake, false);
            }
        }
        self.state = state;
        cx.record(TelemetryEvent::PowerState(state));
    }

    fn blink_off<H: Io + ?Sized>(&mut self, cx: &mut Context<'_, H>) {
        if !cx.timers.expired(self.timer) {
            return;
        }
        cx.timers.reset(self.timer, self.config.blink_ms);
        cx.io.set(self.config.led, self.blink);
        // Re-toggle in case the transceiver missed the first standby request.
        cx.io.set(Pin::CanWake, self.blink);
        cx.io.set(Pin::PowerHold, false);
        self.blink = !self.blink;
    }
}

impl<H: Io + ?Sized> Task<H> for PowerSequencer {
    fn name(&self) -> &'static str {
        "power"
    }

    fn resume(&mut self, cx: &mut Context<'_, H>) -> Step {
        if self.phase == Phase::Entry {
            self.enter(cx, PowerState::Init);
            self.phase = Phase::Run;
        }

        let config = self.config;
        let ignition = cx.io.millivolts(config.ignition) > config.threshold_mv;
        let kill = cx.io.millivolts(config.kill) > config.threshold_mv;
        let engine_on = cx.io.millivolts(config.engine_sense) < config.engine_on_below_mv;

        match self.state {
            PowerState::Init => {
                if cx.timers.expired(self.timer) {
                    self.enter(cx, PowerState::InitDone);
                }
            }
            PowerState::InitDone => {
                if kill || !ignition {
                    self.enter(cx, PowerState::Off);
                } else {
                    self.enter(cx, PowerState::OnWait);
                }
            }
            PowerState::OnWait => {
                if kill {
                    self.enter(cx, PowerState::Off);
                } else if cx.timers.expired(self.timer) {
                    self.enter(cx, PowerState::On);
                }
            }
            PowerState::On => {
                if kill || !ignition {
                    self.enter(cx, PowerState::OffWait);
                }
            }
            PowerState::OffWait => {
                if !engine_on || cx.timers.expired(self.timer) {
                    self.enter(cx, PowerState::Off);
                }
            }
            PowerState::Off => self.blink_off(cx),
        }
        Step::Yielded
    }

    fn restart(&mut self) {
        self.phase = Phase::Entry;
        self.state = PowerState::Init;
        self.blink = false;
    }
}
