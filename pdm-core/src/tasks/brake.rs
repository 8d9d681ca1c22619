//! Brake-light controller for the tail unit.
//!
//! Priorities, highest first:
//!
//! 1. While the bus is idle both lamps flash alternately at full brightness
//!    so a dead bus is visible from behind.
//! 2. While the engine is off and the pedal is released, a slow
//!    left-then-right reminder pulse shows the car is not running.
//! 3. Otherwise the lamps follow the pedal, dimmed when the headlights are
//!    requested. The first application after a long release is announced
//!    with a short alternating attention flash.

use crate::hal::{Io, Pin};
use crate::scheduler::{Context, Step, Task};
use crate::timer::{Timer, TimerBank, TimerError};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BrakeConfig {
    /// Half-period of the bus-idle failsafe flash.
    pub failsafe_ms: u32,
    /// Length of one reminder pulse.
    pub reminder_pulse_ms: u32,
    /// Dark time between reminder pulse pairs.
    pub reminder_gap_ms: u32,
    /// Half-period of the attention flash.
    pub attention_ms: u32,
    /// Full left/right cycles in one attention flash.
    pub attention_cycles: u8,
    /// Released time after which the next application gets the attention flash.
    pub attention_idle_ms: u32,
    pub full_duty: u8,
    /// Duty while the headlights are requested.
    pub dimmed_duty: u8,
    pub left: Pin,
    pub right: Pin,
}

impl BrakeConfig {
    pub const DEFAULT: Self = Self {
        failsafe_ms: 500,
        reminder_pulse_ms: 250,
        reminder_gap_ms: 4000,
        attention_ms: 250,
        attention_cycles: 3,
        attention_idle_ms: 4000,
        full_duty: 100,
        dimmed_duty: 80,
        left: Pin::Out4,
        right: Pin::Out3,
    };
}

impl Default for BrakeConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Coarse view of what the controller is doing, for tests and the emulator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BrakeMode {
    Entry,
    Failsafe,
    Reminder,
    Released,
    Attention,
    Applied,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Phase {
    Entry,
    Decide,
    Failsafe,
    ReminderPulse,
    ReminderGap,
    AwaitApply,
    Attention { remaining: u8 },
    AttentionHold { remaining: u8 },
    Applied,
}

pub struct BrakeLights {
    config: BrakeConfig,
    flash_timer: Timer,
    /// Runs while the pedal is released; survives restarts.
    idle_timer: Timer,
    phase: Phase,
    flash: bool,
    duty: u8,
}

impl BrakeLights {
    pub fn new(timers: &TimerBank, config: BrakeConfig) -> Result<Self, TimerError> {
        Ok(Self {
            config,
            flash_timer: timers.register()?,
            idle_timer: timers.register()?,
            phase: Phase::Entry,
            flash: false,
            duty: config.full_duty,
        })
    }

    pub const fn mode(&self) -> BrakeMode {
        match self.phase {
            Phase::Entry | Phase::Decide => BrakeMode::Entry,
            Phase::Failsafe => BrakeMode::Failsafe,
            Phase::ReminderPulse | Phase::ReminderGap => BrakeMode::Reminder,
            Phase::AwaitApply => BrakeMode::Released,
            Phase::Attention { .. } | Phase::AttentionHold { .. } => BrakeMode::Attention,
            Phase::Applied => BrakeMode::Applied,
        }
    }

    fn reminder_active<H: ?Sized>(cx: &Context<'_, H>) -> bool {
        !cx.state.bus.engine_running && !cx.state.bus.brake_applied
    }

    fn both<H: Io + ?Sized>(&self, cx: &mut Context<'_, H>, duty: u8) {
        cx.io.set_duty(self.config.left, duty);
        cx.io.set_duty(self.config.right, duty);
    }

    /// Lights one side at `duty` and darkens the other, then flips sides.
    fn alternate<H: Io + ?Sized>(&mut self, cx: &mut Context<'_, H>, duty: u8, hold_ms: u32) {
        let (left, right) = if self.flash { (duty, 0) } else { (0, duty) };
        cx.io.set_duty(self.config.left, left);
        cx.io.set_duty(self.config.right, right);
        self.flash = !self.flash;
        cx.timers.reset(self.flash_timer, hold_ms);
    }
}

impl<H: Io + ?Sized> Task<H> for BrakeLights {
    fn name(&self) -> &'static str {
        "brake"
    }

    fn resume(&mut self, cx: &mut Context<'_, H>) -> Step {
        let config = self.config;

        // Bus loss pre-empts everything except the failsafe itself.
        let preemptible = !matches!(self.phase, Phase::Entry | Phase::Decide | Phase::Failsafe);
        if cx.state.bus.can_idle && preemptible {
            self.phase = Phase::Decide;
        }

        loop {
            match self.phase {
                Phase::Entry => {
                    self.both(cx, 0);
                    self.flash = false;
                    self.phase = Phase::Decide;
                }
                Phase::Decide => {
                    if cx.state.bus.can_idle {
                        self.alternate(cx, config.full_duty, config.failsafe_ms);
                        self.phase = Phase::Failsafe;
                        return Step::Blocked;
                    }
                    if Self::reminder_active(cx) {
                        self.alternate(cx, config.full_duty, config.reminder_pulse_ms);
                        self.phase = Phase::ReminderPulse;
                        return Step::Blocked;
                    }
                    self.both(cx, 0);
                    self.phase = Phase::AwaitApply;
                }
                Phase::Failsafe => {
                    if !cx.timers.expired(self.flash_timer) {
                        return Step::Blocked;
                    }
                    self.phase = Phase::Decide;
                }
                Phase::ReminderPulse => {
                    if !Self::reminder_active(cx) {
                        self.phase = Phase::Decide;
                        continue;
                    }
                    if !cx.timers.expired(self.flash_timer) {
                        return Step::Blocked;
                    }
                    if self.flash {
                        // Right pulse done; dark until the next pair.
                        cx.io.set_duty(config.right, 0);
                        cx.timers.reset(self.flash_timer, config.reminder_gap_ms);
                        self.phase = Phase::ReminderGap;
                        return Step::Blocked;
                    }
                    self.phase = Phase::Decide;
                }
                Phase::ReminderGap => {
                    if Self::reminder_active(cx) && !cx.timers.expired(self.flash_timer) {
                        return Step::Blocked;
                    }
                    self.phase = Phase::Decide;
                }
                Phase::AwaitApply => {
                    if Self::reminder_active(cx) {
                        self.phase = Phase::Decide;
                        continue;
                    }
                    if !cx.state.bus.brake_applied {
                        return Step::Blocked;
                    }
                    self.duty = if cx.state.bus.lights_requested {
                        config.dimmed_duty
                    } else {
                        config.full_duty
                    };
                    if cx.timers.expired(self.idle_timer) {
                        self.flash = false;
                        self.phase = Phase::Attention {
                            remaining: config.attention_cycles.saturating_mul(2),
                        };
                    } else {
                        self.both(cx, self.duty);
                        self.phase = Phase::Applied;
                    }
                }
                Phase::Attention { remaining: 0 } => {
                    self.both(cx, self.duty);
                    self.phase = Phase::Applied;
                }
                Phase::Attention { remaining } => {
                    self.alternate(cx, self.duty, config.attention_ms);
                    self.phase = Phase::AttentionHold { remaining };
                    return Step::Blocked;
                }
                Phase::AttentionHold { remaining } => {
                    if !cx.timers.expired(self.flash_timer) {
                        return Step::Blocked;
                    }
                    self.phase = Phase::Attention {
                        remaining: remaining - 1,
                    };
                }
                Phase::Applied => {
                    if cx.state.bus.brake_applied {
                        return Step::Blocked;
                    }
                    cx.timers.reset(self.idle_timer, config.attention_idle_ms);
                    return Step::Restart;
                }
            }
        }
    }

    fn restart(&mut self) {
        self.phase = Phase::Entry;
    }
}
