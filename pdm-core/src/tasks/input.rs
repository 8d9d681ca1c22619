//! Switch-signal sampling for the starter interlock.

use crate::hal::{Input, Io};
use crate::scheduler::{Context, Step, Task};
use crate::timer::{Timer, TimerBank, TimerError};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct InputConfig {
    pub input: Input,
    pub interval_ms: u32,
}

impl InputConfig {
    pub const DEFAULT: Self = Self {
        input: Input::In1,
        interval_ms: 50,
    };
}

impl Default for InputConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Phase {
    Entry,
    Wait,
}

/// Copies the switch input into the shared record every interval.
pub struct InputSampler {
    config: InputConfig,
    timer: Timer,
    phase: Phase,
}

impl InputSampler {
    pub fn new(timers: &TimerBank, config: InputConfig) -> Result<Self, TimerError> {
        Ok(Self {
            config,
            timer: timers.register()?,
            phase: Phase::Entry,
        })
    }
}

impl<H: Io + ?Sized> Task<H> for InputSampler {
    fn name(&self) -> &'static str {
        "input"
    }

    fn resume(&mut self, cx: &mut Context<'_, H>) -> Step {
        if self.phase == Phase::Entry {
            cx.timers.reset(self.timer, self.config.interval_ms);
            self.phase = Phase::Wait;
        }
        if !cx.timers.expired(self.timer) {
            return Step::Blocked;
        }
        cx.timers.reload(self.timer, self.config.interval_ms);
        cx.state.switch_mv = cx.io.millivolts(self.config.input);
        Step::Blocked
    }

    fn restart(&mut self) {
        self.phase = Phase::Entry;
    }
}
