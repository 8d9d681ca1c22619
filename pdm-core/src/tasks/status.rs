//! Periodic status record broadcast.

use crate::hal::{CanFrame, Io};
use crate::scheduler::{Context, Step, Task};
use crate::state::STATUS_LEN;
use crate::timer::{Timer, TimerBank, TimerError};

/// Status identifier of the head unit.
pub const HEAD_STATUS_ID: u16 = 0x780;
/// Status identifier of the tail unit.
pub const TAIL_STATUS_ID: u16 = 0x781;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StatusConfig {
    pub id: u16,
    pub interval_ms: u32,
}

impl StatusConfig {
    pub const HEAD: Self = Self {
        id: HEAD_STATUS_ID,
        interval_ms: 250,
    };

    pub const TAIL: Self = Self {
        id: TAIL_STATUS_ID,
        interval_ms: 250,
    };
}

pub struct StatusReporter {
    config: StatusConfig,
    timer: Timer,
}

impl StatusReporter {
    pub fn new(timers: &TimerBank, config: StatusConfig) -> Result<Self, TimerError> {
        Ok(Self {
            config,
            timer: timers.register()?,
        })
    }
}

impl<H: Io + ?Sized> Task<H> for StatusReporter {
    fn name(&self) -> &'static str {
        "status"
    }

    fn resume(&mut self, cx: &mut Context<'_, H>) -> Step {
        if !cx.timers.expired(self.timer) {
            return Step::Blocked;
        }
        cx.timers.reload(self.timer, self.config.interval_ms);

        let record: [u8; STATUS_LEN] = cx.state.encode();
        if let Ok(frame) = CanFrame::new(self.config.id, &record) {
            cx.io.send_blocking(&frame);
        }
        Step::Blocked
    }

    fn restart(&mut self) {}
}
