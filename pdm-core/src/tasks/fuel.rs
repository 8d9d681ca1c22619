//! Fuel level sender, tail unit only.

use crate::hal::{CanFrame, Input, Io};
use crate::scheduler::{Context, Step, Task};
use crate::timer::{Timer, TimerBank, TimerError};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FuelConfig {
    pub id: u16,
    pub input: Input,
    pub interval_ms: u32,
    /// Sender millivolts per percent of tank.
    pub mv_per_percent: u16,
}

impl FuelConfig {
    pub const DEFAULT: Self = Self {
        id: 0x710,
        input: Input::In1,
        interval_ms: 1000,
        mv_per_percent: 50,
    };
}

impl Default for FuelConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Tank level in percent, capped at 100.
#[must_use]
pub fn fuel_percent(mv: u16, mv_per_percent: u16) -> u8 {
    let percent = mv.checked_div(mv_per_percent).unwrap_or(0).min(100);
    u8::try_from(percent).unwrap_or(100)
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Phase {
    Entry,
    Wait,
}

pub struct FuelLevel {
    config: FuelConfig,
    timer: Timer,
    phase: Phase,
}

impl FuelLevel {
    pub fn new(timers: &TimerBank, config: FuelConfig) -> Result<Self, TimerError> {
        Ok(Self {
            config,
            timer: timers.register()?,
            phase: Phase::Entry,
        })
    }
}

impl<H: Io + ?Sized> Task<H> for FuelLevel {
    fn name(&self) -> &'static str {
        "fuel"
    }

    fn resume(&mut self, cx: &mut Context<'_, H>) -> Step {
        let config = self.config;
        if self.phase == Phase::Entry {
            cx.timers.reset(self.timer, config.interval_ms);
            self.phase = Phase::Wait;
        }
        if !cx.timers.expired(self.timer) {
            return Step::Blocked;
        }
        cx.timers.reload(self.timer, config.interval_ms);

        let percent = fuel_percent(cx.io.millivolts(config.input), config.mv_per_percent);
        if let Ok(frame) = CanFrame::new(config.id, &[percent]) {
            cx.io.send_blocking(&frame);
        }
        Step::Blocked
    }

    fn restart(&mut self) {
        self.phase = Phase::Entry;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::TaskBench;

    #[test]
    fn percent_is_scaled_and_capped() {
        assert_eq!(fuel_percent(0, 50), 0);
        assert_eq!(fuel_percent(2500, 50), 50);
        assert_eq!(fuel_percent(12_000, 50), 100);
        assert_eq!(fuel_percent(1000, 0), 0);
    }

    #[test]
    fn reports_once_per_second() {
        let mut bench = TaskBench::new();
        let mut fuel = FuelLevel::new(&bench.timers, FuelConfig::DEFAULT).expect("timer");
        bench.io.set_millivolts(Input::In1, 3000);

        bench.run(&mut fuel, 3001);
        let frames: heapless::Vec<CanFrame, 4> = bench.io.sent_with_id(0x710).copied().collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].payload(), &[60]);
    }
}
