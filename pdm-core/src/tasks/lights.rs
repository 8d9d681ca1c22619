//! Lighting: the tail unit mirrors requests onto its lamps, the head unit
//! reports its confirmed lighting state to the bus.

use crate::can::{ids, lighting_payload};
use crate::hal::{CanFrame, Io, Pin};
use crate::scheduler::{Context, Step, Task};
use crate::state::LightStatus;
use crate::telemetry::TelemetryEvent;
use crate::timer::{Timer, TimerBank, TimerError};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MirrorConfig {
    pub tail: Pin,
    pub tail_duty: u8,
    pub reverse: Option<Pin>,
    /// Rain light, when the loom has one fitted.
    pub rain: Option<Pin>,
    pub rain_flash_ms: u32,
}

impl MirrorConfig {
    pub const DEFAULT: Self = Self {
        tail: Pin::Out2,
        tail_duty: 100,
        reverse: Some(Pin::Out1),
        rain: None,
        rain_flash_ms: 125,
    };
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Phase {
    Entry,
    Run,
}

/// Drives tail, reverse, and rain lamps from the requested lighting state.
pub struct LightMirror {
    config: MirrorConfig,
    rain_timer: Timer,
    phase: Phase,
}

impl LightMirror {
    pub fn new(timers: &TimerBank, config: MirrorConfig) -> Result<Self, TimerError> {
        Ok(Self {
            config,
            rain_timer: timers.register()?,
            phase: Phase::Entry,
        })
    }

    fn outputs(&self) -> impl Iterator<Item = Pin> {
        [Some(self.config.tail), self.config.reverse, self.config.rain]
            .into_iter()
            .flatten()
    }
}

impl<H: Io + ?Sized> Task<H> for LightMirror {
    fn name(&self) -> &'static str {
        "lights"
    }

    fn resume(&mut self, cx: &mut Context<'_, H>) -> Step {
        let config = self.config;
        if self.phase == Phase::Entry {
            for pin in self.outputs() {
                cx.io.set(pin, false);
            }
            cx.state.lights = LightStatus::default();
            self.phase = Phase::Run;
        }

        let bus = cx.state.bus;
        let lights = &mut cx.state.lights;

        if lights.lights_on != bus.lights_requested {
            let duty = if bus.lights_requested { config.tail_duty } else { 0 };
            cx.io.set_duty(config.tail, duty);
            lights.lights_on = bus.lights_requested;
        }

        if let Some(pin) = config.reverse
            && lights.reverse_on != bus.reverse_requested
        {
            cx.io.set(pin, bus.reverse_requested);
            lights.reverse_on = bus.reverse_requested;
        }

        if let Some(pin) = config.rain {
            if bus.rain_requested {
                if cx.timers.expired(self.rain_timer) {
                    cx.timers.reset(self.rain_timer, config.rain_flash_ms);
                    lights.rain_on = !lights.rain_on;
                    cx.io.set(pin, lights.rain_on);
                }
            } else if lights.rain_on {
                cx.io.set(pin, false);
                lights.rain_on = false;
            }
        }

        Step::Yielded
    }

    fn restart(&mut self) {
        self.phase = Phase::Entry;
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ReporterConfig {
    pub interval_ms: u32,
}

impl ReporterConfig {
    pub const DEFAULT: Self = Self { interval_ms: 250 };
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Broadcasts the head unit's lighting state.
pub struct LightReporter {
    config: ReporterConfig,
    timer: Timer,
}

impl LightReporter {
    pub fn new(timers: &TimerBank, config: ReporterConfig) -> Result<Self, TimerError> {
        Ok(Self {
            config,
            timer: timers.register()?,
        })
    }
}

impl<H: Io + ?Sized> Task<H> for LightReporter {
    fn name(&self) -> &'static str {
        "light-report"
    }

    fn resume(&mut self, cx: &mut Context<'_, H>) -> Step {
        if !cx.timers.expired(self.timer) {
            return Step::Blocked;
        }
        cx.timers.reload(self.timer, self.config.interval_ms);

        let lights = cx.state.lights;
        let payload = lighting_payload(lights.lights_on, lights.rain_on);
        let Ok(frame) = CanFrame::new(ids::LIGHTING, &payload) else {
            return Step::Blocked;
        };
        if cx.io.try_send(&frame).is_err() {
            cx.record(TelemetryEvent::FrameDropped(ids::LIGHTING));
        }
        Step::Blocked
    }

    fn restart(&mut self) {}
}
