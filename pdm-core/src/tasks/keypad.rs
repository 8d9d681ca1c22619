//! Head-unit keypad: lights and rain toggles.

use crate::hal::{Io, KeyColor, KeyEvent};
use crate::scheduler::{Context, Step, Task};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct KeypadConfig {
    pub lights_key: u8,
    pub rain_key: u8,
}

impl KeypadConfig {
    pub const DEFAULT: Self = Self {
        lights_key: 4,
        rain_key: 5,
    };
}

impl Default for KeypadConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Phase {
    Entry,
    Run,
}

pub struct KeypadToggles {
    config: KeypadConfig,
    phase: Phase,
}

impl KeypadToggles {
    pub const fn new(config: KeypadConfig) -> Self {
        Self {
            config,
            phase: Phase::Entry,
        }
    }
}

const fn indicator(on: bool) -> KeyColor {
    if on { KeyColor::Blue } else { KeyColor::White }
}

impl<H: Io + ?Sized> Task<H> for KeypadToggles {
    fn name(&self) -> &'static str {
        "keypad"
    }

    fn resume(&mut self, cx: &mut Context<'_, H>) -> Step {
        let config = self.config;
        if self.phase == Phase::Entry {
            let lights = &cx.state.lights;
            let (lights_on, rain_on) = (lights.lights_on, lights.rain_on);
            cx.io.set_key_led(config.lights_key, indicator(lights_on), 0);
            cx.io.set_key_led(config.rain_key, indicator(rain_on), 0);
            self.phase = Phase::Run;
        }

        match cx.io.next_event() {
            None => {}
            Some((_, KeyEvent::Disconnected)) => cx.state.keypad_active = false,
            Some((key, event)) => {
                cx.state.keypad_active = true;
                if event == KeyEvent::ShortPress {
                    let lights = &mut cx.state.lights;
                    if key == config.lights_key {
                        lights.lights_on = !lights.lights_on;
                        cx.io.set_key_led(key, indicator(lights.lights_on), 0);
                    } else if key == config.rain_key {
                        lights.rain_on = !lights.rain_on;
                        cx.io.set_key_led(key, indicator(lights.rain_on), 0);
                    }
                }
            }
        }
        Step::Yielded
    }

    fn restart(&mut self) {
        self.phase = Phase::Entry;
    }
}
