//! Engine starter interlock.
//!
//! The starter relay is energized only while the engine is stopped, the
//! brake is applied, the lever is in park, the post-run cooldown has
//! elapsed, the start switch reads released, and the start key is held.
//! Any violated condition re-runs the checks from the top, which first
//! de-energizes the relay.

use crate::hal::{Io, KeyColor, KeyEvent, Pin};
use crate::scheduler::{Context, Step, Task};
use crate::state::Gear;
use crate::telemetry::TelemetryEvent;
use crate::timer::{Timer, TimerBank, TimerError};

const ENGAGED_PATTERN: u8 = 0xaa;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StarterConfig {
    /// Above this the engine counts as turning.
    pub turning_rpm: u16,
    /// Above this a crank has caught and the relay must drop.
    pub running_rpm: u16,
    /// Cooldown armed whenever the engine is seen turning.
    pub restart_delay_ms: u32,
    /// Start switch input above this level reads as stuck or pressed.
    pub switch_limit_mv: u16,
    pub key: u8,
    pub relay: Pin,
}

impl StarterConfig {
    pub const DEFAULT: Self = Self {
        turning_rpm: 150,
        running_rpm: 500,
        restart_delay_ms: 250,
        switch_limit_mv: 5000,
        key: 7,
        relay: Pin::Out1,
    };
}

impl Default for StarterConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Phase {
    Check,
    Cranking,
}

pub struct Starter {
    config: StarterConfig,
    cooldown: Timer,
    phase: Phase,
}

impl Starter {
    pub fn new(timers: &TimerBank, config: StarterConfig) -> Result<Self, TimerError> {
        Ok(Self {
            config,
            cooldown: timers.register()?,
            phase: Phase::Check,
        })
    }

    pub const fn is_cranking(&self) -> bool {
        matches!(self.phase, Phase::Cranking)
    }

    /// De-energizes the relay and clears the cranking flag.
    pub fn release<H: Io + ?Sized>(&self, cx: &mut Context<'_, H>) {
        cx.io.set(self.config.relay, false);
        cx.state.start.starting = false;
    }

    fn check<H: Io + ?Sized>(&mut self, cx: &mut Context<'_, H>) -> Step {
        let config = self.config;
        self.release(cx);

        if cx.state.bus.engine_rpm > config.turning_rpm {
            cx.timers.reset(self.cooldown, config.restart_delay_ms);
            cx.io.set_key_led(config.key, KeyColor::Off, 0);
            cx.state.start.waiting = true;
            cx.state.start.inhibited = true;
            return Step::Restart;
        }
        cx.state.start.waiting = false;

        let bus = &cx.state.bus;
        let permitted = bus.brake_applied
            && bus.selected_gear == Gear::Park
            && cx.timers.expired(self.cooldown)
            && cx.state.switch_mv <= config.switch_limit_mv;
        if !permitted {
            cx.io.set_key_led(config.key, KeyColor::Red, 0);
            cx.state.start.inhibited = true;
            return Step::Restart;
        }
        cx.state.start.inhibited = false;

        if !cx.io.key_event(config.key).is_long_press() {
            cx.io.set_key_led(config.key, KeyColor::Green, 0);
            return Step::Restart;
        }

        cx.io.set_key_led(config.key, KeyColor::Green, ENGAGED_PATTERN);
        cx.io.set(config.relay, true);
        cx.state.start.starting = true;
        cx.record(TelemetryEvent::StarterEngaged);
        self.phase = Phase::Cranking;
        Step::Yielded
    }

    fn crank<H: Io + ?Sized>(&mut self, cx: &mut Context<'_, H>) -> Step {
        let released = matches!(
            cx.io.key_event(self.config.key),
            KeyEvent::Disconnected | KeyEvent::Release | KeyEvent::ShortPress
        );
        let caught = cx.state.bus.engine_rpm > self.config.running_rpm;
        if caught {
            cx.timers.reset(self.cooldown, self.config.restart_delay_ms);
        }
        if released || caught {
            self.release(cx);
            cx.record(TelemetryEvent::StarterReleased);
            return Step::Restart;
        }
        Step::Yielded
    }
}

impl<H: Io + ?Sized> Task<H> for Starter {
    fn name(&self) -> &'static str {
        "starter"
    }

    fn resume(&mut self, cx: &mut Context<'_, H>) -> Step {
        match self.phase {
            Phase::Check => self.check(cx),
            Phase::Cranking => self.crank(cx),
        }
    }

    fn restart(&mut self) {
        self.phase = Phase::Check;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::Input;
    use crate::sim::TaskBench;

    const KEY: u8 = StarterConfig::DEFAULT.key;
    const RELAY: Pin = StarterConfig::DEFAULT.relay;

    fn ready_bench() -> TaskBench {
        let mut bench = TaskBench::new();
        bench.state.bus.brake_applied = true;
        bench.state.bus.selected_gear = Gear::Park;
        bench
    }

    #[test]
    fn long_press_with_all_interlocks_engages_the_relay() {
        let mut bench = ready_bench();
        let mut starter = Starter::new(&bench.timers, StarterConfig::DEFAULT).expect("timer");

        bench.step(&mut starter);
        assert_eq!(bench.io.key_led(KEY).color, KeyColor::Green);
        assert!(!bench.io.level(RELAY));

        bench.io.press(KEY, KeyEvent::LongPress1);
        bench.step(&mut starter);
        assert!(bench.io.level(RELAY));
        assert!(starter.is_cranking());
        assert!(bench.state.start.starting);
        assert_eq!(bench.io.key_led(KEY).pattern, ENGAGED_PATTERN);
    }

    #[test]
    fn relay_follows_the_interlock_truth_table() {
        for mask in 0u8..16 {
            let brake = mask & 1 != 0;
            let park = mask & 2 != 0;
            let cooled = mask & 4 != 0;
            let switch_ok = mask & 8 != 0;

            let mut bench = TaskBench::new();
            let mut starter = Starter::new(&bench.timers, StarterConfig::DEFAULT).expect("timer");
            if !cooled {
                bench.state.bus.engine_rpm = 200;
                bench.step(&mut starter);
                bench.state.bus.engine_rpm = 0;
            }
            bench.state.bus.brake_applied = brake;
            bench.state.bus.selected_gear = if park { Gear::Park } else { Gear::Drive };
            bench.state.switch_mv = if switch_ok { 0 } else { 6000 };
            bench.io.press(KEY, KeyEvent::LongPress1);
            bench.step(&mut starter);

            assert_eq!(bench.io.level(RELAY), mask == 0b1111, "mask {mask:04b}");
            assert_eq!(bench.state.start.inhibited, mask != 0b1111, "mask {mask:04b}");
        }
    }

    #[test]
    fn inhibited_start_shows_red() {
        let mut bench = ready_bench();
        bench.state.bus.brake_applied = false;
        let mut starter = Starter::new(&bench.timers, StarterConfig::DEFAULT).expect("timer");
        bench.io.press(KEY, KeyEvent::LongPress1);
        bench.step(&mut starter);
        assert_eq!(bench.io.key_led(KEY).color, KeyColor::Red);
        assert!(!bench.io.level(RELAY));
    }

    #[test]
    fn turning_engine_blanks_the_key_and_arms_cooldown() {
        let mut bench = ready_bench();
        let mut starter = Starter::new(&bench.timers, StarterConfig::DEFAULT).expect("timer");
        bench.state.bus.engine_rpm = 800;
        bench.step(&mut starter);
        assert_eq!(bench.io.key_led(KEY).color, KeyColor::Off);
        assert!(bench.state.start.waiting);

        bench.state.bus.engine_rpm = 0;
        bench.run(&mut starter, 100);
        assert!(bench.state.start.inhibited, "cooldown still running");

        bench.run(&mut starter, 200);
        assert!(!bench.state.start.inhibited);
        assert!(!bench.state.start.waiting);
    }

    #[test]
    fn engine_catching_drops_the_relay_in_the_same_pass() {
        let mut bench = ready_bench();
        let mut starter = Starter::new(&bench.timers, StarterConfig::DEFAULT).expect("timer");
        bench.io.press(KEY, KeyEvent::LongPress1);
        bench.step(&mut starter);
        assert!(bench.io.level(RELAY));

        bench.state.bus.engine_rpm = 600;
        assert_eq!(bench.step(&mut starter), Step::Restart);
        assert!(!bench.io.level(RELAY));
        assert!(!bench.timers.expired(starter.cooldown));
        assert!(bench.telemetry.contains(TelemetryEvent::StarterReleased));
    }

    #[test]
    fn releasing_the_key_stops_cranking() {
        let mut bench = ready_bench();
        let mut starter = Starter::new(&bench.timers, StarterConfig::DEFAULT).expect("timer");
        bench.io.press(KEY, KeyEvent::LongPress1);
        bench.step(&mut starter);

        bench.io.press(KEY, KeyEvent::LongPress2);
        bench.step(&mut starter);
        assert!(bench.io.level(RELAY), "still held");

        bench.io.press(KEY, KeyEvent::Release);
        bench.step(&mut starter);
        assert!(!bench.io.level(RELAY));
        assert!(!bench.state.start.starting);
    }

    #[test]
    fn stuck_switch_inhibits() {
        let mut bench = ready_bench();
        bench.io.set_millivolts(Input::In1, 9000);
        bench.state.switch_mv = 9000;
        let mut starter = Starter::new(&bench.timers, StarterConfig::DEFAULT).expect("timer");
        bench.io.press(KEY, KeyEvent::LongPress1);
        bench.step(&mut starter);
        assert!(!bench.io.level(RELAY));
        assert!(bench.state.start.inhibited);
    }
}
