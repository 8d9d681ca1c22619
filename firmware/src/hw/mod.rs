//! Pin map and peripheral drivers behind the core `Pins` contract.
//!
//! | signal       | pin  | driver        |
//! |--------------|------|---------------|
//! | Out1..Out4   | PA6, PA7, PB0, PB1 | TIM3 CH1..CH4 PWM |
//! | KillPullUp   | PB4  | GPIO          |
//! | PowerHold    | PB5  | GPIO          |
//! | CanWake      | PB6  | GPIO          |
//! | Kl15, In1..3 | PA0, PA1, PA4, PA5 | ADC1 |
//! | FDCAN1       | PA11 RX, PA12 TX | |

use embassy_stm32::Peri;
use embassy_stm32::adc::{Adc, AdcChannel, AnyAdcChannel, SampleTime};
use embassy_stm32::gpio::{Level, Output, OutputType, Speed};
use embassy_stm32::peripherals::{
    ADC1, PA0, PA1, PA4, PA5, PA6, PA7, PB0, PB1, PB4, PB5, PB6, TIM3,
};
use embassy_stm32::time::hz;
use embassy_stm32::timer::Channel;
use embassy_stm32::timer::low_level::CountingMode;
use embassy_stm32::timer::simple_pwm::{PwmPin, SimplePwm};
use pdm_core::hal::{Input, Pin, Pins};

const ADC_FULL_SCALE: u32 = 4095;
const VREF_MV: u32 = 3300;
/// Input conditioning scales the vehicle side down by this ratio.
const DIVIDER_RATIO: u32 = 11;
const LAMP_PWM_HZ: u32 = 200;

/// High-side lamp and relay outputs, all PWM capable.
pub struct LampDrivers<'d> {
    pwm: SimplePwm<'d, TIM3>,
}

impl<'d> LampDrivers<'d> {
    pub fn new(
        tim: Peri<'d, TIM3>,
        out1: Peri<'d, PA6>,
        out2: Peri<'d, PA7>,
        out3: Peri<'d, PB0>,
        out4: Peri<'d, PB1>,
    ) -> Self {
        let mut pwm = SimplePwm::new(
            tim,
            Some(PwmPin::new(out1, OutputType::PushPull)),
            Some(PwmPin::new(out2, OutputType::PushPull)),
            Some(PwmPin::new(out3, OutputType::PushPull)),
            Some(PwmPin::new(out4, OutputType::PushPull)),
            hz(LAMP_PWM_HZ),
            CountingMode::EdgeAlignedUp,
        );
        for channel in [Channel::Ch1, Channel::Ch2, Channel::Ch3, Channel::Ch4] {
            let mut output = pwm.channel(channel);
            output.set_duty_cycle_fully_off();
            output.enable();
        }
        Self { pwm }
    }

    fn set(&mut self, channel: Channel, percent: u8) {
        self.pwm
            .channel(channel)
            .set_duty_cycle_percent(percent.min(100));
    }
}

/// Module housekeeping lines.
pub struct ControlLines<'d> {
    kill_pull_up: Output<'d>,
    power_hold: Output<'d>,
    can_wake: Output<'d>,
}

impl<'d> ControlLines<'d> {
    pub fn new(kill_pull_up: Peri<'d, PB4>, power_hold: Peri<'d, PB5>, can_wake: Peri<'d, PB6>) -> Self {
        Self {
            kill_pull_up: Output::new(kill_pull_up, Level::Low, Speed::Low),
            power_hold: Output::new(power_hold, Level::Low, Speed::Low),
            can_wake: Output::new(can_wake, Level::Low, Speed::Low),
        }
    }

    fn set(&mut self, pin: Pin, on: bool) {
        let line = match pin {
            Pin::KillPullUp => &mut self.kill_pull_up,
            Pin::PowerHold => &mut self.power_hold,
            Pin::CanWake => &mut self.can_wake,
            Pin::Out1 | Pin::Out2 | Pin::Out3 | Pin::Out4 => return,
        };
        line.set_level(Level::from(on));
    }
}

/// Ignition sense and the three analog inputs.
pub struct AnalogInputs<'d> {
    adc: Adc<'d, ADC1>,
    channels: [AnyAdcChannel<ADC1>; 4],
}

impl<'d> AnalogInputs<'d> {
    pub fn new(
        adc: Peri<'d, ADC1>,
        kl15: Peri<'d, PA0>,
        in1: Peri<'d, PA1>,
        in2: Peri<'d, PA4>,
        in3: Peri<'d, PA5>,
    ) -> Self {
        let mut adc = Adc::new(adc);
        adc.set_sample_time(SampleTime::CYCLES79_5);
        Self {
            adc,
            channels: [
                kl15.degrade_adc(),
                in1.degrade_adc(),
                in2.degrade_adc(),
                in3.degrade_adc(),
            ],
        }
    }

    fn read(&mut self, input: Input) -> u16 {
        let raw = self.adc.blocking_read(&mut self.channels[input.as_index()]);
        let millivolts = u32::from(raw) * VREF_MV * DIVIDER_RATIO / ADC_FULL_SCALE;
        u16::try_from(millivolts).unwrap_or(u16::MAX)
    }
}

pub struct BoardPins<'d> {
    lamps: LampDrivers<'d>,
    control: ControlLines<'d>,
    analog: AnalogInputs<'d>,
}

impl<'d> BoardPins<'d> {
    pub fn new(lamps: LampDrivers<'d>, control: ControlLines<'d>, analog: AnalogInputs<'d>) -> Self {
        Self {
            lamps,
            control,
            analog,
        }
    }
}

const fn lamp_channel(pin: Pin) -> Option<Channel> {
    match pin {
        Pin::Out1 => Some(Channel::Ch1),
        Pin::Out2 => Some(Channel::Ch2),
        Pin::Out3 => Some(Channel::Ch3),
        Pin::Out4 => Some(Channel::Ch4),
        Pin::KillPullUp | Pin::PowerHold | Pin::CanWake => None,
    }
}

impl Pins for BoardPins<'_> {
    fn set(&mut self, pin: Pin, on: bool) {
        match lamp_channel(pin) {
            Some(channel) => self.lamps.set(channel, if on { 100 } else { 0 }),
            None => self.control.set(pin, on),
        }
    }

    fn set_duty(&mut self, pin: Pin, percent: u8) {
        match lamp_channel(pin) {
            Some(channel) => self.lamps.set(channel, percent),
            None => self.control.set(pin, percent > 0),
        }
    }

    fn millivolts(&mut self, input: Input) -> u16 {
        self.analog.read(input)
    }
}
