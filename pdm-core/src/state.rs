//! Shared vehicle state and its diagnostic wire layout.
//!
//! The record is split by writer: [`BusSignals`] is only written by the CAN
//! receive path, [`LightStatus`] by whichever task owns the lamps on that
//! board (keypad logic on the head unit, lighting mirror on the tail unit),
//! [`StartStatus`] by the starter interlock. Tasks receive the whole
//! record through [`crate::scheduler::Context`] and must only write the part
//! they own.

use core::fmt;

/// Length of the encoded status record.
pub const STATUS_LEN: usize = 7;

/// Selected transmission position decoded from the gear-position message.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Gear {
    Park,
    Reverse,
    Neutral,
    Drive,
    /// A gear frame arrived with an unrecognised position.
    Unknown,
    /// No gear frame has been seen yet.
    #[default]
    NotReported,
}

impl Gear {
    /// ASCII code used on the wire and in rebroadcast frames.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Gear::Park => b'P',
            Gear::Reverse => b'R',
            Gear::Neutral => b'N',
            Gear::Drive => b'D',
            Gear::Unknown => b'?',
            Gear::NotReported => 0,
        }
    }

    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            b'P' => Gear::Park,
            b'R' => Gear::Reverse,
            b'N' => Gear::Neutral,
            b'D' => Gear::Drive,
            0 => Gear::NotReported,
            _ => Gear::Unknown,
        }
    }
}

impl fmt::Display for Gear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gear::NotReported => f.write_str("-"),
            gear => write!(f, "{}", char::from(gear.code())),
        }
    }
}

/// Signals derived from inbound CAN traffic.
#[allow(clippy::struct_excessive_bools)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusSignals {
    pub engine_rpm: u16,
    pub engine_running: bool,
    pub selected_gear: Gear,
    pub brake_applied: bool,
    pub lights_requested: bool,
    pub rain_requested: bool,
    pub reverse_requested: bool,
    pub can_idle: bool,
    pub debug_enable: bool,
}

/// Actuator-confirmed lighting state.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LightStatus {
    pub lights_on: bool,
    pub rain_on: bool,
    pub reverse_on: bool,
}

/// Starter interlock flags.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StartStatus {
    pub inhibited: bool,
    pub waiting: bool,
    pub starting: bool,
}

/// Process-wide vehicle record.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VehicleState {
    pub bus: BusSignals,
    pub lights: LightStatus,
    pub start: StartStatus,
    /// Written by the keypad task.
    pub keypad_active: bool,
    /// Switch-signal sample in millivolts, written by the input sampler.
    pub switch_mv: u16,
}

mod flags {
    pub const BRAKE_APPLIED: u8 = 1 << 0;
    pub const LIGHTS_ON: u8 = 1 << 1;
    pub const RAIN_ON: u8 = 1 << 2;
    pub const CAN_IDLE: u8 = 1 << 3;
    pub const KEYPAD_ACTIVE: u8 = 1 << 4;
    pub const START_INHIBITED: u8 = 1 << 5;
    pub const START_WAITING: u8 = 1 << 6;
    pub const STARTING: u8 = 1 << 7;

    pub const DEBUG_ENABLE: u8 = 1 << 0;
    pub const LIGHTS_REQUESTED: u8 = 1 << 1;
    pub const RAIN_REQUESTED: u8 = 1 << 2;
    pub const REVERSE_ON: u8 = 1 << 3;
    pub const REVERSE_REQUESTED: u8 = 1 << 4;
    pub const ENGINE_RUNNING: u8 = 1 << 5;
}

const fn bit(set: bool, mask: u8) -> u8 {
    if set { mask } else { 0 }
}

impl VehicleState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bus: BusSignals {
                engine_rpm: 0,
                engine_running: false,
                selected_gear: Gear::NotReported,
                brake_applied: false,
                lights_requested: false,
                rain_requested: false,
                reverse_requested: false,
                can_idle: false,
                debug_enable: false,
            },
            lights: LightStatus {
                lights_on: false,
                rain_on: false,
                reverse_on: false,
            },
            start: StartStatus {
                inhibited: false,
                waiting: false,
                starting: false,
            },
            keypad_active: false,
            switch_mv: 0,
        }
    }

    /// Packs the record into the status frame payload.
    #[must_use]
    pub fn encode(&self) -> [u8; STATUS_LEN] {
        let bus = &self.bus;
        let [rpm_hi, rpm_lo] = bus.engine_rpm.to_be_bytes();
        let [mv_hi, mv_lo] = self.switch_mv.to_be_bytes();

        let primary = bit(bus.brake_applied, flags::BRAKE_APPLIED)
            | bit(self.lights.lights_on, flags::LIGHTS_ON)
            | bit(self.lights.rain_on, flags::RAIN_ON)
            | bit(bus.can_idle, flags::CAN_IDLE)
            | bit(self.keypad_active, flags::KEYPAD_ACTIVE)
            | bit(self.start.inhibited, flags::START_INHIBITED)
            | bit(self.start.waiting, flags::START_WAITING)
            | bit(self.start.starting, flags::STARTING);

        let secondary = bit(bus.debug_enable, flags::DEBUG_ENABLE)
            | bit(bus.lights_requested, flags::LIGHTS_REQUESTED)
            | bit(bus.rain_requested, flags::RAIN_REQUESTED)
            | bit(self.lights.reverse_on, flags::REVERSE_ON)
            | bit(bus.reverse_requested, flags::REVERSE_REQUESTED)
            | bit(bus.engine_running, flags::ENGINE_RUNNING);

        [
            rpm_hi,
            rpm_lo,
            bus.selected_gear.code(),
            primary,
            secondary,
            mv_hi,
            mv_lo,
        ]
    }

    /// Inverse of [`VehicleState::encode`].
    #[must_use]
    pub fn decode(bytes: &[u8; STATUS_LEN]) -> Self {
        let primary = bytes[3];
        let secondary = bytes[4];
        Self {
            bus: BusSignals {
                engine_rpm: u16::from_be_bytes([bytes[0], bytes[1]]),
                engine_running: secondary & flags::ENGINE_RUNNING != 0,
                selected_gear: Gear::from_code(bytes[2]),
                brake_applied: primary & flags::BRAKE_APPLIED != 0,
                lights_requested: secondary & flags::LIGHTS_REQUESTED != 0,
                rain_requested: secondary & flags::RAIN_REQUESTED != 0,
                reverse_requested: secondary & flags::REVERSE_REQUESTED != 0,
                can_idle: primary & flags::CAN_IDLE != 0,
                debug_enable: secondary & flags::DEBUG_ENABLE != 0,
            },
            lights: LightStatus {
                lights_on: primary & flags::LIGHTS_ON != 0,
                rain_on: primary & flags::RAIN_ON != 0,
                reverse_on: secondary & flags::REVERSE_ON != 0,
            },
            start: StartStatus {
                inhibited: primary & flags::START_INHIBITED != 0,
                waiting: primary & flags::START_WAITING != 0,
                starting: primary & flags::STARTING != 0,
            },
            keypad_active: primary & flags::KEYPAD_ACTIVE != 0,
            switch_mv: u16::from_be_bytes([bytes[5], bytes[6]]),
        }
    }
}
