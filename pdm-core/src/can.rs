//! Inbound CAN decoding and bus-idle detection.
//!
//! Decoders are pure functions over the eight byte data field; the board
//! modules decide which identifiers they listen to and which fields of
//! [`crate::state::BusSignals`] each one feeds.

use crate::state::Gear;
use crate::timer::{Timer, TimerBank, TimerError};

/// Well-known identifiers on the vehicle bus.
pub mod ids {
    /// Brake pedal status.
    pub const BRAKE: u16 = 0x0a8;
    /// Engine speed.
    pub const ENGINE_SPEED: u16 = 0x0aa;
    /// Gear position and engine status.
    pub const GEAR: u16 = 0x1d2;
    /// Lighting control broadcast.
    pub const LIGHTING: u16 = 0x21a;
    /// Debug enable / disable.
    pub const DEBUG: u16 = 0x7ff;
    /// First identifier of the diagnostic transport window.
    pub const ISOTP_FIRST: u16 = 0x600;
    /// One past the last identifier the diagnostic transport listens to.
    pub const ISOTP_END: u16 = 0x6f0;
}

/// Default window after which the bus is considered idle.
pub const DEFAULT_IDLE_TIMEOUT_MS: u32 = 1000;

/// Upper bound on inbound frames handled per loop pass.
pub const MAX_FRAMES_PER_PASS: usize = 8;

const BRAKE_THRESHOLD: u8 = 20;
const DEBUG_MAGIC: &[u8; 5] = b"debug";

/// Brake pressure above threshold means the pedal is applied.
#[must_use]
pub const fn brake_applied(data: &[u8; 8]) -> bool {
    data[7] > BRAKE_THRESHOLD
}

/// Engine speed in rpm; the raw value counts quarter revolutions.
#[must_use]
pub fn engine_rpm(data: &[u8; 8]) -> u16 {
    u16::from_be_bytes([data[4], data[5]]) / 4
}

/// Gear lever position from byte 0 of the gear message.
#[must_use]
pub const fn selected_gear(data: &[u8; 8]) -> Gear {
    match data[0] {
        0xe1 => Gear::Park,
        0xd2 => Gear::Reverse,
        0xb4 => Gear::Neutral,
        0x78 => Gear::Drive,
        _ => Gear::Unknown,
    }
}

/// Engine running flag carried by the gear message (non-zero above ~64 rpm).
#[must_use]
pub const fn engine_running(data: &[u8; 8]) -> bool {
    data[4] > 0
}

/// Lamp requests carried by the lighting broadcast.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LightingRequest {
    pub lights: bool,
    pub rain: bool,
    pub reverse: bool,
}

#[must_use]
pub const fn lighting_request(data: &[u8; 8]) -> LightingRequest {
    LightingRequest {
        lights: data[0] & 0x04 != 0,
        rain: data[0] & 0x40 != 0,
        reverse: data[1] & 0x01 != 0,
    }
}

/// Encodes the lighting broadcast sent by the head unit.
#[must_use]
pub const fn lighting_payload(lights_on: bool, rain_on: bool) -> [u8; 3] {
    let mut flags = 0;
    if lights_on {
        flags |= 0x04;
    }
    if rain_on {
        flags |= 0x40;
    }
    [flags, 0x00, 0xf7]
}

/// `Some(enabled)` when the frame carries the debug magic.
#[must_use]
pub fn debug_request(data: &[u8; 8]) -> Option<bool> {
    (data[..5] == DEBUG_MAGIC[..]).then_some(data[5] != 0)
}

/// Returns `true` for identifiers inside the diagnostic transport window.
#[must_use]
pub const fn is_isotp(id: u16) -> bool {
    id >= ids::ISOTP_FIRST && id < ids::ISOTP_END
}

/// Tracks whether any frame of interest has arrived within the timeout.
pub struct IdleMonitor {
    timer: Timer,
    timeout_ms: u32,
    idle: bool,
}

impl IdleMonitor {
    /// Starts in the active state with a full timeout window.
    pub fn new(timers: &TimerBank, timeout_ms: u32) -> Result<Self, TimerError> {
        let timer = timers.register()?;
        timers.reset(timer, timeout_ms);
        Ok(Self {
            timer,
            timeout_ms,
            idle: false,
        })
    }

    pub const fn is_idle(&self) -> bool {
        self.idle
    }

    /// Notes an accepted frame. Returns `Some(false)` when this ends an
    /// idle period.
    pub fn activity(&mut self, timers: &TimerBank) -> Option<bool> {
        timers.reset(self.timer, self.timeout_ms);
        if self.idle {
            self.idle = false;
            Some(false)
        } else {
            None
        }
    }

    /// Returns `Some(true)` on the pass the timeout first elapses.
    pub fn poll(&mut self, timers: &TimerBank) -> Option<bool> {
        if !self.idle && timers.expired(self.timer) {
            self.idle = true;
            Some(true)
        } else {
            None
        }
    }
}
