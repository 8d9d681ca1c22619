//! Narrow hardware contracts consumed by the control logic.
//!
//! Boards wire these traits to real peripherals (see the firmware crate) or
//! to [`crate::sim::SimIo`] for host-side tests and the emulator.

use core::fmt;

/// Maximum CAN classic payload.
pub const CAN_MAX_LEN: usize = 8;

/// Switchable board outputs and control lines.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pin {
    Out1,
    Out2,
    Out3,
    Out4,
    /// Pull-up on the kill input; required for the kill line to read correctly.
    KillPullUp,
    /// Holds the module powered after ignition-sense drops.
    PowerHold,
    /// CAN transceiver standby-suppress; low lets the transceiver sleep.
    CanWake,
}

impl Pin {
    /// Every pin, in index order.
    pub const ALL: [Pin; 7] = [
        Pin::Out1,
        Pin::Out2,
        Pin::Out3,
        Pin::Out4,
        Pin::KillPullUp,
        Pin::PowerHold,
        Pin::CanWake,
    ];

    /// Deterministic index for lookups into [`Pin::ALL`].
    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            Pin::Out1 => 0,
            Pin::Out2 => 1,
            Pin::Out3 => 2,
            Pin::Out4 => 3,
            Pin::KillPullUp => 4,
            Pin::PowerHold => 5,
            Pin::CanWake => 6,
        }
    }
}

/// Analog inputs sampled in millivolts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Input {
    /// Ignition sense.
    Kl15,
    In1,
    In2,
    In3,
}

impl Input {
    pub const ALL: [Input; 4] = [Input::Kl15, Input::In1, Input::In2, Input::In3];

    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            Input::Kl15 => 0,
            Input::In1 => 1,
            Input::In2 => 2,
            Input::In3 => 3,
        }
    }
}

/// Actuator and sensor access.
pub trait Pins {
    fn set(&mut self, pin: Pin, on: bool);

    /// Drives a PWM-capable output; `percent` is clamped to 0..=100.
    fn set_duty(&mut self, pin: Pin, percent: u8);

    fn millivolts(&mut self, input: Input) -> u16;
}

/// Outbound CAN frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanFrame {
    pub id: u16,
    len: u8,
    data: [u8; CAN_MAX_LEN],
}

/// Raised when building a frame from an oversized payload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    TooLong(usize),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::TooLong(len) => write!(f, "payload of {len} bytes exceeds a CAN frame"),
        }
    }
}

impl CanFrame {
    pub fn new(id: u16, payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() > CAN_MAX_LEN {
            return Err(FrameError::TooLong(payload.len()));
        }
        let mut data = [0; CAN_MAX_LEN];
        data[..payload.len()].copy_from_slice(payload);
        #[allow(clippy::cast_possible_truncation)]
        let len = payload.len() as u8;
        Ok(Self { id, len, data })
    }

    /// Builds a full eight byte frame.
    #[must_use]
    pub const fn full(id: u16, data: [u8; CAN_MAX_LEN]) -> Self {
        Self {
            id,
            len: CAN_MAX_LEN as u8,
            data,
        }
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.len)]
    }

    /// Raw eight byte data field, zero padded past `len`.
    #[must_use]
    pub const fn data(&self) -> &[u8; CAN_MAX_LEN] {
        &self.data
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Outcome of a best-effort transmit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendError {
    /// No transmit buffer was free; the frame was dropped.
    BufferFull,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// CAN transmit path.
pub trait CanTx {
    /// Queues the frame if a buffer is free.
    fn try_send(&mut self, frame: &CanFrame) -> Result<(), SendError>;

    /// Waits until the frame is queued. Bounded by the controller's mailbox
    /// turnaround, never by bus traffic of interest.
    fn send_blocking(&mut self, frame: &CanFrame);

    /// Waits until the frame has been transmitted, preserving order among
    /// debug sends.
    fn send_debug(&mut self, frame: &CanFrame);
}

/// Keypad key indicator colours.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KeyColor {
    Off,
    Red,
    Green,
    Blue,
    White,
}

/// Events produced by the external keypad decoder.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KeyEvent {
    None,
    Disconnected,
    Release,
    ShortPress,
    LongPress1,
    LongPress2,
    LongPress3,
}

impl KeyEvent {
    #[must_use]
    pub const fn is_long_press(self) -> bool {
        matches!(
            self,
            KeyEvent::LongPress1 | KeyEvent::LongPress2 | KeyEvent::LongPress3
        )
    }
}

/// Keypad decoder contract. The wire protocol lives outside the core.
pub trait Keypad {
    /// Next event from the shared queue as `(key, event)`; `None` when the
    /// queue is empty. A disconnected keypad reports
    /// [`KeyEvent::Disconnected`].
    fn next_event(&mut self) -> Option<(u8, KeyEvent)>;

    /// Latest event for one key, consumed on read.
    fn key_event(&mut self, key: u8) -> KeyEvent;

    /// Sets a key indicator; `pattern` is an eight-step blink mask (0 = steady).
    fn set_key_led(&mut self, key: u8, color: KeyColor, pattern: u8);
}

/// Everything a task may touch.
pub trait Io: Pins + CanTx + Keypad {}

impl<T: Pins + CanTx + Keypad> Io for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_oversized_payload() {
        assert_eq!(
            CanFrame::new(0x100, &[0; 9]),
            Err(FrameError::TooLong(9))
        );
    }

    #[test]
    fn frame_payload_tracks_length() {
        let frame = CanFrame::new(0x21a, &[0x04, 0x00, 0xf7]).expect("fits");
        assert_eq!(frame.payload(), &[0x04, 0x00, 0xf7]);
        assert_eq!(frame.data()[3..], [0; 5]);
    }
}
