#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! The [`Io`](pdm_core::hal::Io) bundle handed to the board each pass.

use heapless::Deque;
use pdm_core::hal::{CanFrame, CanTx, Input, KeyColor, KeyEvent, Keypad, Pin, Pins, SendError};

use crate::bus::QueuedTx;

/// Keys tracked by the mailbox.
pub const KEY_SLOTS: usize = 12;

const EVENT_DEPTH: usize = 8;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct KeyLed {
    pub color: KeyColor,
    pub pattern: u8,
}

/// Hand-off point between a keypad decoder and the keypad consumers.
///
/// Until a decoder posts an event the keypad reads as disconnected, so the
/// start key can never read as held.
pub struct KeypadMailbox {
    connected: bool,
    events: Deque<(u8, KeyEvent), EVENT_DEPTH>,
    latest: [KeyEvent; KEY_SLOTS],
    leds: [KeyLed; KEY_SLOTS],
}

impl KeypadMailbox {
    pub const fn new() -> Self {
        Self {
            connected: false,
            events: Deque::new(),
            latest: [KeyEvent::None; KEY_SLOTS],
            leds: [KeyLed {
                color: KeyColor::Off,
                pattern: 0,
            }; KEY_SLOTS],
        }
    }

    /// Queues a decoded event. The oldest event is dropped when the queue
    /// is full; the per-key latest value is always updated.
    pub fn post(&mut self, key: u8, event: KeyEvent) {
        self.connected = event != KeyEvent::Disconnected;
        if let Some(slot) = self.latest.get_mut(usize::from(key)) {
            *slot = event;
        }
        if self.events.is_full() {
            self.events.pop_front();
        }
        let _ = self.events.push_back((key, event));
    }

    /// Indicator last requested for `key`, for the decoder to transmit.
    pub fn led(&self, key: u8) -> Option<KeyLed> {
        self.leds.get(usize::from(key)).copied()
    }
}

impl Default for KeypadMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Keypad for KeypadMailbox {
    fn next_event(&mut self) -> Option<(u8, KeyEvent)> {
        self.events.pop_front()
    }

    fn key_event(&mut self, key: u8) -> KeyEvent {
        if !self.connected {
            return KeyEvent::Disconnected;
        }
        self.latest
            .get_mut(usize::from(key))
            .map_or(KeyEvent::Disconnected, |latest| {
                core::mem::replace(latest, KeyEvent::None)
            })
    }

    fn set_key_led(&mut self, key: u8, color: KeyColor, pattern: u8) {
        if let Some(led) = self.leds.get_mut(usize::from(key)) {
            *led = KeyLed { color, pattern };
        }
    }
}

/// Board pins, the queued transmit path, and the keypad mailbox.
pub struct FirmwareIo<'a, P> {
    pins: P,
    tx: QueuedTx<'a>,
    keypad: KeypadMailbox,
}

impl<'a, P: Pins> FirmwareIo<'a, P> {
    pub const fn new(pins: P, tx: QueuedTx<'a>) -> Self {
        Self {
            pins,
            tx,
            keypad: KeypadMailbox::new(),
        }
    }

    /// Pushes parked frames toward the peripheral; returns what is still
    /// parked.
    pub fn flush(&mut self) -> usize {
        self.tx.flush();
        self.tx.backlog_len()
    }

    pub fn keypad_mut(&mut self) -> &mut KeypadMailbox {
        &mut self.keypad
    }
}

impl<P: Pins> Pins for FirmwareIo<'_, P> {
    fn set(&mut self, pin: Pin, on: bool) {
        self.pins.set(pin, on);
    }

    fn set_duty(&mut self, pin: Pin, percent: u8) {
        self.pins.set_duty(pin, percent.min(100));
    }

    fn millivolts(&mut self, input: Input) -> u16 {
        self.pins.millivolts(input)
    }
}

impl<P> CanTx for FirmwareIo<'_, P> {
    fn try_send(&mut self, frame: &CanFrame) -> Result<(), SendError> {
        self.tx.try_send(frame)
    }

    fn send_blocking(&mut self, frame: &CanFrame) {
        self.tx.send_blocking(frame);
    }

    fn send_debug(&mut self, frame: &CanFrame) {
        self.tx.send_debug(frame);
    }
}

impl<P> Keypad for FirmwareIo<'_, P> {
    fn next_event(&mut self) -> Option<(u8, KeyEvent)> {
        self.keypad.next_event()
    }

    fn key_event(&mut self, key: u8) -> KeyEvent {
        self.keypad.key_event(key)
    }

    fn set_key_led(&mut self, key: u8, color: KeyColor, pattern: u8) {
        self.keypad.set_key_led(key, color, pattern);
    }
}
