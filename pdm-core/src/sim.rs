//! In-memory board used by host tests and the emulator.
//!
//! [`SimIo`] records every actuator write and transmitted frame so tests can
//! assert on what the control logic did, and exposes setters for the analog
//! inputs and keypad events the logic reads. [`SimEcu`] plays the engine
//! controller on the far side of the diagnostic link.

use heapless::{Deque, Vec};

use crate::can::ids;
use crate::hal::{
    CAN_MAX_LEN, CanFrame, CanTx, Input, KeyColor, KeyEvent, Keypad, Pin, Pins, SendError,
};
use crate::isotp::MAX_PAYLOAD;
use crate::scheduler::{Context, Step, Task};
use crate::state::VehicleState;
use crate::telemetry::TelemetryRecorder;
use crate::timer::TimerBank;

/// Frames retained before the oldest is discarded.
pub const SENT_CAPACITY: usize = 64;

/// Number of keys on the keypad.
pub const KEY_COUNT: usize = 8;

const KEY_QUEUE_DEPTH: usize = 16;
const OUTBOUND_DEPTH: usize = 32;

/// Indicator state of one key.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct KeyLed {
    pub color: KeyColor,
    pub pattern: u8,
}

/// Every actuator a task can drive, captured at one instant.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Outputs {
    pub levels: [bool; Pin::ALL.len()],
    pub duty: [u8; Pin::ALL.len()],
    pub leds: [KeyLed; KEY_COUNT],
}

/// Simulated pins, CAN transmitter, and keypad.
pub struct SimIo {
    levels: [bool; Pin::ALL.len()],
    duty: [u8; Pin::ALL.len()],
    writes: u32,
    millivolts: [u16; Input::ALL.len()],
    sent: Vec<CanFrame, SENT_CAPACITY>,
    outbound: Deque<CanFrame, OUTBOUND_DEPTH>,
    tx_full: bool,
    dropped: u32,
    key_queue: Deque<(u8, KeyEvent), KEY_QUEUE_DEPTH>,
    key_latest: [KeyEvent; KEY_COUNT],
    leds: [KeyLed; KEY_COUNT],
}

impl SimIo {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            levels: [false; Pin::ALL.len()],
            duty: [0; Pin::ALL.len()],
            writes: 0,
            millivolts: [0; Input::ALL.len()],
            sent: Vec::new(),
            outbound: Deque::new(),
            tx_full: false,
            dropped: 0,
            key_queue: Deque::new(),
            key_latest: [KeyEvent::None; KEY_COUNT],
            leds: [KeyLed {
                color: KeyColor::Off,
                pattern: 0,
            }; KEY_COUNT],
        }
    }

    pub fn level(&self, pin: Pin) -> bool {
        self.levels[pin.as_index()]
    }

    pub fn duty(&self, pin: Pin) -> u8 {
        self.duty[pin.as_index()]
    }

    pub fn outputs(&self) -> Outputs {
        Outputs {
            levels: self.levels,
            duty: self.duty,
            leds: self.leds,
        }
    }

    /// Total number of `set`/`set_duty` calls observed.
    pub fn actuator_writes(&self) -> u32 {
        self.writes
    }

    pub fn set_millivolts(&mut self, input: Input, mv: u16) {
        self.millivolts[input.as_index()] = mv;
    }

    /// Frames transmitted so far, oldest first.
    pub fn sent(&self) -> &[CanFrame] {
        &self.sent
    }

    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }

    /// Frames transmitted on `id`, oldest first.
    pub fn sent_with_id(&self, id: u16) -> impl Iterator<Item = &CanFrame> {
        self.sent.iter().filter(move |frame| frame.id == id)
    }

    /// Next transmitted frame not yet collected by a simulated peer.
    pub fn take_outbound(&mut self) -> Option<CanFrame> {
        self.outbound.pop_front()
    }

    /// Makes every best-effort send fail with [`SendError::BufferFull`].
    pub fn set_tx_full(&mut self, full: bool) {
        self.tx_full = full;
    }

    /// Best-effort frames refused while the buffer was full.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Queues a key event as the external decoder would report it.
    pub fn press(&mut self, key: u8, event: KeyEvent) {
        if let Some(latest) = self.key_latest.get_mut(usize::from(key)) {
            *latest = event;
        }
        if self.key_queue.is_full() {
            self.key_queue.pop_front();
        }
        let _ = self.key_queue.push_back((key, event));
    }

    /// Reports a keypad disconnect on every key.
    pub fn disconnect_keypad(&mut self) {
        self.key_latest = [KeyEvent::Disconnected; KEY_COUNT];
        self.key_queue.clear();
        let _ = self.key_queue.push_back((0, KeyEvent::Disconnected));
    }

    pub fn key_led(&self, key: u8) -> KeyLed {
        self.leds[usize::from(key)]
    }

    fn record(&mut self, frame: &CanFrame) {
        if self.sent.is_full() {
            self.sent.remove(0);
        }
        let _ = self.sent.push(*frame);
        if self.outbound.is_full() {
            self.outbound.pop_front();
        }
        let _ = self.outbound.push_back(*frame);
    }
}

impl Default for SimIo {
    fn default() -> Self {
        Self::new()
    }
}

impl Pins for SimIo {
    fn set(&mut self, pin: Pin, on: bool) {
        self.writes = self.writes.wrapping_add(1);
        self.levels[pin.as_index()] = on;
        self.duty[pin.as_index()] = if on { 100 } else { 0 };
    }

    fn set_duty(&mut self, pin: Pin, percent: u8) {
        self.writes = self.writes.wrapping_add(1);
        let percent = percent.min(100);
        self.levels[pin.as_index()] = percent > 0;
        self.duty[pin.as_index()] = percent;
    }

    fn millivolts(&mut self, input: Input) -> u16 {
        self.millivolts[input.as_index()]
    }
}

impl CanTx for SimIo {
    fn try_send(&mut self, frame: &CanFrame) -> Result<(), SendError> {
        if self.tx_full {
            self.dropped = self.dropped.wrapping_add(1);
            return Err(SendError::BufferFull);
        }
        self.record(frame);
        Ok(())
    }

    fn send_blocking(&mut self, frame: &CanFrame) {
        self.record(frame);
    }

    fn send_debug(&mut self, frame: &CanFrame) {
        self.record(frame);
    }
}

impl Keypad for SimIo {
    fn next_event(&mut self) -> Option<(u8, KeyEvent)> {
        self.key_queue.pop_front()
    }

    fn key_event(&mut self, key: u8) -> KeyEvent {
        self.key_latest
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

/// Replies the engine controller queues for one tester frame.
pub type EcuReplies = Vec<CanFrame, 8>;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum EcuPhase {
    Idle,
    /// Collecting a segmented request; bytes still to come.
    Request { remaining: usize },
    /// First frame of the reply sent; waiting for the tester's flow control.
    AwaitFlow,
}

/// Scripted engine controller speaking extended-addressing ISO-TP.
///
/// Feed it every frame the tester transmits; it answers each completed
/// request with the configured reply, segmenting as needed.
pub struct SimEcu {
    address: u8,
    tester: u8,
    reply: Vec<u8, MAX_PAYLOAD>,
    silent: bool,
    phase: EcuPhase,
    request: Vec<u8, MAX_PAYLOAD>,
    requests: u32,
}

impl SimEcu {
    #[must_use]
    pub fn new(address: u8, tester: u8) -> Self {
        Self {
            address,
            tester,
            reply: Vec::new(),
            silent: false,
            phase: EcuPhase::Idle,
            request: Vec::new(),
            requests: 0,
        }
    }

    /// Sets the reply sent for every request. Longer replies are truncated
    /// to the framer's payload limit.
    pub fn set_reply(&mut self, reply: &[u8]) {
        self.reply.clear();
        let len = reply.len().min(MAX_PAYLOAD);
        let _ = self.reply.extend_from_slice(&reply[..len]);
    }

    /// A silent controller ignores all traffic, so every exchange times out.
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
        self.phase = EcuPhase::Idle;
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    /// Last complete request received.
    pub fn last_request(&self) -> &[u8] {
        &self.request
    }

    /// Complete requests received so far.
    pub fn requests(&self) -> u32 {
        self.requests
    }

    fn tx_id(&self) -> u16 {
        ids::ISOTP_FIRST + u16::from(self.address)
    }

    fn frame(&self, pci: &[u8], body: &[u8]) -> CanFrame {
        let mut data = [0; CAN_MAX_LEN];
        data[0] = self.tester;
        data[1..=pci.len()].copy_from_slice(pci);
        let start = 1 + pci.len();
        data[start..start + body.len()].copy_from_slice(body);
        CanFrame::full(self.tx_id(), data)
    }

    /// Handles one frame seen on the bus and returns the controller's answer.
    pub fn on_frame(&mut self, frame: &CanFrame) -> EcuReplies {
        let mut replies = EcuReplies::new();
        let data = frame.data();
        let from_tester = frame.id == ids::ISOTP_FIRST + u16::from(self.tester);
        if self.silent || !from_tester || data[0] != self.address {
            return replies;
        }

        match (data[1] >> 4, self.phase) {
            (0x0, _) => {
                let len = usize::from(data[1] & 0x0f).min(CAN_MAX_LEN - 2);
                self.request.clear();
                let _ = self.request.extend_from_slice(&data[2..2 + len]);
                self.answer(&mut replies);
            }
            (0x1, _) => {
                let len = usize::from(data[1] & 0x0f) << 8 | usize::from(data[2]);
                self.request.clear();
                let _ = self.request.extend_from_slice(&data[3..]);
                self.phase = EcuPhase::Request {
                    remaining: len.saturating_sub(CAN_MAX_LEN - 3),
                };
                let _ = replies.push(self.frame(&[0x30, 0x00, 0x00], &[]));
            }
            (0x2, EcuPhase::Request { remaining }) => {
                let take = remaining.min(CAN_MAX_LEN - 2);
                let _ = self.request.extend_from_slice(&data[2..2 + take]);
                if remaining == take {
                    self.answer(&mut replies);
                } else {
                    self.phase = EcuPhase::Request {
                        remaining: remaining - take,
                    };
                }
            }
            (0x3, EcuPhase::AwaitFlow) => {
                self.phase = EcuPhase::Idle;
                for (index, chunk) in self.reply[CAN_MAX_LEN - 3..]
                    .chunks(CAN_MAX_LEN - 2)
                    .enumerate()
                {
                    #[allow(clippy::cast_possible_truncation)]
                    let seq = ((index + 1) % 16) as u8;
                    let _ = replies.push(self.frame(&[0x20 | seq], chunk));
                }
            }
            _ => {}
        }
        replies
    }

    #[allow(clippy::cast_possible_truncation)]
    fn answer(&mut self, replies: &mut EcuReplies) {
        self.requests = self.requests.wrapping_add(1);
        self.phase = EcuPhase::Idle;
        let len = self.reply.len();
        if len == 0 {
            return;
        }
        if len <= CAN_MAX_LEN - 2 {
            let _ = replies.push(self.frame(&[len as u8], &self.reply));
        } else {
            let pci = [0x10 | (len >> 8) as u8, len as u8];
            let _ = replies.push(self.frame(&pci, &self.reply[..CAN_MAX_LEN - 3]));
            self.phase = EcuPhase::AwaitFlow;
        }
    }
}

/// Everything one task needs to run outside a board: simulated I/O, a
/// timer bank, shared state, and a telemetry ring.
pub struct TaskBench {
    pub io: SimIo,
    pub timers: TimerBank,
    pub state: VehicleState,
    pub telemetry: TelemetryRecorder,
}

impl TaskBench {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            io: SimIo::new(),
            timers: TimerBank::new(),
            state: VehicleState::new(),
            telemetry: TelemetryRecorder::new(),
        }
    }

    pub fn cx(&mut self) -> Context<'_, SimIo> {
        Context {
            io: &mut self.io,
            timers: &self.timers,
            state: &mut self.state,
            telemetry: &mut self.telemetry,
        }
    }

    /// Resumes `task` once without advancing time. A requested restart is
    /// applied the way a task slot would.
    pub fn step<T: Task<SimIo>>(&mut self, task: &mut T) -> Step {
        let step = task.resume(&mut self.cx());
        if step == Step::Restart {
            task.restart();
        }
        step
    }

    /// One resume per millisecond for `ms` milliseconds.
    pub fn run<T: Task<SimIo>>(&mut self, task: &mut T, ms: u32) {
        for _ in 0..ms {
            self.step(task);
            self.timers.tick();
        }
    }
}

impl Default for TaskBench {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duty_implies_level() {
        let mut io = SimIo::new();
        io.set_duty(Pin::Out3, 80);
        assert!(io.level(Pin::Out3));
        io.set_duty(Pin::Out3, 0);
        assert!(!io.level(Pin::Out3));
        assert_eq!(io.actuator_writes(), 2);
    }

    #[test]
    fn full_buffer_drops_best_effort_frames_only() {
        let mut io = SimIo::new();
        io.set_tx_full(true);
        let frame = CanFrame::new(0x21a, &[0]).expect("fits");
        assert_eq!(io.try_send(&frame), Err(SendError::BufferFull));
        io.send_blocking(&frame);
        assert_eq!(io.sent().len(), 1);
        assert_eq!(io.dropped(), 1);
    }

    #[test]
    fn key_events_are_consumed_on_read() {
        let mut io = SimIo::new();
        io.press(7, KeyEvent::LongPress1);
        assert_eq!(io.key_event(7), KeyEvent::LongPress1);
        assert_eq!(io.key_event(7), KeyEvent::None);
        assert_eq!(io.next_event(), Some((7, KeyEvent::LongPress1)));
        assert_eq!(io.next_event(), None);
    }

    #[test]
    fn ecu_answers_a_segmented_request_with_a_segmented_reply() {
        let mut ecu = SimEcu::new(0x12, 0xf1);
        ecu.set_reply(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13]);
        let tester = |data| CanFrame::full(0x6f1, data);

        let flow = ecu.on_frame(&tester([0x12, 0x10, 0x08, 0x2c, 0x10, 0x07, 0x72, 0x07]));
        assert_eq!(flow[0].data(), &[0xf1, 0x30, 0, 0, 0, 0, 0, 0]);

        let first = ecu.on_frame(&tester([0x12, 0x21, 0x6f, 0x04, 0x34, 0, 0, 0]));
        assert_eq!(ecu.last_request(), &[0x2c, 0x10, 0x07, 0x72, 0x07, 0x6f, 0x04, 0x34]);
        assert_eq!(first[0].data(), &[0xf1, 0x10, 0x0d, 1, 2, 3, 4, 5]);

        let rest = ecu.on_frame(&tester([0x12, 0x30, 0, 0, 0, 0, 0, 0]));
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].data(), &[0xf1, 0x21, 6, 7, 8, 9, 10, 11]);
        assert_eq!(rest[1].data(), &[0xf1, 0x22, 12, 13, 0, 0, 0, 0]);
    }

    #[test]
    fn silent_ecu_ignores_requests() {
        let mut ecu = SimEcu::new(0x12, 0xf1);
        ecu.set_reply(&[1, 2]);
        ecu.set_silent(true);
        let request = CanFrame::full(0x6f1, [0x12, 0x02, 0x2c, 0x10, 0, 0, 0, 0]);
        assert!(ecu.on_frame(&request).is_empty());
        assert_eq!(ecu.requests(), 0);
    }
}
