//! ISO-TP framer using extended addressing.
//!
//! Each node transmits on `0x600 + own address` and puts the peer's address
//! in byte 0, so a PCI byte sits at offset 1 and frames carry at most six
//! payload bytes (five in a first frame). The framer is fully poll driven:
//! inbound frames are handed to [`DiagnosticLink::accept`] from the receive
//! path, and [`DiagnosticLink::poll`] emits at most one outbound frame per
//! direction per call so the control loop never waits on the bus.

use core::fmt;

use heapless::Vec;

use crate::can::ids;
use crate::hal::{CAN_MAX_LEN, CanFrame, CanTx};
use crate::timer::{Timer, TimerBank, TimerError};

/// Largest message either direction can carry.
pub const MAX_PAYLOAD: usize = 32;

const PCI_SINGLE: u8 = 0x00;
const PCI_FIRST: u8 = 0x10;
const PCI_CONSECUTIVE: u8 = 0x20;
const PCI_FLOW: u8 = 0x30;

const FLOW_CONTINUE: u8 = 0x0;
const FLOW_WAIT: u8 = 0x1;
const FLOW_OVERFLOW: u8 = 0x2;

const SINGLE_MAX: usize = CAN_MAX_LEN - 2;
const FIRST_DATA: usize = CAN_MAX_LEN - 3;
const CONSECUTIVE_DATA: usize = CAN_MAX_LEN - 2;

/// Transfer failures.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// The peer did not answer within the timeout.
    Timeout,
    /// The peer announced a length other than the one expected.
    UnexpectedLength,
    /// The peer's flow control reported a receive overflow.
    FlowControlOverflow,
    /// A consecutive frame arrived out of order.
    SequenceError,
    /// Message larger than [`MAX_PAYLOAD`].
    PayloadTooLong,
    /// Completion was polled without a receive in progress.
    NotArmed,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Receive completion, polled once per pass.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecvStatus {
    Success,
    Busy,
    Failure(LinkError),
}

/// Segmented request/response transport used by the diagnostic scanner.
pub trait DiagnosticLink {
    /// Returns `true` for identifiers this link consumes.
    fn accepts(&self, id: u16) -> bool;

    /// Feeds one inbound frame. Returns `true` if the frame belonged to a
    /// transfer in progress.
    fn accept(&mut self, timers: &TimerBank, frame: &CanFrame) -> bool;

    /// Arms the receive side: expect exactly `len` bytes from `sender`
    /// within `timeout_ms`.
    fn recv_start(&mut self, timers: &TimerBank, len: usize, sender: u8, timeout_ms: u32);

    /// Queues `payload` for `peer`. Transmission happens from [`poll`].
    ///
    /// [`poll`]: DiagnosticLink::poll
    fn send(
        &mut self,
        timers: &TimerBank,
        peer: u8,
        payload: &[u8],
        timeout_ms: u32,
    ) -> Result<(), LinkError>;

    /// Advances timeouts and emits pending frames, one per direction.
    fn poll<H: CanTx + ?Sized>(&mut self, io: &mut H, timers: &TimerBank);

    fn recv_done(&self) -> RecvStatus;

    /// Payload of the last completed receive.
    fn received(&self) -> &[u8];

    /// Drops any transfer in progress.
    fn abort(&mut self);
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum TxState {
    Idle,
    Single,
    First,
    AwaitFlow,
    Consecutive { block_left: Option<u8> },
    Done,
    Failed(LinkError),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum RxState {
    Idle,
    AwaitFirst,
    Consecutive { next_seq: u8 },
    Complete,
    Failed(LinkError),
}

/// Extended-addressing ISO-TP endpoint.
pub struct IsoTp {
    address: u8,

    tx: Vec<u8, MAX_PAYLOAD>,
    tx_peer: u8,
    tx_offset: usize,
    tx_seq: u8,
    tx_state: TxState,
    tx_timeout_ms: u32,
    tx_timer: Timer,
    gap_timer: Timer,
    st_min_ms: u32,

    rx: Vec<u8, MAX_PAYLOAD>,
    rx_expected: usize,
    rx_sender: u8,
    rx_state: RxState,
    rx_timeout_ms: u32,
    rx_timer: Timer,
    flow_reply: Option<u8>,
}

impl IsoTp {
    /// Creates an endpoint transmitting as `address`.
    pub fn new(timers: &TimerBank, address: u8) -> Result<Self, TimerError> {
        Ok(Self {
            address,
            tx: Vec::new(),
            tx_peer: 0,
            tx_offset: 0,
            tx_seq: 0,
            tx_state: TxState::Idle,
            tx_timeout_ms: 0,
            tx_timer: timers.register()?,
            gap_timer: timers.register()?,
            st_min_ms: 0,
            rx: Vec::new(),
            rx_expected: 0,
            rx_sender: 0,
            rx_state: RxState::Idle,
            rx_timeout_ms: 0,
            rx_timer: timers.register()?,
            flow_reply: None,
        })
    }

    /// Identifier this endpoint transmits on.
    #[must_use]
    pub const fn tx_id(&self) -> u16 {
        ids::ISOTP_FIRST + self.address as u16
    }

    /// Returns `true` once the last queued message has gone out completely.
    pub fn send_done(&self) -> bool {
        self.tx_state == TxState::Done
    }

    fn frame(&self, peer: u8, pci: &[u8], body: &[u8]) -> CanFrame {
        let mut data = [0; CAN_MAX_LEN];
        data[0] = peer;
        let start = 1 + pci.len();
        data[1..start].copy_from_slice(pci);
        data[start..start + body.len()].copy_from_slice(body);
        CanFrame::full(self.tx_id(), data)
    }

    fn on_flow_control(&mut self, timers: &TimerBank, data: &[u8; CAN_MAX_LEN]) {
        if self.tx_state != TxState::AwaitFlow {
            return;
        }
        match data[1] & 0x0f {
            FLOW_CONTINUE => {
                let block_size = data[2];
                self.st_min_ms = st_min_ms(data[3]);
                self.tx_state = TxState::Consecutive {
                    block_left: (block_size != 0).then_some(block_size),
                };
                timers.reset(self.gap_timer, 0);
            }
            FLOW_WAIT => timers.reset(self.tx_timer, self.tx_timeout_ms),
            FLOW_OVERFLOW => self.tx_state = TxState::Failed(LinkError::FlowControlOverflow),
            _ => {}
        }
    }

    fn on_data(&mut self, timers: &TimerBank, data: &[u8; CAN_MAX_LEN]) -> bool {
        let pci = data[1] & 0xf0;
        match (self.rx_state, pci) {
            (RxState::AwaitFirst, PCI_SINGLE) => {
                let len = usize::from(data[1] & 0x0f);
                if len != self.rx_expected || len > SINGLE_MAX {
                    self.rx_state = RxState::Failed(LinkError::UnexpectedLength);
                } else {
                    self.rx.clear();
                    let _ = self.rx.extend_from_slice(&data[2..2 + len]);
                    self.rx_state = RxState::Complete;
                }
                true
            }
            (RxState::AwaitFirst, PCI_FIRST) => {
                let len = usize::from(u16::from_be_bytes([data[1] & 0x0f, data[2]]));
                if len != self.rx_expected || len <= SINGLE_MAX {
                    self.rx_state = RxState::Failed(LinkError::UnexpectedLength);
                } else {
                    self.rx.clear();
                    let _ = self.rx.extend_from_slice(&data[3..3 + FIRST_DATA]);
                    self.rx_state = RxState::Consecutive { next_seq: 1 };
                    self.flow_reply = Some(self.rx_sender);
                    timers.reset(self.rx_timer, self.rx_timeout_ms);
                }
                true
            }
            (RxState::Consecutive { next_seq }, PCI_CONSECUTIVE) => {
                if data[1] & 0x0f != next_seq {
                    self.rx_state = RxState::Failed(LinkError::SequenceError);
                    return true;
                }
                let take = (self.rx_expected - self.rx.len()).min(CONSECUTIVE_DATA);
                let _ = self.rx.extend_from_slice(&data[2..2 + take]);
                self.rx_state = if self.rx.len() >= self.rx_expected {
                    RxState::Complete
                } else {
                    RxState::Consecutive {
                        next_seq: (next_seq + 1) & 0x0f,
                    }
                };
                timers.reset(self.rx_timer, self.rx_timeout_ms);
                true
            }
            _ => false,
        }
    }

    fn poll_tx<H: CanTx + ?Sized>(&mut self, io: &mut H, timers: &TimerBank) {
        match self.tx_state {
            TxState::Single => {
                #[allow(clippy::cast_possible_truncation)]
                let pci = [PCI_SINGLE | self.tx.len() as u8];
                let frame = self.frame(self.tx_peer, &pci, &self.tx);
                if io.try_send(&frame).is_ok() {
                    self.tx_state = TxState::Done;
                }
            }
            TxState::First => {
                let [hi, lo] = u16::try_from(self.tx.len())
                    .unwrap_or(u16::MAX)
                    .to_be_bytes();
                let pci = [PCI_FIRST | (hi & 0x0f), lo];
                let frame = self.frame(self.tx_peer, &pci, &self.tx[..FIRST_DATA]);
                if io.try_send(&frame).is_ok() {
                    self.tx_offset = FIRST_DATA;
                    self.tx_seq = 1;
                    self.tx_state = TxState::AwaitFlow;
                    timers.reset(self.tx_timer, self.tx_timeout_ms);
                }
            }
            TxState::AwaitFlow => {
                if timers.expired(self.tx_timer) {
                    self.tx_state = TxState::Failed(LinkError::Timeout);
                }
            }
            TxState::Consecutive { block_left } => {
                if !timers.expired(self.gap_timer) {
                    return;
                }
                let end = (self.tx_offset + CONSECUTIVE_DATA).min(self.tx.len());
                let pci = [PCI_CONSECUTIVE | self.tx_seq];
                let frame = self.frame(self.tx_peer, &pci, &self.tx[self.tx_offset..end]);
                if io.try_send(&frame).is_err() {
                    return;
                }
                self.tx_offset = end;
                self.tx_seq = (self.tx_seq + 1) & 0x0f;
                timers.reset(self.gap_timer, self.st_min_ms);
                self.tx_state = match block_left {
                    _ if self.tx_offset >= self.tx.len() => TxState::Done,
                    Some(1) => {
                        timers.reset(self.tx_timer, self.tx_timeout_ms);
                        TxState::AwaitFlow
                    }
                    Some(left) => TxState::Consecutive {
                        block_left: Some(left - 1),
                    },
                    None => TxState::Consecutive { block_left: None },
                };
            }
            TxState::Idle | TxState::Done | TxState::Failed(_) => {}
        }
    }
}

/// Separation time in whole milliseconds; sub-millisecond codes round to 0.
const fn st_min_ms(raw: u8) -> u32 {
    if raw <= 0x7f { raw as u32 } else { 0 }
}

impl DiagnosticLink for IsoTp {
    fn accepts(&self, id: u16) -> bool {
        crate::can::is_isotp(id)
    }

    fn accept(&mut self, timers: &TimerBank, frame: &CanFrame) -> bool {
        let data = frame.data();
        if !crate::can::is_isotp(frame.id) || data[0] != self.address {
            return false;
        }
        let from = frame.id - ids::ISOTP_FIRST;
        if data[1] & 0xf0 == PCI_FLOW {
            if from != u16::from(self.tx_peer) {
                return false;
            }
            self.on_flow_control(timers, data);
            return true;
        }
        from == u16::from(self.rx_sender) && self.on_data(timers, data)
    }

    fn recv_start(&mut self, timers: &TimerBank, len: usize, sender: u8, timeout_ms: u32) {
        self.rx.clear();
        self.rx_expected = len;
        self.rx_sender = sender;
        self.rx_timeout_ms = timeout_ms;
        self.flow_reply = None;
        self.rx_state = if len > MAX_PAYLOAD || len == 0 {
            RxState::Failed(LinkError::PayloadTooLong)
        } else {
            RxState::AwaitFirst
        };
        timers.reset(self.rx_timer, timeout_ms);
    }

    fn send(
        &mut self,
        timers: &TimerBank,
        peer: u8,
        payload: &[u8],
        timeout_ms: u32,
    ) -> Result<(), LinkError> {
        self.tx.clear();
        if payload.is_empty() || self.tx.extend_from_slice(payload).is_err() {
            self.tx_state = TxState::Idle;
            return Err(LinkError::PayloadTooLong);
        }
        self.tx_peer = peer;
        self.tx_offset = 0;
        self.tx_seq = 0;
        self.tx_timeout_ms = timeout_ms;
        self.tx_state = if payload.len() <= SINGLE_MAX {
            TxState::Single
        } else {
            TxState::First
        };
        timers.reset(self.tx_timer, timeout_ms);
        Ok(())
    }

    fn poll<H: CanTx + ?Sized>(&mut self, io: &mut H, timers: &TimerBank) {
        if let Some(peer) = self.flow_reply {
            let frame = self.frame(peer, &[PCI_FLOW | FLOW_CONTINUE, 0x00, 0x00], &[]);
            if io.try_send(&frame).is_ok() {
                self.flow_reply = None;
            }
        }

        if matches!(
            self.rx_state,
            RxState::AwaitFirst | RxState::Consecutive { .. }
        ) && timers.expired(self.rx_timer)
        {
            self.rx_state = RxState::Failed(LinkError::Timeout);
        }

        self.poll_tx(io, timers);
    }

    fn recv_done(&self) -> RecvStatus {
        match self.rx_state {
            RxState::Complete => RecvStatus::Success,
            RxState::Failed(err) => RecvStatus::Failure(err),
            RxState::Idle => RecvStatus::Failure(LinkError::NotArmed),
            RxState::AwaitFirst | RxState::Consecutive { .. } => match self.tx_state {
                TxState::Failed(err) => RecvStatus::Failure(err),
                _ => RecvStatus::Busy,
            },
        }
    }

    fn received(&self) -> &[u8] {
        &self.rx
    }

    fn abort(&mut self) {
        self.tx_state = TxState::Idle;
        self.rx_state = RxState::Idle;
        self.flow_reply = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimIo;

    const ECU: u8 = 0x12;
    const TESTER: u8 = 0xf1;

    fn ecu_frame(data: [u8; 8]) -> CanFrame {
        CanFrame::full(ids::ISOTP_FIRST + u16::from(ECU), data)
    }

    fn setup() -> (TimerBank, IsoTp, SimIo) {
        let timers = TimerBank::new();
        let link = IsoTp::new(&timers, TESTER).expect("timers");
        (timers, link, SimIo::new())
    }

    #[test]
    fn short_request_goes_out_as_a_single_frame() {
        let (timers, mut link, mut io) = setup();
        link.send(&timers, ECU, &[0x2c, 0x10], 100).expect("fits");
        link.poll(&mut io, &timers);

        let frame = io.sent().last().expect("frame sent");
        assert_eq!(frame.id, 0x6f1);
        assert_eq!(frame.data(), &[ECU, 0x02, 0x2c, 0x10, 0, 0, 0, 0]);
        assert!(link.send_done());
    }

    #[test]
    fn long_request_waits_for_flow_control() {
        let (timers, mut link, mut io) = setup();
        let request: [u8; 16] = [
            0x2c, 0x10, 0x07, 0x72, 0x07, 0x6f, 0x04, 0x34, 0x07, 0x6d, 0x0e, 0xa6, 0x06, 0x07,
            0x0a, 0x8d,
        ];
        link.send(&timers, ECU, &request, 100).expect("fits");
        link.poll(&mut io, &timers);
        assert_eq!(
            io.sent()[0].data(),
            &[ECU, 0x10, 0x10, 0x2c, 0x10, 0x07, 0x72, 0x07]
        );

        link.poll(&mut io, &timers);
        assert_eq!(io.sent().len(), 1, "no consecutive frame before flow control");

        assert!(link.accept(&timers, &ecu_frame([TESTER, 0x30, 0, 0, 0, 0, 0, 0])));
        link.poll(&mut io, &timers);
        link.poll(&mut io, &timers);

        let sent = io.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1].data(), &[ECU, 0x21, 0x6f, 0x04, 0x34, 0x07, 0x6d, 0x0e]);
        assert_eq!(sent[2].data(), &[ECU, 0x22, 0xa6, 0x06, 0x07, 0x0a, 0x8d, 0x00]);
        assert!(link.send_done());
    }

    #[test]
    fn multi_frame_reply_is_acknowledged_and_assembled() {
        let (timers, mut link, mut io) = setup();
        link.recv_start(&timers, 13, ECU, 100);

        assert!(link.accept(&timers, &ecu_frame([TESTER, 0x10, 0x0d, 1, 2, 3, 4, 5])));
        link.poll(&mut io, &timers);
        assert_eq!(
            io.sent().last().map(CanFrame::data),
            Some(&[ECU, 0x30, 0, 0, 0, 0, 0, 0])
        );
        assert_eq!(link.recv_done(), RecvStatus::Busy);

        assert!(link.accept(&timers, &ecu_frame([TESTER, 0x21, 6, 7, 8, 9, 10, 11])));
        assert!(link.accept(&timers, &ecu_frame([TESTER, 0x22, 12, 13, 0, 0, 0, 0])));
        assert_eq!(link.recv_done(), RecvStatus::Success);
        assert_eq!(link.received(), &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13]);
    }

    #[test]
    fn silent_peer_times_out() {
        let (timers, mut link, mut io) = setup();
        link.recv_start(&timers, 13, ECU, 100);
        timers.advance(99);
        link.poll(&mut io, &timers);
        assert_eq!(link.recv_done(), RecvStatus::Busy);
        timers.advance(1);
        link.poll(&mut io, &timers);
        assert_eq!(link.recv_done(), RecvStatus::Failure(LinkError::Timeout));
    }

    #[test]
    fn wrong_length_and_out_of_order_frames_fail_the_receive() {
        let (timers, mut link, _io) = setup();
        link.recv_start(&timers, 13, ECU, 100);
        link.accept(&timers, &ecu_frame([TESTER, 0x10, 0x0c, 0, 0, 0, 0, 0]));
        assert_eq!(
            link.recv_done(),
            RecvStatus::Failure(LinkError::UnexpectedLength)
        );

        link.recv_start(&timers, 13, ECU, 100);
        link.accept(&timers, &ecu_frame([TESTER, 0x10, 0x0d, 0, 0, 0, 0, 0]));
        link.accept(&timers, &ecu_frame([TESTER, 0x22, 0, 0, 0, 0, 0, 0]));
        assert_eq!(
            link.recv_done(),
            RecvStatus::Failure(LinkError::SequenceError)
        );
    }

    #[test]
    fn overflow_flow_control_fails_the_exchange() {
        let (timers, mut link, mut io) = setup();
        link.recv_start(&timers, 13, ECU, 100);
        link.send(&timers, ECU, &[0; 16], 100).expect("fits");
        link.poll(&mut io, &timers);
        link.accept(&timers, &ecu_frame([TESTER, 0x32, 0, 0, 0, 0, 0, 0]));
        assert_eq!(
            link.recv_done(),
            RecvStatus::Failure(LinkError::FlowControlOverflow)
        );
    }

    #[test]
    fn frames_for_other_nodes_are_ignored() {
        let (timers, mut link, _io) = setup();
        link.recv_start(&timers, 2, ECU, 100);
        assert!(!link.accept(&timers, &ecu_frame([0x18, 0x02, 1, 2, 0, 0, 0, 0])));
        assert!(!link.accept(
            &timers,
            &CanFrame::full(0x618, [TESTER, 0x02, 1, 2, 0, 0, 0, 0])
        ));
        assert_eq!(link.recv_done(), RecvStatus::Busy);
        assert!(link.accept(&timers, &ecu_frame([TESTER, 0x02, 1, 2, 0, 0, 0, 0])));
        assert_eq!(link.received(), &[1, 2]);
    }

    #[test]
    fn oversized_payloads_are_refused() {
        let (timers, mut link, _io) = setup();
        assert_eq!(
            link.send(&timers, ECU, &[0; MAX_PAYLOAD + 1], 100),
            Err(LinkError::PayloadTooLong)
        );
    }
}
