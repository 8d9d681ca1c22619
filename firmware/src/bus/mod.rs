#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Frame queues between the CAN peripheral task and the control loop.
//!
//! The peripheral task owns the FDCAN driver and only ever awaits. The
//! control loop never awaits on the bus: it drains at most one pass worth of
//! inbound frames and hands outbound frames over through [`QueuedTx`], which
//! parks blocking sends in a short backlog instead of stalling the scheduler.

use embassy_sync::channel::{Channel, Receiver, Sender, TrySendError};
use heapless::Deque;
use pdm_core::hal::{CanFrame, CanTx, SendError};

use crate::status;

#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;

#[cfg(target_os = "none")]
type BusMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
type BusMutex = NoopRawMutex;

/// Inbound frames buffered between control-loop passes.
pub const RX_QUEUE_DEPTH: usize = 16;

/// Frames handed to the peripheral task but not yet written to a mailbox.
pub const TX_QUEUE_DEPTH: usize = 8;

/// Blocking sends parked while the transmit channel is full.
pub const TX_BACKLOG_DEPTH: usize = 16;

pub type RxChannel = Channel<BusMutex, CanFrame, RX_QUEUE_DEPTH>;
pub type RxSender<'a> = Sender<'a, BusMutex, CanFrame, RX_QUEUE_DEPTH>;
pub type RxReceiver<'a> = Receiver<'a, BusMutex, CanFrame, RX_QUEUE_DEPTH>;

pub type TxChannel = Channel<BusMutex, CanFrame, TX_QUEUE_DEPTH>;
pub type TxSender<'a> = Sender<'a, BusMutex, CanFrame, TX_QUEUE_DEPTH>;
pub type TxReceiver<'a> = Receiver<'a, BusMutex, CanFrame, TX_QUEUE_DEPTH>;

/// Both directions of the bus, shared by the peripheral task and the loop.
pub struct BusQueue {
    pub rx: RxChannel,
    pub tx: TxChannel,
}

impl BusQueue {
    pub const fn new() -> Self {
        Self {
            rx: Channel::new(),
            tx: Channel::new(),
        }
    }

    pub fn rx_sender(&self) -> RxSender<'_> {
        self.rx.sender()
    }

    pub fn rx_receiver(&self) -> RxReceiver<'_> {
        self.rx.receiver()
    }

    pub fn tx_sender(&self) -> TxSender<'_> {
        self.tx.sender()
    }

    pub fn tx_receiver(&self) -> TxReceiver<'_> {
        self.tx.receiver()
    }
}

/// Offers a received frame to the control loop, counting it if the loop has
/// fallen behind.
pub fn offer_inbound(sender: &RxSender<'_>, frame: CanFrame) {
    if sender.try_send(frame).is_err() {
        status::record_rx_dropped();
    }
}

/// Non-blocking [`CanTx`] for the control loop.
///
/// `try_send` drops when the channel is full. `send_blocking` and
/// `send_debug` never drop unless the backlog itself overflows; parked
/// frames go out in order from [`QueuedTx::flush`], and best-effort frames
/// are refused while anything is parked so they cannot overtake.
pub struct QueuedTx<'a> {
    sender: TxSender<'a>,
    backlog: Deque<CanFrame, TX_BACKLOG_DEPTH>,
}

impl<'a> QueuedTx<'a> {
    pub const fn new(sender: TxSender<'a>) -> Self {
        Self {
            sender,
            backlog: Deque::new(),
        }
    }

    /// Moves parked frames into the channel until it fills.
    pub fn flush(&mut self) {
        while let Some(frame) = self.backlog.front().copied() {
            if self.sender.try_send(frame).is_err() {
                break;
            }
            self.backlog.pop_front();
        }
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    fn park(&mut self, frame: &CanFrame) {
        self.flush();
        if self.backlog.is_empty() && self.sender.try_send(*frame).is_ok() {
            return;
        }
        if self.backlog.is_full() {
            self.backlog.pop_front();
            status::record_tx_dropped();
        }
        // Cannot fail: a slot was freed above.
        let _ = self.backlog.push_back(*frame);
    }
}

impl CanTx for QueuedTx<'_> {
    fn try_send(&mut self, frame: &CanFrame) -> Result<(), SendError> {
        self.flush();
        if !self.backlog.is_empty() {
            return Err(SendError::BufferFull);
        }
        self.sender
            .try_send(*frame)
            .map_err(|TrySendError::Full(_)| SendError::BufferFull)
    }

    fn send_blocking(&mut self, frame: &CanFrame) {
        self.park(frame);
    }

    fn send_debug(&mut self, frame: &CanFrame) {
        self.park(frame);
    }
}
