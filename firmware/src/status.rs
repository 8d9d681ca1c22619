#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Control-loop health counters.
//!
//! Plain atomics so the CAN task, the control loop, and the watchdog task can
//! update them without sharing anything else. The watchdog task logs a
//! [`LoopHealth`] snapshot periodically.

use portable_atomic::{AtomicU32, Ordering};

/// Completed control-loop passes.
static PASSES: AtomicU32 = AtomicU32::new(0);
/// Inbound frames refused because the loop had not drained the queue.
static RX_DROPPED: AtomicU32 = AtomicU32::new(0);
/// Parked outbound frames evicted by newer ones.
static TX_DROPPED: AtomicU32 = AtomicU32::new(0);
/// Deepest transmit backlog seen since boot.
static TX_BACKLOG_PEAK: AtomicU32 = AtomicU32::new(0);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub struct LoopHealth {
    pub passes: u32,
    pub rx_dropped: u32,
    pub tx_dropped: u32,
    pub tx_backlog_peak: u32,
}

/// Marks one finished pass and the backlog it left behind.
pub fn record_pass(backlog: usize) {
    PASSES.fetch_add(1, Ordering::Relaxed);
    let depth = u32::try_from(backlog).unwrap_or(u32::MAX);
    TX_BACKLOG_PEAK.fetch_max(depth, Ordering::Relaxed);
}

pub fn record_rx_dropped() {
    RX_DROPPED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_tx_dropped() {
    TX_DROPPED.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> LoopHealth {
    LoopHealth {
        passes: PASSES.load(Ordering::Relaxed),
        rx_dropped: RX_DROPPED.load(Ordering::Relaxed),
        tx_dropped: TX_DROPPED.load(Ordering::Relaxed),
        tx_backlog_peak: TX_BACKLOG_PEAK.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_and_backlog_peak_accumulate() {
        let before = snapshot();
        record_pass(3);
        record_pass(1);
        let after = snapshot();
        assert!(after.passes >= before.passes + 2);
        assert!(after.tx_backlog_peak >= 3);
    }
}
