//! Board compositions: which tasks run, in which order, and which inbound
//! frames feed the shared record.
//!
//! A board owns its vehicle record, telemetry ring, and task slots. The
//! runtime hands it inbound frames through [`Board::receive`] and calls
//! [`Board::pass`] once per control-loop iteration.

pub mod head;
pub mod tail;

pub use head::{HeadConfig, HeadUnit};
pub use tail::{TailConfig, TailUnit};

use crate::can::MAX_FRAMES_PER_PASS;
use crate::hal::{CanFrame, Io};
use crate::state::VehicleState;
use crate::telemetry::TelemetryRecorder;
use crate::timer::TimerBank;

/// Runtime-facing surface shared by every board variant.
pub trait Board<H: Io + ?Sized> {
    /// Acceptance filter; only matching identifiers count as bus activity.
    fn accepts(&self, id: u16) -> bool;

    /// Decodes one inbound frame into the shared record. Returns `false`
    /// if the frame was filtered out.
    fn receive(&mut self, timers: &TimerBank, frame: &CanFrame) -> bool;

    /// Runs one scheduler pass.
    fn pass(&mut self, io: &mut H, timers: &TimerBank);

    fn state(&self) -> &VehicleState;

    fn telemetry(&self) -> &TelemetryRecorder;
}

/// Feeds up to [`MAX_FRAMES_PER_PASS`] frames from `next` into `board`.
/// Returns how many frames were taken from the source.
pub fn drain_frames<H, B>(
    board: &mut B,
    timers: &TimerBank,
    mut next: impl FnMut() -> Option<CanFrame>,
) -> usize
where
    H: Io + ?Sized,
    B: Board<H> + ?Sized,
{
    let mut taken = 0;
    while taken < MAX_FRAMES_PER_PASS {
        let Some(frame) = next() else {
            break;
        };
        taken += 1;
        board.receive(timers, &frame);
    }
    taken
}

/// Pending bus-idle transitions, collected from the receive path and the
/// idle timer and applied at the start of the next pass.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
struct IdleEdges {
    ended: bool,
    began: bool,
}

impl IdleEdges {
    fn note(&mut self, edge: Option<bool>) {
        match edge {
            Some(true) => self.began = true,
            Some(false) => self.ended = true,
            None => {}
        }
    }

    /// Transitions in the order they happened.
    fn take(&mut self) -> impl Iterator<Item = bool> + use<> {
        let edges = core::mem::take(self);
        [edges.ended.then_some(false), edges.began.then_some(true)]
            .into_iter()
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_edges_replay_in_order() {
        let mut edges = IdleEdges::default();
        edges.note(Some(false));
        edges.note(None);
        edges.note(Some(true));
        let mut replay = edges.take();
        assert_eq!(replay.next(), Some(false));
        assert_eq!(replay.next(), Some(true));
        assert_eq!(replay.next(), None);
        assert_eq!(edges, IdleEdges::default());
    }
}
