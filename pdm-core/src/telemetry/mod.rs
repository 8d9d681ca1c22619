//! Telemetry event catalog and the fixed-capacity ring that records them.
//!
//! Tasks record notable transitions (power state changes, restarts, scan
//! failures) through [`TelemetryRecorder`]. The ring keeps the most recent
//! entries for the emulator and bench debugging; with the `defmt` feature
//! every record is mirrored to the defmt log as it is written.

use core::fmt;

use heapless::HistoryBuf;

use crate::isotp::LinkError;
use crate::tasks::power::PowerState;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 32;

/// Monotonic identifier assigned to each record.
pub type EventId = u32;

/// Discriminated telemetry events shared across boards.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TelemetryEvent {
    /// A task was forced back to its entry point.
    TaskRestarted(&'static str),
    PowerState(PowerState),
    /// Gated tasks may now run (`true`) or were stopped (`false`).
    PowerGate(bool),
    CanIdle(bool),
    StarterEngaged,
    StarterReleased,
    ScanFailed(LinkError),
    ScanComplete { setup: bool },
    /// A best-effort send found no free transmit buffer.
    FrameDropped(u16),
}

impl TelemetryEvent {
    /// Events that indicate lost work rather than a normal transition.
    #[must_use]
    pub const fn is_fault(self) -> bool {
        matches!(
            self,
            TelemetryEvent::ScanFailed(_) | TelemetryEvent::FrameDropped(_)
        )
    }
}

impl fmt::Display for TelemetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEvent::TaskRestarted(name) => write!(f, "task-restarted {name}"),
            TelemetryEvent::PowerState(state) => write!(f, "power {state}"),
            TelemetryEvent::PowerGate(open) => {
                f.write_str(if *open { "gate-open" } else { "gate-closed" })
            }
            TelemetryEvent::CanIdle(idle) => {
                f.write_str(if *idle { "can-idle" } else { "can-active" })
            }
            TelemetryEvent::StarterEngaged => f.write_str("starter-engaged"),
            TelemetryEvent::StarterReleased => f.write_str("starter-released"),
            TelemetryEvent::ScanFailed(err) => write!(f, "scan-failed {err}"),
            TelemetryEvent::ScanComplete { setup } => {
                write!(f, "scan-complete{}", if *setup { " (setup)" } else { "" })
            }
            TelemetryEvent::FrameDropped(id) => write!(f, "frame-dropped {id:#05x}"),
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TelemetryRecord {
    pub id: EventId,
    pub at_ms: u32,
    pub event: TelemetryEvent,
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}ms {}", self.id, self.at_ms, self.event)
    }
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing = HistoryBuf<TelemetryRecord, TELEMETRY_RING_CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder {
    ring: TelemetryRing,
    next_event_id: EventId,
}

impl TelemetryRecorder {
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Appends an event stamped with `at_ms`, evicting the oldest record
    /// once the ring is full.
    pub fn record(&mut self, event: TelemetryEvent, at_ms: u32) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        let record = TelemetryRecord { id, at_ms, event };
        log_record(&record);
        self.ring.write(record);
        id
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    /// Records written after `id`, oldest first.
    pub fn since(&self, id: Option<EventId>) -> impl Iterator<Item = &TelemetryRecord> {
        self.oldest_first()
            .filter(move |record| id.is_none_or(|seen| record.id > seen))
    }

    /// Returns the most recent telemetry record, if available.
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Returns `true` if any retained record matches `event`.
    pub fn contains(&self, event: TelemetryEvent) -> bool {
        self.oldest_first().any(|record| record.event == event)
    }
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "defmt")]
fn log_record(record: &TelemetryRecord) {
    if record.event.is_fault() {
        defmt::warn!("telemetry {}", record);
    } else {
        defmt::info!("telemetry {}", record);
    }
}

#[cfg(not(feature = "defmt"))]
fn log_record(_record: &TelemetryRecord) {}
