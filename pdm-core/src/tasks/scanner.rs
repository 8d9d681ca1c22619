//! Periodic engine-controller scan.
//!
//! Every interval the scanner asks the engine controller for a fixed block
//! of measurements over the diagnostic link and rebroadcasts the reply as
//! plain frames that simpler nodes can listen to. The first exchange after
//! a start or a failure sends the full setup request; later exchanges send
//! the short repeat request.
//!
//! Reply layout (13 bytes, two status bytes first):
//!
//! | offset | field                              |
//! |--------|------------------------------------|
//! | 2..4   | intake air temperature             |
//! | 4..6   | charge air temperature             |
//! | 6..8   | exhaust temperature before filter  |
//! | 8..10  | boost pressure                     |
//! | 10     | current gear                       |
//! | 11     | transmission oil temperature       |
//! | 12     | oil pressure status                |

use crate::hal::{CanFrame, Io};
use crate::isotp::{DiagnosticLink, LinkError, RecvStatus};
use crate::scheduler::{Context, Step, Task};
use crate::state::Gear;
use crate::telemetry::TelemetryEvent;
use crate::timer::{Timer, TimerBank, TimerError};

/// Diagnostic address of the engine controller.
pub const ECU_ADDRESS: u8 = 0x12;
/// Our own diagnostic address.
pub const TESTER_ADDRESS: u8 = 0xf1;

/// Read request configuring the measurement block.
pub const SETUP_REQUEST: [u8; 16] = [
    0x2c, 0x10, // read by local identifier
    0x07, 0x72, // intake air temperature
    0x07, 0x6f, // charge air temperature
    0x04, 0x34, // exhaust temperature before filter
    0x07, 0x6d, // boost pressure
    0x0e, 0xa6, // current gear
    0x06, 0x07, // transmission oil temperature
    0x0a, 0x8d, // oil pressure status
];

/// Repeats the previously configured read.
pub const REPEAT_REQUEST: [u8; 2] = [0x2c, 0x10];

/// Expected reply length: two status bytes plus the measurement block.
pub const RESPONSE_LEN: usize = 13;

/// Reply buffer, sized so the rebroadcast slices from offset 2 are whole frames.
pub const SCAN_BUFFER_LEN: usize = 18;

const PAYLOAD_OFFSET: usize = 2;
const GEAR_OFFSET: usize = 10;

/// Replaces the controller's gear byte with the lever position unless the
/// lever is in drive, in which case the raw gear number becomes its ASCII
/// digit.
pub fn apply_gear_fixup(buffer: &mut [u8; SCAN_BUFFER_LEN], gear: Gear) {
    let slot = &mut buffer[GEAR_OFFSET];
    *slot = if gear == Gear::Drive {
        slot.wrapping_add(b'0')
    } else {
        gear.code()
    };
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ScannerConfig {
    pub interval_ms: u32,
    pub timeout_ms: u32,
    pub ecu: u8,
    /// Identifier of the first rebroadcast frame; the rest follow in order.
    pub rebroadcast_id: u16,
}

impl ScannerConfig {
    pub const DEFAULT: Self = Self {
        interval_ms: 250,
        timeout_ms: 100,
        ecu: ECU_ADDRESS,
        rebroadcast_id: 0x700,
    };
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Phase {
    AwaitInterval,
    Exchange,
    Rebroadcast { frame: u16 },
}

pub struct Scanner<L> {
    config: ScannerConfig,
    link: L,
    timer: Timer,
    phase: Phase,
    setup_sent: bool,
    buffer: [u8; SCAN_BUFFER_LEN],
    last_failure: Option<LinkError>,
}

impl<L: DiagnosticLink> Scanner<L> {
    pub fn new(timers: &TimerBank, link: L, config: ScannerConfig) -> Result<Self, TimerError> {
        Ok(Self {
            config,
            link,
            timer: timers.register()?,
            phase: Phase::AwaitInterval,
            setup_sent: false,
            buffer: [0; SCAN_BUFFER_LEN],
            last_failure: None,
        })
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Inbound diagnostic frames are routed here by the board.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// `true` once the setup request has been answered.
    pub const fn setup_sent(&self) -> bool {
        self.setup_sent
    }

    /// Last reply after gear fixup, zero padded.
    pub const fn last_response(&self) -> &[u8; SCAN_BUFFER_LEN] {
        &self.buffer
    }

    fn start_exchange<H: Io + ?Sized>(&mut self, cx: &mut Context<'_, H>) -> Step {
        let config = self.config;
        self.link
            .recv_start(cx.timers, RESPONSE_LEN, config.ecu, config.timeout_ms);
        let request: &[u8] = if self.setup_sent {
            &REPEAT_REQUEST
        } else {
            &SETUP_REQUEST
        };
        if let Err(err) = self
            .link
            .send(cx.timers, config.ecu, request, config.timeout_ms)
        {
            return self.fail(cx, err);
        }
        self.link.poll(cx.io, cx.timers);
        self.phase = Phase::Exchange;
        Step::Yielded
    }

    fn complete<H: Io + ?Sized>(&mut self, cx: &mut Context<'_, H>) {
        self.buffer = [0; SCAN_BUFFER_LEN];
        let received = self.link.received();
        let len = received.len().min(RESPONSE_LEN);
        self.buffer[..len].copy_from_slice(&received[..len]);
        apply_gear_fixup(&mut self.buffer, cx.state.bus.selected_gear);

        if !self.setup_sent {
            cx.record(TelemetryEvent::ScanComplete { setup: true });
        }
        self.last_failure = None;
        self.phase = Phase::Rebroadcast { frame: 0 };
    }

    fn fail<H: Io + ?Sized>(&mut self, cx: &mut Context<'_, H>, err: LinkError) -> Step {
        self.link.abort();
        if self.last_failure != Some(err) {
            cx.record(TelemetryEvent::ScanFailed(err));
            self.last_failure = Some(err);
        }
        Step::Restart
    }
}

impl<H: Io + ?Sized, L: DiagnosticLink> Task<H> for Scanner<L> {
    fn name(&self) -> &'static str {
        "scanner"
    }

    fn resume(&mut self, cx: &mut Context<'_, H>) -> Step {
        self.link.poll(cx.io, cx.timers);

        loop {
            match self.phase {
                Phase::AwaitInterval => {
                    if !cx.timers.expired(self.timer) {
                        return Step::Blocked;
                    }
                    cx.timers.reload(self.timer, self.config.interval_ms);
                    return self.start_exchange(cx);
                }
                Phase::Exchange => match self.link.recv_done() {
                    RecvStatus::Busy => return Step::Yielded,
                    RecvStatus::Failure(err) => return self.fail(cx, err),
                    RecvStatus::Success => self.complete(cx),
                },
                Phase::Rebroadcast { frame } => {
                    let offset = PAYLOAD_OFFSET + usize::from(frame) * 8;
                    if offset >= RESPONSE_LEN {
                        self.setup_sent = true;
                        self.phase = Phase::AwaitInterval;
                        continue;
                    }
                    let mut data = [0; 8];
                    data.copy_from_slice(&self.buffer[offset..offset + 8]);
                    cx.io
                        .send_blocking(&CanFrame::full(self.config.rebroadcast_id + frame, data));
                    self.phase = Phase::Rebroadcast { frame: frame + 1 };
                    return Step::Yielded;
                }
            }
        }
    }

    fn restart(&mut self) {
        self.phase = Phase::AwaitInterval;
        self.setup_sent = false;
    }
}

#[cfg(test)]
mod tests {
    use heapless::Vec;

    use super::*;
    use crate::hal::CanTx;
    use crate::isotp::MAX_PAYLOAD;
    use crate::sim::TaskBench;

    /// Link double that answers every exchange with a canned outcome.
    struct ScriptedLink {
        outcome: RecvStatus,
        reply: Vec<u8, MAX_PAYLOAD>,
        requests: Vec<Vec<u8, MAX_PAYLOAD>, 16>,
        armed: bool,
    }

    impl ScriptedLink {
        fn answering(reply: &[u8]) -> Self {
            Self {
                outcome: RecvStatus::Success,
                reply: Vec::from_slice(reply).expect("reply fits"),
                requests: Vec::new(),
                armed: false,
            }
        }
    }

    impl DiagnosticLink for ScriptedLink {
        fn accepts(&self, _id: u16) -> bool {
            false
        }

        fn accept(&mut self, _timers: &TimerBank, _frame: &CanFrame) -> bool {
            false
        }

        fn recv_start(&mut self, _timers: &TimerBank, len: usize, sender: u8, _timeout_ms: u32) {
            assert_eq!((len, sender), (RESPONSE_LEN, ECU_ADDRESS));
            self.armed = true;
        }

        fn send(
            &mut self,
            _timers: &TimerBank,
            _peer: u8,
            payload: &[u8],
            _timeout_ms: u32,
        ) -> Result<(), LinkError> {
            let request = Vec::from_slice(payload).map_err(|_| LinkError::PayloadTooLong)?;
            self.requests
                .push(request)
                .map_err(|_| LinkError::PayloadTooLong)
        }

        fn poll<H: CanTx + ?Sized>(&mut self, _io: &mut H, _timers: &TimerBank) {}

        fn recv_done(&self) -> RecvStatus {
            if self.armed {
                self.outcome
            } else {
                RecvStatus::Failure(LinkError::NotArmed)
            }
        }

        fn received(&self) -> &[u8] {
            &self.reply
        }

        fn abort(&mut self) {
            self.armed = false;
        }
    }

    const REPLY: [u8; RESPONSE_LEN] = [
        0x6c, 0x10, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 3, 0x0b, 0x0c,
    ];

    fn scanner(bench: &TaskBench, link: ScriptedLink) -> Scanner<ScriptedLink> {
        Scanner::new(&bench.timers, link, ScannerConfig::DEFAULT).expect("timer")
    }

    #[test]
    fn gear_fixup_reports_lever_or_drive_gear() {
        let mut buffer = [0; SCAN_BUFFER_LEN];
        buffer[GEAR_OFFSET] = 4;
        apply_gear_fixup(&mut buffer, Gear::Drive);
        assert_eq!(buffer[GEAR_OFFSET], b'4');

        apply_gear_fixup(&mut buffer, Gear::Park);
        assert_eq!(buffer[GEAR_OFFSET], b'P');
    }

    #[test]
    fn first_scan_sends_setup_then_rebroadcasts() {
        let mut bench = TaskBench::new();
        bench.state.bus.selected_gear = Gear::Drive;
        let mut scanner = scanner(&bench, ScriptedLink::answering(&REPLY));

        for _ in 0..4 {
            bench.step(&mut scanner);
        }

        assert_eq!(scanner.link().requests[0].as_slice(), &SETUP_REQUEST);
        let first = bench.io.sent_with_id(0x700).next().expect("first frame");
        let second = bench.io.sent_with_id(0x701).next().expect("second frame");
        assert_eq!(first.data(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(second.data(), &[b'3', 0x0b, 0x0c, 0, 0, 0, 0, 0]);
        assert!(scanner.setup_sent());
        assert!(
            bench
                .telemetry
                .contains(TelemetryEvent::ScanComplete { setup: true })
        );
    }

    #[test]
    fn later_scans_repeat_on_a_fixed_cadence() {
        let mut bench = TaskBench::new();
        let mut scanner = scanner(&bench, ScriptedLink::answering(&REPLY));

        bench.run(&mut scanner, 1000);

        let requests = &scanner.link().requests;
        assert_eq!(requests.len(), 4, "scans at 0, 250, 500 and 750 ms");
        assert!(
            requests[1..]
                .iter()
                .all(|request| request.as_slice() == REPEAT_REQUEST)
        );
        assert_eq!(bench.io.sent_with_id(0x700).count(), 4);
    }

    #[test]
    fn failure_restarts_with_setup_and_logs_once() {
        let mut bench = TaskBench::new();
        let mut link = ScriptedLink::answering(&REPLY);
        link.outcome = RecvStatus::Failure(LinkError::Timeout);
        let mut scanner = scanner(&bench, link);

        bench.run(&mut scanner, 1000);

        let requests = &scanner.link().requests;
        assert_eq!(requests.len(), 4);
        assert!(
            requests
                .iter()
                .all(|request| request.as_slice() == SETUP_REQUEST)
        );
        assert_eq!(bench.io.sent().len(), 0);
        let failures = bench
            .telemetry
            .oldest_first()
            .filter(|record| matches!(record.event, TelemetryEvent::ScanFailed(_)))
            .count();
        assert_eq!(failures, 1);
    }

    #[test]
    fn forced_restart_resends_setup() {
        let mut bench = TaskBench::new();
        let mut scanner = scanner(&bench, ScriptedLink::answering(&REPLY));
        bench.run(&mut scanner, 10);
        assert!(scanner.setup_sent());

        Task::<crate::sim::SimIo>::restart(&mut scanner);
        assert!(!scanner.setup_sent());
        bench.run(&mut scanner, 250);
        assert_eq!(
            scanner.link().requests.last().map(|request| request.as_slice()),
            Some(&SETUP_REQUEST[..])
        );
    }
}
