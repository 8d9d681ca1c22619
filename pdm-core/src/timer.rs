//! Millisecond countdown timers shared between the control loop and the
//! time-base interrupt.
//!
//! Every timer is a plain signed countdown. [`TimerBank::tick`] is the only
//! operation that runs in interrupt context; it decrements each allocated
//! slot and never touches anything else, so reading `expired` from the
//! control loop is race tolerant: once a countdown reaches zero it stays
//! expired until its owner reloads it.

use core::fmt;

use portable_atomic::{AtomicI32, AtomicU32, AtomicUsize, Ordering};

/// Number of countdown slots available to a board.
pub const MAX_TIMERS: usize = 16;

/// Handle to a countdown slot owned by exactly one task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timer(usize);

impl Timer {
    /// Slot index inside the owning bank.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Timer registration failures.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerError {
    /// Every slot in the bank has already been handed out.
    BankFull,
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerError::BankFull => f.write_str("timer bank exhausted"),
        }
    }
}

/// Fixed set of countdown timers plus a free-running uptime counter.
pub struct TimerBank {
    remaining: [AtomicI32; MAX_TIMERS],
    allocated: AtomicUsize,
    uptime_ms: AtomicU32,
}

impl TimerBank {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            remaining: [const { AtomicI32::new(0) }; MAX_TIMERS],
            allocated: AtomicUsize::new(0),
            uptime_ms: AtomicU32::new(0),
        }
    }

    /// Hands out the next free slot. Fresh timers start out expired.
    pub fn register(&self) -> Result<Timer, TimerError> {
        self.allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < MAX_TIMERS).then_some(count + 1)
            })
            .map(Timer)
            .map_err(|_| TimerError::BankFull)
    }

    /// Number of slots handed out so far.
    pub fn registered(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    /// Loads `ms` into the countdown, measured from now.
    pub fn reset(&self, timer: Timer, ms: u32) {
        self.slot(timer).store(clamp_ms(ms), Ordering::Release);
    }

    /// Extends the countdown by `ms` from its previous deadline so periodic
    /// work does not accumulate drift. A deadline missed by more than a full
    /// period is resynchronised to `ms` from now.
    pub fn reload(&self, timer: Timer, ms: u32) {
        let period = clamp_ms(ms);
        let _ = self
            .slot(timer)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                if remaining <= -period {
                    Some(period)
                } else {
                    Some(remaining.saturating_add(period))
                }
            });
    }

    /// Returns `true` once the countdown has reached zero.
    pub fn expired(&self, timer: Timer) -> bool {
        self.slot(timer).load(Ordering::Acquire) <= 0
    }

    /// Milliseconds left before expiry (zero when expired).
    pub fn remaining(&self, timer: Timer) -> u32 {
        u32::try_from(self.slot(timer).load(Ordering::Acquire)).unwrap_or(0)
    }

    /// Milliseconds since the bank started ticking (wraps after ~49 days).
    pub fn now_ms(&self) -> u32 {
        self.uptime_ms.load(Ordering::Relaxed)
    }

    /// One millisecond time-base step. Safe to call from interrupt context.
    pub fn tick(&self) {
        let allocated = self.allocated.load(Ordering::Acquire);
        for slot in &self.remaining[..allocated] {
            let _ = slot.fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                Some(remaining.saturating_sub(1))
            });
        }
        self.uptime_ms.fetch_add(1, Ordering::Relaxed);
    }

    /// Runs `ms` consecutive ticks.
    pub fn advance(&self, ms: u32) {
        for _ in 0..ms {
            self.tick();
        }
    }

    fn slot(&self, timer: Timer) -> &AtomicI32 {
        &self.remaining[timer.0]
    }
}

impl Default for TimerBank {
    fn default() -> Self {
        Self::new()
    }
}

fn clamp_ms(ms: u32) -> i32 {
    i32::try_from(ms).unwrap_or(i32::MAX)
}
