//! System timer: tick counter driven by the periodic timer interrupt
//!
//! Lock acquisition has no built-in timeout. Callers that need one
//! poll a `try_*` operation against a `Deadline` measured in ticks.
//!
//! Author: Moroya Sakamoto

use portable_atomic::{AtomicU32, Ordering};

/// System timer
///
/// Counts timer interrupts; wraps after 2^32 ticks (~49 days at 1 kHz).
pub struct SysTimer {
    /// Ticks since `reset`
    ticks: AtomicU32,
    /// Tick frequency
    tick_hz: u32,
    /// Number of counter wraparounds
    overflows: AtomicU32,
}

impl SysTimer {
    /// Create a new system timer
    pub const fn new(tick_hz: u32) -> Self {
        Self {
            ticks: AtomicU32::new(0),
            tick_hz,
            overflows: AtomicU32::new(0),
        }
    }

    /// Advance by `n` ticks (called from the tick interrupt)
    pub fn advance(&self, n: u32) {
        let prev = self.ticks.fetch_add(n, Ordering::Relaxed);
        if prev.checked_add(n).is_none() {
            self.overflows.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current tick count
    pub fn now(&self) -> u32 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Current time in milliseconds
    pub fn now_ms(&self) -> u64 {
        if self.tick_hz == 0 {
            return 0;
        }
        let total = ((self.overflows() as u64) << 32) | self.now() as u64;
        total * 1000 / self.tick_hz as u64
    }

    pub fn tick_hz(&self) -> u32 {
        self.tick_hz
    }

    /// Number of overflows
    pub fn overflows(&self) -> u32 {
        self.overflows.load(Ordering::Relaxed)
    }

    /// Ticks elapsed since a reference point (wraparound-safe)
    pub fn elapsed_since(&self, reference: u32) -> u32 {
        self.now().wrapping_sub(reference)
    }

    /// Reset timer
    pub fn reset(&self) {
        self.ticks.store(0, Ordering::Relaxed);
        self.overflows.store(0, Ordering::Relaxed);
    }
}

/// Tick deadline for caller-side timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    /// Tick the wait started at
    start: u32,
    /// Allowed ticks
    budget: u32,
}

impl Deadline {
    /// Deadline `budget` ticks after `start`
    pub const fn new(start: u32, budget: u32) -> Self {
        Self { start, budget }
    }

    /// Deadline `budget` ticks from the timer's current count
    pub fn after(timer: &SysTimer, budget: u32) -> Self {
        Self::new(timer.now(), budget)
    }

    /// Has the budget run out at tick `now`?
    pub fn expired(&self, now: u32) -> bool {
        self.elapsed(now) >= self.budget
    }

    /// Ticks remaining (0 once expired)
    pub fn remaining(&self, now: u32) -> u32 {
        self.budget.saturating_sub(self.elapsed(now))
    }

    /// Elapsed since start
    pub fn elapsed(&self, now: u32) -> u32 {
        now.wrapping_sub(self.start)
    }
}
