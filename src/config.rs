//! Compile-time limits and scheduler configuration
//!
//! Everything here is sized for the smallest target (2 KB SRAM):
//! eight tasks, eight lock classes, 1 kHz tick.
//!
//! Author: Moroya Sakamoto

/// Task slots in the default table (idle task not included)
pub const MAX_TASKS: usize = 8;

/// Default timer tick frequency
pub const TICK_HZ: u32 = 1000;

/// Default time slice, in ticks
pub const QUANTUM_TICKS: u16 = 10;

/// Smallest stack region `create` accepts
pub const MIN_STACK_BYTES: usize = 64;

/// Lowest priority (priorities are 6-bit, 0 = highest)
pub const MAX_PRIORITY: u8 = 63;

/// Highest fairness channel a task can be tagged with
pub const MAX_TASK_CLASS: u8 = 3;

/// Nodes in the lock-order graph
pub const MAX_LOCK_CLASSES: usize = 8;

/// Words in a two-tier spinlock's speculative snapshot buffer
pub const SNAPSHOT_WORDS: usize = 4;

/// Scheduler timing configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedConfig {
    /// Timer interrupt frequency in Hz
    pub tick_hz: u32,
    /// Ticks a task may run before the timer forces a reschedule
    pub quantum_ticks: u16,
}

impl SchedConfig {
    /// 1 kHz tick, 10 ms quantum
    pub const DEFAULT: SchedConfig = SchedConfig::new(TICK_HZ, QUANTUM_TICKS);

    pub const fn new(tick_hz: u32, quantum_ticks: u16) -> Self {
        Self {
            tick_hz,
            // A zero quantum would never expire
            quantum_ticks: if quantum_ticks == 0 { 1 } else { quantum_ticks },
        }
    }

    pub const fn with_quantum(self, quantum_ticks: u16) -> Self {
        Self::new(self.tick_hz, quantum_ticks)
    }

    /// Tick period in microseconds
    pub const fn tick_period_us(&self) -> u32 {
        if self.tick_hz == 0 {
            0
        } else {
            1_000_000 / self.tick_hz
        }
    }
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
