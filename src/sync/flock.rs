//! Fast lock: one test-and-set byte
//!
//! The mechanism every other lock is built from. No fairness, no owner,
//! no recursion tracking, and it never yields: a contended `acquire`
//! burns cycles until the holder releases.
//!
//! Author: Moroya Sakamoto

use portable_atomic::{AtomicU8, Ordering};

use crate::arch;

/// Spin-only mutual exclusion on a single byte (0 = free)
#[derive(Debug)]
pub struct FastLock {
    cell: AtomicU8,
}

impl FastLock {
    pub const fn new() -> Self {
        Self {
            cell: AtomicU8::new(0),
        }
    }

    /// Reset to unlocked
    pub fn init(&self) {
        self.cell.store(0, Ordering::Release);
    }

    /// One atomic test-and-set; true if the caller now holds the lock
    #[inline]
    pub fn try_acquire(&self) -> bool {
        !arch::atomic_test_and_set(&self.cell)
    }

    /// Spin until `try_acquire` succeeds
    #[inline]
    pub fn acquire(&self) {
        while !self.try_acquire() {
            core::hint::spin_loop();
        }
    }

    /// Unconditionally clear the cell
    #[inline]
    pub fn release(&self) {
        self.cell.store(0, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.cell.load(Ordering::Relaxed) != 0
    }
}

impl Default for FastLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_try_acquire() {
        let lock = FastLock::new();
        assert!(lock.try_acquire());
        assert!(lock.is_locked());
        assert!(!lock.try_acquire());
        lock.release();
        assert!(!lock.is_locked());
        assert!(lock.try_acquire());
    }

    #[test]
    fn test_release_is_unconditional() {
        let lock = FastLock::new();
        lock.release();
        assert!(!lock.is_locked());
        lock.acquire();
        lock.init();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_two_contenders_complete() {
        const ITERS: usize = 100_000;
        let lock = FastLock::new();
        let done = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| {
                    for _ in 0..ITERS {
                        lock.acquire();
                        lock.release();
                    }
                    done.fetch_add(ITERS, Ordering::Relaxed);
                });
            }
        });

        assert_eq!(done.load(Ordering::Relaxed), 2 * ITERS);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_mutual_exclusion() {
        let lock = FastLock::new();
        let inside = AtomicUsize::new(0);
        let max_seen = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..10_000 {
                        lock.acquire();
                        let n = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(n, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        lock.release();
                    }
                });
            }
        });

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
