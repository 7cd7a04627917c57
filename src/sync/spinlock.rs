//! Two-tier spinlock
//!
//! `lock` takes the domain's Big Kernel Lock and then the instance lock.
//! `lock_rt` takes only the instance lock, skipping the BKL for
//! latency-critical sections. Guards release in reverse order.
//!
//! Each instance also carries a four-word speculative buffer that can be
//! captured and restored through `encode` / `decode`, independently of
//! who holds the lock.
//!
//! Author: Moroya Sakamoto

use portable_atomic::{AtomicU32, Ordering};

use super::dag::{ClassSet, LockClass};
use super::smart::SmartLock;
use super::snapshot::Snapshot;
use super::LockDomain;
use crate::config::SNAPSHOT_WORDS;
use crate::error::{KernelError, KernelResult};

/// BKL-serialized lock with a real-time bypass
#[derive(Debug)]
pub struct SpinLock {
    core: SmartLock,
    matrix: [AtomicU32; SNAPSHOT_WORDS],
}

impl SpinLock {
    pub const fn new() -> Self {
        Self::from_core(SmartLock::new())
    }

    /// Instance lock that takes part in the lock-order check
    pub const fn with_class(class: LockClass) -> Self {
        Self::from_core(SmartLock::with_class(class))
    }

    const fn from_core(core: SmartLock) -> Self {
        Self {
            core,
            matrix: [const { AtomicU32::new(0) }; SNAPSHOT_WORDS],
        }
    }

    /// Reset to unlocked with a zeroed snapshot buffer
    pub fn init(&self) {
        self.core.init();
        for word in &self.matrix {
            word.store(0, Ordering::Relaxed);
        }
    }

    /// BKL, then the instance lock
    pub fn lock<'a>(&'a self, domain: &'a LockDomain, mask: ClassSet) -> SpinGuard<'a> {
        domain.lock_bkl();
        self.core.acquire(domain, mask);
        self.core.set_real_time(false);
        SpinGuard::new(self, domain, false)
    }

    /// Instance lock only
    pub fn lock_rt<'a>(&'a self, domain: &'a LockDomain, mask: ClassSet) -> SpinGuard<'a> {
        self.core.acquire(domain, mask);
        self.core.set_real_time(true);
        SpinGuard::new(self, domain, true)
    }

    /// Non-blocking `lock`; drops the BKL again if the instance lock is taken
    pub fn try_lock<'a>(
        &'a self,
        domain: &'a LockDomain,
        mask: ClassSet,
    ) -> KernelResult<SpinGuard<'a>> {
        if !domain.try_lock_bkl() {
            return Err(KernelError::LockUnavailable);
        }
        if !self.core.try_acquire(domain, mask) {
            domain.unlock_bkl();
            return Err(KernelError::LockUnavailable);
        }
        self.core.set_real_time(false);
        Ok(SpinGuard::new(self, domain, false))
    }

    /// Non-blocking `lock_rt`
    pub fn try_lock_rt<'a>(
        &'a self,
        domain: &'a LockDomain,
        mask: ClassSet,
    ) -> KernelResult<SpinGuard<'a>> {
        if !self.core.try_acquire(domain, mask) {
            return Err(KernelError::LockUnavailable);
        }
        self.core.set_real_time(true);
        Ok(SpinGuard::new(self, domain, true))
    }

    pub fn is_locked(&self) -> bool {
        self.core.is_locked()
    }

    /// Instance lock state (class, owner ticket, mask)
    pub fn core(&self) -> &SmartLock {
        &self.core
    }

    pub fn matrix_set(&self, index: usize, value: u32) -> KernelResult<()> {
        let word = self
            .matrix
            .get(index)
            .ok_or(KernelError::IndexOutOfRange(index))?;
        word.store(value, Ordering::Release);
        Ok(())
    }

    pub fn matrix_get(&self, index: usize) -> KernelResult<u32> {
        self.matrix
            .get(index)
            .map(|word| word.load(Ordering::Acquire))
            .ok_or(KernelError::IndexOutOfRange(index))
    }

    /// Capture `{dependency_mask, matrix}`
    pub fn encode(&self) -> Snapshot {
        let mut matrix = [0u32; SNAPSHOT_WORDS];
        for (dst, word) in matrix.iter_mut().zip(self.matrix.iter()) {
            *dst = word.load(Ordering::Acquire);
        }
        Snapshot::new(self.core.dependency_mask().bits(), matrix)
    }

    /// Restore a captured state; the lock byte is not touched
    pub fn decode(&self, snap: &Snapshot) {
        self.core.set_dependency_mask(ClassSet(snap.dependency_mask));
        for (word, value) in self.matrix.iter().zip(snap.matrix.iter()) {
            word.store(*value, Ordering::Release);
        }
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Held two-tier lock; dropping it releases the instance lock, then the BKL
#[must_use = "dropping the guard releases the lock immediately"]
pub struct SpinGuard<'a> {
    lock: &'a SpinLock,
    domain: &'a LockDomain,
    real_time: bool,
}

impl<'a> SpinGuard<'a> {
    fn new(lock: &'a SpinLock, domain: &'a LockDomain, real_time: bool) -> Self {
        Self {
            lock,
            domain,
            real_time,
        }
    }

    /// Taken through the BKL bypass?
    pub fn is_real_time(&self) -> bool {
        self.real_time
    }

    pub fn lock(&self) -> &SpinLock {
        self.lock
    }

    pub fn unlock(self) {
        drop(self);
    }
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.lock.core.release();
        if !self.real_time {
            self.domain.unlock_bkl();
        }
    }
}
