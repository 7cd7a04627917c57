//! Smart lock: flock + DAG veto + lattice tickets
//!
//! One acquire attempt runs with interrupts disabled only around the
//! test-and-set and the bookkeeping that goes with a win. Between
//! attempts interrupts are back on, so the tick can preempt a spinner
//! like any other running task.
//!
//! Author: Moroya Sakamoto

use portable_atomic::{AtomicBool, AtomicU8, Ordering};

use log::debug;

use super::dag::{ClassSet, LockClass};
use super::flock::FastLock;
use super::lattice::{is_older, AtomicTicket, Ticket};
use super::LockDomain;
use crate::arch;

/// Composite lock state
#[derive(Debug)]
pub struct SmartLock {
    flock: FastLock,
    /// Node in the lock-order graph (`None` = not order-checked)
    class: Option<LockClass>,
    /// Classes the holder already held when it acquired this lock
    dependency_mask: AtomicU8,
    /// Held through the real-time bypass
    real_time: AtomicBool,
    /// Ticket of the current (or last) holder
    owner: AtomicTicket,
}

impl SmartLock {
    /// Lock outside the lock-order graph
    pub const fn new() -> Self {
        Self::build(None)
    }

    /// Lock that takes part in the lock-order check as `class`
    pub const fn with_class(class: LockClass) -> Self {
        Self::build(Some(class))
    }

    const fn build(class: Option<LockClass>) -> Self {
        Self {
            flock: FastLock::new(),
            class,
            dependency_mask: AtomicU8::new(0),
            real_time: AtomicBool::new(false),
            owner: AtomicTicket::new(0),
        }
    }

    /// Reset to the unlocked state
    pub fn init(&self) {
        self.flock.init();
        self.dependency_mask.store(0, Ordering::Relaxed);
        self.real_time.store(false, Ordering::Relaxed);
        self.owner.store(0, Ordering::Relaxed);
    }

    /// Spin until the lock is granted
    ///
    /// `held` is the set of lock classes the caller already holds. While
    /// granting would close a cycle in the recorded lock order, the
    /// caller keeps relaxing without taking the lock. Once the order
    /// check passes, a lost test-and-set spins hot if the caller's
    /// ticket is older than the owner's and relaxes otherwise.
    pub fn acquire(&self, domain: &LockDomain, held: ClassSet) {
        let ticket = self.draw_ticket(domain);
        let mut refused = false;

        loop {
            match self.attempt(domain, ticket, held) {
                Attempt::Granted => return,
                Attempt::Refused => {
                    if !refused {
                        debug!(
                            "lock class {:?} refused while holding {:#04x}: would close a cycle",
                            self.class,
                            held.bits()
                        );
                        refused = true;
                    }
                    domain.relax();
                }
                Attempt::Held(owner) => {
                    if cfg!(feature = "lattice") && is_older(ticket, owner) {
                        core::hint::spin_loop();
                    } else {
                        domain.relax();
                    }
                }
            }
        }
    }

    /// Single attempt; false if the lock is held or the order check refuses it
    pub fn try_acquire(&self, domain: &LockDomain, held: ClassSet) -> bool {
        if !self.order_admits(domain, held) {
            return false;
        }
        let ticket = self.draw_ticket(domain);
        self.attempt(domain, ticket, held) == Attempt::Granted
    }

    /// Clear the lock byte and the holder's bookkeeping
    ///
    /// The ticket counter is left alone.
    pub fn release(&self) {
        self.dependency_mask.store(0, Ordering::Release);
        self.real_time.store(false, Ordering::Relaxed);
        self.flock.release();
    }

    pub fn is_locked(&self) -> bool {
        self.flock.is_locked()
    }

    pub fn class(&self) -> Option<LockClass> {
        self.class
    }

    pub fn owner_ticket(&self) -> Ticket {
        self.owner.load(Ordering::Acquire)
    }

    pub fn dependency_mask(&self) -> ClassSet {
        ClassSet(self.dependency_mask.load(Ordering::Acquire))
    }

    pub(crate) fn set_dependency_mask(&self, mask: ClassSet) {
        self.dependency_mask.store(mask.bits(), Ordering::Release);
    }

    pub fn is_real_time(&self) -> bool {
        self.real_time.load(Ordering::Relaxed)
    }

    pub(crate) fn set_real_time(&self, rt: bool) {
        self.real_time.store(rt, Ordering::Relaxed);
    }

    fn draw_ticket(&self, domain: &LockDomain) -> Ticket {
        if cfg!(feature = "lattice") {
            domain.lattice().next_ticket()
        } else {
            0
        }
    }

    fn order_admits(&self, domain: &LockDomain, held: ClassSet) -> bool {
        match self.class {
            Some(class) if cfg!(feature = "dag") => domain.dag().admits(class, held),
            _ => true,
        }
    }

    /// One grant attempt with interrupts off
    ///
    /// Once the test-and-set is won, the order is checked again under the
    /// graph's write gate and the edges are recorded only if it still
    /// passes. If another holder recorded a conflicting edge in between,
    /// the lock byte is given back and the attempt counts as refused.
    fn attempt(&self, domain: &LockDomain, ticket: Ticket, held: ClassSet) -> Attempt {
        arch::without_interrupts(|| {
            if !self.order_admits(domain, held) {
                return Attempt::Refused;
            }
            if !self.flock.try_acquire() {
                return Attempt::Held(self.owner.load(Ordering::Acquire));
            }
            if let Some(class) = self.class {
                if cfg!(feature = "dag") && !domain.dag().try_record(class, held) {
                    self.flock.release();
                    return Attempt::Refused;
                }
            }
            self.owner.store(ticket, Ordering::Release);
            self.dependency_mask.store(held.bits(), Ordering::Release);
            Attempt::Granted
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Granted,
    /// Held by the owner with this ticket
    Held(Ticket),
    /// Granting would close a lock-order cycle
    Refused,
}

impl Default for SmartLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::lattice::GOLDEN_STRIDE;
    use crate::sync::Relax;
    use portable_atomic::AtomicUsize;
    use std::boxed::Box;
    use std::thread;
    use std::time::Duration;

    fn class(n: u8) -> LockClass {
        LockClass::new(n).unwrap()
    }

    #[test]
    fn test_acquire_release() {
        let domain = LockDomain::new();
        let lock = SmartLock::new();
        lock.acquire(&domain, ClassSet::EMPTY);
        assert!(lock.is_locked());
        assert!(!lock.try_acquire(&domain, ClassSet::EMPTY));
        lock.release();
        assert!(!lock.is_locked());
        assert!(lock.try_acquire(&domain, ClassSet::EMPTY));
    }

    #[test]
    fn test_interrupts_restored_after_attempt() {
        let domain = LockDomain::new();
        let lock = SmartLock::new();
        assert!(arch::interrupts_enabled());
        assert!(lock.try_acquire(&domain, ClassSet::EMPTY));
        assert!(arch::interrupts_enabled());
        assert!(!lock.try_acquire(&domain, ClassSet::EMPTY));
        assert!(arch::interrupts_enabled());
    }

    #[cfg(feature = "lattice")]
    #[test]
    fn test_owner_ticket_recorded_release_keeps_counter() {
        let domain = LockDomain::new();
        let lock = SmartLock::new();
        lock.acquire(&domain, ClassSet::EMPTY);
        let owner = lock.owner_ticket();
        assert_eq!(owner, domain.lattice().current());
        lock.release();
        assert_eq!(domain.lattice().current(), owner);
    }

    #[test]
    fn test_mutual_exclusion() {
        let domain = LockDomain::new();
        let lock = SmartLock::with_class(class(0));
        let inside = AtomicUsize::new(0);
        let max_seen = AtomicUsize::new(0);
        let total = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..5_000 {
                        lock.acquire(&domain, ClassSet::EMPTY);
                        let n = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(n, Ordering::SeqCst);
                        total.fetch_add(1, Ordering::Relaxed);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        lock.release();
                    }
                });
            }
        });

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(total.load(Ordering::Relaxed), 20_000);
    }

    #[test]
    fn test_records_lock_order() {
        let domain = LockDomain::new();
        let a = SmartLock::with_class(class(0));
        let b = SmartLock::with_class(class(1));

        a.acquire(&domain, ClassSet::EMPTY);
        b.acquire(&domain, ClassSet::of(class(0)));
        assert_eq!(b.dependency_mask(), ClassSet::of(class(0)));
        b.release();
        assert_eq!(b.dependency_mask(), ClassSet::EMPTY);
        a.release();

        let m = domain.dag().snapshot();
        assert_eq!(m.has_edge(class(1), class(0)), cfg!(feature = "dag"));
    }

    #[cfg(feature = "dag")]
    #[test]
    fn test_reverse_order_refused() {
        let domain = LockDomain::new();
        let a = SmartLock::with_class(class(0));
        let b = SmartLock::with_class(class(1));

        a.acquire(&domain, ClassSet::EMPTY);
        b.acquire(&domain, ClassSet::of(class(0)));
        b.release();
        a.release();

        // b then a would close the a <-> b cycle
        b.acquire(&domain, ClassSet::EMPTY);
        assert!(!a.try_acquire(&domain, ClassSet::of(class(1))));
        assert!(!a.is_locked());
        assert!(domain.dag().is_acyclic());
        b.release();

        // same order as before is still fine
        assert!(a.try_acquire(&domain, ClassSet::EMPTY));
        assert!(b.try_acquire(&domain, ClassSet::of(class(0))));
    }

    #[cfg(feature = "dag")]
    #[test]
    fn test_edge_recorded_between_check_and_grant() {
        let domain = LockDomain::new();
        let a = SmartLock::with_class(class(0));
        let b = SmartLock::with_class(class(1));
        let c = SmartLock::with_class(class(1));
        let d = SmartLock::with_class(class(0));

        // first holder has a and has passed the order check for b
        assert!(a.try_acquire(&domain, ClassSet::EMPTY));
        let held = ClassSet::of(class(0));
        assert!(b.order_admits(&domain, held));
        let ticket = b.draw_ticket(&domain);

        // second holder takes c then d, recording the opposite order
        assert!(c.try_acquire(&domain, ClassSet::EMPTY));
        assert!(d.try_acquire(&domain, ClassSet::of(class(1))));
        d.release();
        c.release();

        assert_eq!(b.attempt(&domain, ticket, held), Attempt::Refused);
        assert!(!b.is_locked());
        assert!(domain.dag().is_acyclic());
        a.release();

        // history is still usable
        assert!(d.try_acquire(&domain, ClassSet::EMPTY));
        assert!(!c.try_acquire(&domain, ClassSet::of(class(0))));
        d.release();
    }

    #[cfg(feature = "dag")]
    #[test]
    fn test_opposite_orders_never_close_cycle() {
        for _ in 0..200 {
            let domain = LockDomain::new();
            let granted = AtomicUsize::new(0);
            let pairs = [
                (SmartLock::with_class(class(0)), SmartLock::with_class(class(1))),
                (SmartLock::with_class(class(1)), SmartLock::with_class(class(0))),
            ];

            thread::scope(|s| {
                for (outer, inner) in &pairs {
                    let (domain, granted) = (&domain, &granted);
                    s.spawn(move || {
                        let outer_class = outer.class().unwrap();
                        assert!(outer.try_acquire(domain, ClassSet::EMPTY));
                        if inner.try_acquire(domain, ClassSet::of(outer_class)) {
                            granted.fetch_add(1, Ordering::SeqCst);
                            inner.release();
                        }
                        outer.release();
                    });
                }
            });

            assert!(domain.dag().is_acyclic());
            assert!(granted.load(Ordering::SeqCst) <= 1);
        }
    }

    #[test]
    fn test_release_clears_mask() {
        let domain = LockDomain::new();
        let lock = SmartLock::new();
        lock.acquire(&domain, ClassSet(0b11));
        assert_eq!(lock.dependency_mask(), ClassSet(0b11));
        lock.release();
        assert_eq!(lock.dependency_mask(), ClassSet::EMPTY);
    }

    /// Relax hook that counts calls and frees `lock` on the first one
    struct ReleaseOnRelax {
        lock: &'static SmartLock,
        calls: AtomicUsize,
    }

    impl Relax for ReleaseOnRelax {
        fn relax(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.lock.release();
        }
    }

    #[cfg(feature = "lattice")]
    #[test]
    fn test_newer_ticket_relaxes() {
        let domain = LockDomain::new();
        let lock: &'static SmartLock = Box::leak(Box::new(SmartLock::new()));
        let hook: &'static ReleaseOnRelax = Box::leak(Box::new(ReleaseOnRelax {
            lock,
            calls: AtomicUsize::new(0),
        }));
        domain.install_relax(hook);

        lock.acquire(&domain, ClassSet::EMPTY);
        let first = lock.owner_ticket();
        lock.acquire(&domain, ClassSet::EMPTY);

        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
        assert!(is_older(first, lock.owner_ticket()));
    }

    #[cfg(feature = "lattice")]
    #[test]
    fn test_older_ticket_spins_without_relaxing() {
        let domain = LockDomain::new();
        let lock: &'static SmartLock = Box::leak(Box::new(SmartLock::new()));
        let hook: &'static ReleaseOnRelax = Box::leak(Box::new(ReleaseOnRelax {
            lock,
            calls: AtomicUsize::new(0),
        }));
        domain.install_relax(hook);

        lock.acquire(&domain, ClassSet::EMPTY);
        // owner looks like it drew a ticket after the next contender
        let contender = domain.lattice().current().wrapping_add(GOLDEN_STRIDE);
        lock.owner.store(contender.wrapping_add(GOLDEN_STRIDE), Ordering::Release);

        thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(30));
                lock.flock.release();
            });
            lock.acquire(&domain, ClassSet::EMPTY);
        });

        assert_eq!(hook.calls.load(Ordering::SeqCst), 0);
        assert_eq!(lock.owner_ticket(), contender);
    }

    #[test]
    fn test_init_resets() {
        let domain = LockDomain::new();
        let lock = SmartLock::new();
        lock.acquire(&domain, ClassSet(0b101));
        lock.set_real_time(true);
        lock.init();
        assert!(!lock.is_locked());
        assert!(!lock.is_real_time());
        assert_eq!(lock.dependency_mask(), ClassSet::EMPTY);
    }
}
