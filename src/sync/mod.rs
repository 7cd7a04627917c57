//! Lock subsystem
//!
//! Layered leaf to root: `flock` (one test-and-set byte), `dag`
//! (lock-order cycle veto), `lattice` (golden-ratio tickets), `smart`
//! (the three composed), `spinlock` (BKL + instance lock with a
//! real-time bypass and a state snapshot).
//!
//! The process-wide pieces (BKL, DAG matrix, ticket counter) live in one
//! `LockDomain` that every lock call takes by reference.
//!
//! Author: Moroya Sakamoto

pub mod dag;
pub mod flock;
pub mod lattice;
pub mod smart;
pub mod snapshot;
pub mod spinlock;

pub use dag::{ClassSet, DagChecker, DagMatrix, LockClass};
pub use flock::FastLock;
pub use lattice::{is_older, Lattice, Ticket, GOLDEN_STRIDE};
pub use smart::SmartLock;
pub use snapshot::{Snapshot, SNAPSHOT_LEN};
pub use spinlock::{SpinGuard, SpinLock};

/// What a spinning locker does between attempts
///
/// The kernel installs its scheduler here so a contended smart lock
/// yields the CPU instead of burning the whole quantum.
pub trait Relax {
    fn relax(&self);
}

/// Process-wide lock state
pub struct LockDomain {
    bkl: SmartLock,
    dag: DagChecker,
    lattice: Lattice,
    relax: spin::Once<&'static (dyn Relax + Sync)>,
}

impl LockDomain {
    pub const fn new() -> Self {
        Self {
            bkl: SmartLock::new(),
            dag: DagChecker::new(),
            lattice: Lattice::new(),
            relax: spin::Once::new(),
        }
    }

    /// Reset the BKL; the lock-order history is kept
    pub fn init(&self) {
        self.bkl.init();
    }

    /// Install the between-attempts hook (first call wins)
    pub fn install_relax(&self, hook: &'static (dyn Relax + Sync)) {
        self.relax.call_once(|| hook);
    }

    /// Back off once: the installed hook, or a CPU spin hint
    pub fn relax(&self) {
        match self.relax.get() {
            Some(hook) => hook.relax(),
            None => core::hint::spin_loop(),
        }
    }

    pub fn bkl(&self) -> &SmartLock {
        &self.bkl
    }

    pub fn dag(&self) -> &DagChecker {
        &self.dag
    }

    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    pub(crate) fn lock_bkl(&self) {
        self.bkl.acquire(self, ClassSet::EMPTY);
    }

    pub(crate) fn try_lock_bkl(&self) -> bool {
        self.bkl.try_acquire(self, ClassSet::EMPTY)
    }

    pub(crate) fn unlock_bkl(&self) {
        self.bkl.release();
    }
}

impl Default for LockDomain {
    fn default() -> Self {
        Self::new()
    }
}
