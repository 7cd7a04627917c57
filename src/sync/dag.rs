//! Lock-order graph and cycle check
//!
//! Bit (row, col) of the adjacency matrix records that lock class `row`
//! was requested while class `col` was held. The matrix only grows: it
//! keeps the worst-case ordering ever observed, and a lock is refused
//! when granting it would close a cycle in that history. False
//! positives are accepted in exchange for one `fetch_or` per edge and a
//! bounded O(N²) check.
//!
//! Writers serialize on a gate byte so a check and the edges it admits
//! land as one step; readers take plain snapshots.
//!
//! Author: Moroya Sakamoto

use portable_atomic::{AtomicU8, Ordering};

use super::flock::FastLock;
use crate::arch;
use crate::config::MAX_LOCK_CLASSES;

/// Node in the lock-order graph (0..8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LockClass(u8);

impl LockClass {
    pub const fn new(class: u8) -> Option<Self> {
        if (class as usize) < MAX_LOCK_CLASSES {
            Some(LockClass(class))
        } else {
            None
        }
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn bit(self) -> u8 {
        1 << self.0
    }
}

/// Set of lock classes, one bit per class
///
/// Used as the dependency mask: the classes the caller already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassSet(pub u8);

impl ClassSet {
    pub const EMPTY: ClassSet = ClassSet(0);

    pub const fn of(class: LockClass) -> Self {
        ClassSet(class.bit())
    }

    pub const fn with(self, class: LockClass) -> Self {
        ClassSet(self.0 | class.bit())
    }

    pub const fn contains(self, class: LockClass) -> bool {
        self.0 & class.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

/// Plain copy of the adjacency matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DagMatrix {
    rows: [u8; MAX_LOCK_CLASSES],
}

impl DagMatrix {
    pub const fn new() -> Self {
        Self {
            rows: [0; MAX_LOCK_CLASSES],
        }
    }

    /// `from` requested while `to` held
    pub fn with_edge(mut self, from: LockClass, to: LockClass) -> Self {
        self.rows[from.index()] |= to.bit();
        self
    }

    /// Edges from `class` to every member of `held`
    pub fn with_edges(mut self, class: LockClass, held: ClassSet) -> Self {
        self.rows[class.index()] |= held.bits();
        self
    }

    pub const fn has_edge(&self, from: LockClass, to: LockClass) -> bool {
        self.rows[from.index()] & to.bit() != 0
    }

    pub fn edge_count(&self) -> u32 {
        self.rows.iter().map(|r| r.count_ones()).sum()
    }

    /// Kahn's algorithm over bitsets
    ///
    /// Repeatedly drop a node with no edge into the remaining set; if
    /// nodes remain and none qualifies, they sit on a cycle.
    pub fn is_acyclic(&self) -> bool {
        let mut remaining: u8 = u8::MAX >> (8 - MAX_LOCK_CLASSES);
        while remaining != 0 {
            let free = (0..MAX_LOCK_CLASSES)
                .find(|&v| remaining & (1 << v) != 0 && self.rows[v] & remaining == 0);
            match free {
                Some(v) => remaining &= !(1 << v),
                None => return false,
            }
        }
        true
    }
}

/// Process-wide lock-order graph
#[derive(Debug)]
pub struct DagChecker {
    rows: [AtomicU8; MAX_LOCK_CLASSES],
    /// Held by whoever is adding edges
    gate: FastLock,
}

impl DagChecker {
    pub const fn new() -> Self {
        Self {
            rows: [const { AtomicU8::new(0) }; MAX_LOCK_CLASSES],
            gate: FastLock::new(),
        }
    }

    /// Record "`from` was requested while `to` was held"
    pub fn record_edge(&self, from: LockClass, to: LockClass) {
        self.record(from, ClassSet::of(to));
    }

    /// Record an edge from `class` to every held class, unchecked
    pub fn record(&self, class: LockClass, held: ClassSet) {
        if !held.is_empty() {
            self.with_gate(|| {
                self.rows[class.index()].fetch_or(held.bits(), Ordering::AcqRel);
            });
        }
    }

    /// Check and record in one step
    ///
    /// The edges from `class` to `held` are added only if the graph stays
    /// acyclic with them; no other writer can slip an edge in between.
    pub fn try_record(&self, class: LockClass, held: ClassSet) -> bool {
        if held.is_empty() {
            return self.admits(class, held);
        }
        self.with_gate(|| {
            let admitted = self.admits(class, held);
            if admitted {
                self.rows[class.index()].fetch_or(held.bits(), Ordering::AcqRel);
            }
            admitted
        })
    }

    fn with_gate<R>(&self, f: impl FnOnce() -> R) -> R {
        arch::without_interrupts(|| {
            self.gate.acquire();
            let result = f();
            self.gate.release();
            result
        })
    }

    pub fn snapshot(&self) -> DagMatrix {
        let mut m = DagMatrix::new();
        for (dst, row) in m.rows.iter_mut().zip(self.rows.iter()) {
            *dst = row.load(Ordering::Acquire);
        }
        m
    }

    /// Cycle check over the recorded history
    pub fn is_acyclic(&self) -> bool {
        self.snapshot().is_acyclic()
    }

    /// Would granting `class` to a holder of `held` keep the graph acyclic?
    pub fn admits(&self, class: LockClass, held: ClassSet) -> bool {
        self.snapshot().with_edges(class, held).is_acyclic()
    }
}

impl Default for DagChecker {
    fn default() -> Self {
        Self::new()
    }
}
