//! Kernel error type
//!
//! Every failure the core can report is recoverable: the caller retries
//! or takes another path. A lock refused by the DAG checker is not an
//! error for blocking acquires; they keep spinning.
//!
//! Author: Moroya Sakamoto

use core::fmt;

use crate::task::Pid;

/// Errors reported by the scheduler and the lock subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Every task slot is claimed
    TaskTableFull,
    /// A non-blocking acquire found the lock held (or refused by the DAG)
    LockUnavailable,
    /// Priority outside 0..=63
    InvalidPriority(u8),
    /// Task class outside 0..=3
    InvalidClass(u8),
    /// Stack region below the minimum size
    StackTooSmall { len: usize },
    /// No task occupies this slot
    NoSuchTask(Pid),
    /// Operation needs a task context but the idle task is running
    NotInTask,
    /// Snapshot matrix index out of range
    IndexOutOfRange(usize),
    /// Byte buffer too short to hold a snapshot
    SnapshotTruncated { len: usize },
}

impl KernelError {
    pub const fn as_str(&self) -> &'static str {
        match self {
            KernelError::TaskTableFull => "task table full",
            KernelError::LockUnavailable => "lock unavailable",
            KernelError::InvalidPriority(_) => "invalid priority",
            KernelError::InvalidClass(_) => "invalid task class",
            KernelError::StackTooSmall { .. } => "stack too small",
            KernelError::NoSuchTask(_) => "no such task",
            KernelError::NotInTask => "not in task context",
            KernelError::IndexOutOfRange(_) => "index out of range",
            KernelError::SnapshotTruncated { .. } => "snapshot truncated",
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::InvalidPriority(p) => write!(f, "{}: {}", self.as_str(), p),
            KernelError::InvalidClass(c) => write!(f, "{}: {}", self.as_str(), c),
            KernelError::StackTooSmall { len } => write!(f, "{}: {} bytes", self.as_str(), len),
            KernelError::NoSuchTask(pid) => write!(f, "{}: {}", self.as_str(), pid),
            KernelError::IndexOutOfRange(i) => write!(f, "{}: {}", self.as_str(), i),
            KernelError::SnapshotTruncated { len } => {
                write!(f, "{}: got {} bytes", self.as_str(), len)
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for KernelError {}

/// Result alias used across the crate
pub type KernelResult<T> = Result<T, KernelError>;
