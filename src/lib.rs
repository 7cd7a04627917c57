//! nk-core: µ-kernel core for 8-bit microcontrollers
//!
//! Task scheduling plus a deadlock-aware, fairness-biased lock stack:
//! - Static TCB table (no heap, no allocation), priority round-robin
//!   with timer preemption
//! - `flock`: one test-and-set byte, spin only
//! - Lock-order DAG that refuses acquisitions closing a cycle
//! - Golden-ratio ticket lattice for queue-free oldest-first bias
//! - Two-tier spinlock: Big Kernel Lock + instance lock, with a
//!   real-time bypass and a flat state snapshot
//!
//! Author: Moroya Sakamoto

#![no_std]
#![cfg_attr(target_arch = "avr", feature(asm_experimental_arch))]

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod arch;
pub mod config;
pub mod error;
pub mod kernel;
pub mod scheduler;
pub mod sync;
pub mod task;
pub mod timer;

pub use config::SchedConfig;
pub use error::{KernelError, KernelResult};
pub use kernel::{Kernel, KernelStats};
pub use scheduler::Scheduler;
pub use sync::{
    ClassSet, FastLock, LockClass, LockDomain, Relax, SmartLock, Snapshot, SpinGuard, SpinLock,
};
pub use task::{Pid, Priority, StackRegion, TaskClass, TaskFn, TaskState, Tcb};
pub use timer::{Deadline, SysTimer};
