//! Task Control Block: static, no-alloc task descriptors
//!
//! One TCB per slot of the fixed task table. Tasks are never destroyed,
//! only re-entered; a slot stays `Inactive` until `create` claims it.
//!
//! Author: Moroya Sakamoto

use core::fmt;

use crate::arch::Context;
use crate::config::{MAX_PRIORITY, MAX_TASK_CLASS, MIN_STACK_BYTES};
use crate::error::{KernelError, KernelResult};

/// Task entry point: never returns
pub type TaskFn = fn() -> !;

/// Task slot identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u8);

impl Pid {
    /// The idle task, which lives outside the table
    pub const IDLE: Pid = Pid(u8::MAX);

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn is_idle(self) -> bool {
        self.0 == u8::MAX
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_idle() {
            f.write_str("idle")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Task priority (lower number = higher priority)
///
/// A scheduling hint only: the highest-priority ready task runs,
/// equal priorities share the CPU round-robin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority(u8);

impl Priority {
    pub const HIGHEST: Priority = Priority(0);
    pub const HIGH: Priority = Priority(16);
    pub const NORMAL: Priority = Priority(32);
    pub const LOW: Priority = Priority(48);
    pub const LOWEST: Priority = Priority(MAX_PRIORITY);

    /// Validate a raw 6-bit priority
    pub const fn new(level: u8) -> KernelResult<Self> {
        if level > MAX_PRIORITY {
            Err(KernelError::InvalidPriority(level))
        } else {
            Ok(Priority(level))
        }
    }

    pub const fn level(self) -> u8 {
        self.0
    }
}

/// 2-bit fairness channel reserved for per-class lock queuing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskClass(u8);

impl TaskClass {
    pub const DEFAULT: TaskClass = TaskClass(0);

    pub const fn new(class: u8) -> KernelResult<Self> {
        if class > MAX_TASK_CLASS {
            Err(KernelError::InvalidClass(class))
        } else {
            Ok(TaskClass(class))
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }
}

/// Task execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Task is ready to run
    Ready,
    /// Task is currently executing
    Running,
    /// Task is waiting on outstanding dependencies
    Blocked,
    /// Task is waiting for a tick count to elapse
    Sleeping,
    /// Task slot is empty
    Inactive,
}

/// Stack memory handed to a task
///
/// Only the bounds are kept; the region is owned by the task from
/// `create` on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    base: usize,
    len: usize,
}

impl StackRegion {
    pub fn new(mem: &'static mut [u8]) -> Self {
        Self {
            base: mem.as_mut_ptr() as usize,
            len: mem.len(),
        }
    }

    /// Empty region (idle task runs on the boot stack)
    pub const fn empty() -> Self {
        Self { base: 0, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the highest byte; stacks grow downward from here
    pub fn top(&self) -> usize {
        self.base + self.len
    }

    pub(crate) fn validate(&self) -> KernelResult<()> {
        if self.len < MIN_STACK_BYTES {
            Err(KernelError::StackTooSmall { len: self.len })
        } else {
            Ok(())
        }
    }
}

/// Task Control Block
#[derive(Debug, Clone, Copy)]
pub struct Tcb {
    /// Saved execution context (stack pointer)
    pub(crate) context: Context,
    /// Current state
    pub state: TaskState,
    /// Scheduling priority
    pub priority: Priority,
    /// Slot index
    pub pid: Pid,
    /// Fairness channel
    pub class: TaskClass,
    /// Ticks left while `Sleeping`
    pub sleep_ticks: u16,
    /// Outstanding dependencies while `Blocked`
    #[cfg(feature = "dep-wait")]
    pub dependency_count: u8,
    /// Entry point (`None` for empty slots and the idle task)
    pub entry: Option<TaskFn>,
}

impl Tcb {
    /// Empty task slot
    pub const fn empty() -> Self {
        Self {
            context: Context::empty(),
            state: TaskState::Inactive,
            priority: Priority::LOWEST,
            pid: Pid::IDLE,
            class: TaskClass::DEFAULT,
            sleep_ticks: 0,
            #[cfg(feature = "dep-wait")]
            dependency_count: 0,
            entry: None,
        }
    }

    /// The idle task: always runnable, never blocks
    pub const fn idle() -> Self {
        let mut tcb = Self::empty();
        tcb.state = TaskState::Running;
        tcb
    }

    /// A freshly created task, `Ready` in slot `pid`
    pub fn new(
        pid: Pid,
        entry: TaskFn,
        priority: Priority,
        class: TaskClass,
        stack: &StackRegion,
    ) -> Self {
        Self {
            context: Context::prepare(entry, stack),
            state: TaskState::Ready,
            priority,
            pid,
            class,
            sleep_ticks: 0,
            #[cfg(feature = "dep-wait")]
            dependency_count: 0,
            entry: Some(entry),
        }
    }

    /// Is this task slot active?
    pub fn is_active(&self) -> bool {
        self.state != TaskState::Inactive
    }

    /// Can the scheduler hand this task the CPU?
    pub fn is_runnable(&self) -> bool {
        matches!(self.state, TaskState::Ready | TaskState::Running) && self.deps_satisfied()
    }

    #[cfg(feature = "dep-wait")]
    fn deps_satisfied(&self) -> bool {
        self.dependency_count == 0
    }

    #[cfg(not(feature = "dep-wait"))]
    fn deps_satisfied(&self) -> bool {
        true
    }

    /// Saved stack cursor
    pub fn stack_pointer(&self) -> usize {
        self.context.stack_pointer()
    }
}
