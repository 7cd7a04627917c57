//! Kernel: top-level manager
//!
//! Bundles the scheduler, the process-wide lock domain and the system
//! timer into the single static instance the rest of the system is
//! handed by reference.
//!
//! Author: Moroya Sakamoto

use log::info;

use crate::config::{SchedConfig, MAX_TASKS};
use crate::error::KernelResult;
use crate::scheduler::Scheduler;
use crate::sync::LockDomain;
use crate::task::{Pid, Priority, StackRegion, TaskClass, TaskFn};
use crate::timer::SysTimer;

/// Kernel instance
///
/// Meant to live in a `static`; `init` needs `&'static self` so the
/// scheduler can be installed as the lock domain's relax hook.
pub struct Kernel<const N: usize = MAX_TASKS> {
    /// Task scheduler
    pub scheduler: Scheduler<N>,
    /// BKL, lock-order graph, ticket counter
    pub locks: LockDomain,
    /// System timer
    pub timer: SysTimer,
}

impl<const N: usize> Kernel<N> {
    pub const fn new(config: SchedConfig) -> Self {
        Self {
            scheduler: Scheduler::new(config),
            locks: LockDomain::new(),
            timer: SysTimer::new(config.tick_hz),
        }
    }

    /// Boot-time initialization
    pub fn init(&'static self) {
        self.timer.reset();
        self.locks.init();
        self.locks.install_relax(&self.scheduler);
        self.scheduler.init();
        info!("kernel: up, {} bytes of kernel state", self.memory_footprint());
    }

    /// Create a task in class 0
    pub fn spawn(&self, entry: TaskFn, priority: Priority, stack: StackRegion) -> KernelResult<Pid> {
        self.scheduler.create(entry, priority, stack)
    }

    pub fn spawn_in_class(
        &self,
        entry: TaskFn,
        priority: Priority,
        class: TaskClass,
        stack: StackRegion,
    ) -> KernelResult<Pid> {
        self.scheduler.create_in_class(entry, priority, class, stack)
    }

    /// Hand the CPU to the first task
    pub fn start(&self) {
        self.scheduler.start();
    }

    /// Timer interrupt entry
    pub fn tick(&self) {
        self.timer.advance(1);
        self.scheduler.on_tick();
    }

    pub fn current_id(&self) -> Pid {
        self.scheduler.current_id()
    }

    pub fn stats(&self) -> KernelStats {
        KernelStats {
            ticks: self.timer.now(),
            uptime_ms: self.timer.now_ms(),
            context_switches: self.scheduler.context_switches(),
            task_count: self.scheduler.task_count(),
            current: self.scheduler.current_id(),
        }
    }

    /// Memory footprint estimate
    pub fn memory_footprint(&self) -> usize {
        core::mem::size_of::<Self>()
    }
}

/// Kernel execution statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelStats {
    /// Timer ticks since init
    pub ticks: u32,
    /// Uptime in milliseconds
    pub uptime_ms: u64,
    /// Context switches
    pub context_switches: u32,
    /// Claimed task slots
    pub task_count: usize,
    /// Running task
    pub current: Pid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KernelError;
    use crate::sync::{ClassSet, SpinLock};
    use std::boxed::Box;
    use std::vec;

    fn noop_task() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    fn stack() -> StackRegion {
        StackRegion::new(Box::leak(vec![0u8; 96].into_boxed_slice()))
    }

    fn kernel<const N: usize>(config: SchedConfig) -> &'static Kernel<N> {
        let k: &'static Kernel<N> = Box::leak(Box::new(Kernel::new(config)));
        k.init();
        k
    }

    #[test]
    fn test_kernel_creation() {
        let k = kernel::<4>(SchedConfig::DEFAULT);
        let stats = k.stats();
        assert_eq!(stats.task_count, 0);
        assert_eq!(stats.current, Pid::IDLE);
        assert_eq!(stats.ticks, 0);
    }

    #[test]
    fn test_kernel_spawn_and_start() {
        let k = kernel::<4>(SchedConfig::DEFAULT);
        let a = k.spawn(noop_task, Priority::NORMAL, stack()).unwrap();
        let b = k
            .spawn_in_class(noop_task, Priority::HIGH, TaskClass::new(1).unwrap(), stack())
            .unwrap();
        assert_eq!((a, b), (Pid(0), Pid(1)));
        k.start();
        assert_eq!(k.current_id(), b);
    }

    #[test]
    fn test_kernel_tick_drives_timer_and_scheduler() {
        let k = kernel::<2>(SchedConfig::new(100, 5));
        k.spawn(noop_task, Priority::NORMAL, stack()).unwrap();
        k.spawn(noop_task, Priority::NORMAL, stack()).unwrap();
        k.start();
        for _ in 0..10 {
            k.tick();
        }
        let stats = k.stats();
        assert_eq!(stats.ticks, 10);
        assert_eq!(stats.uptime_ms, 100);
        assert_eq!(k.scheduler.now_ticks(), 10);
        // start + one switch per expired quantum
        assert_eq!(stats.context_switches, 3);
        assert_eq!(stats.current, Pid(0));
    }

    #[test]
    fn test_kernel_table_full() {
        let k = kernel::<1>(SchedConfig::DEFAULT);
        k.spawn(noop_task, Priority::NORMAL, stack()).unwrap();
        assert_eq!(
            k.spawn(noop_task, Priority::NORMAL, stack()),
            Err(KernelError::TaskTableFull)
        );
    }

    #[test]
    fn test_relax_hook_yields() {
        let k = kernel::<2>(SchedConfig::DEFAULT);
        k.spawn(noop_task, Priority::NORMAL, stack()).unwrap();
        k.spawn(noop_task, Priority::NORMAL, stack()).unwrap();
        k.start();
        assert_eq!(k.current_id(), Pid(0));
        k.locks.relax();
        assert_eq!(k.current_id(), Pid(1));
    }

    #[test]
    fn test_locks_through_kernel() {
        let k = kernel::<2>(SchedConfig::DEFAULT);
        let lock = SpinLock::new();
        let guard = lock.lock(&k.locks, ClassSet::EMPTY);
        assert!(k.locks.bkl().is_locked());
        assert!(lock.try_lock_rt(&k.locks, ClassSet::EMPTY).is_err());
        drop(guard);
        assert!(!k.locks.bkl().is_locked());
    }

    #[test]
    fn test_memory_footprint() {
        let k = kernel::<8>(SchedConfig::DEFAULT);
        let size = k.memory_footprint();
        assert!(size < 2048, "kernel size should be < 2KB, got {size}");
    }
}
