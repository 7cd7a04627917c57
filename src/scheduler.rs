//! Priority round-robin scheduler
//!
//! Fixed TCB table, no dynamic allocation. The highest-priority runnable
//! task gets the CPU; equal priorities rotate in slot order starting
//! after the current task. The idle task lives outside the table and
//! runs whenever nothing else can.
//!
//! Switches happen only through `yield_now`, `switch_to`, the blocking
//! calls, and the timer tick (`on_tick`), which preempts when the
//! quantum runs out or a woken task outranks the running one.
//!
//! Author: Moroya Sakamoto

use log::{debug, info, trace, warn};
use spin::Mutex;

use crate::arch::{self, Context};
use crate::config::{SchedConfig, MAX_TASKS};
use crate::error::{KernelError, KernelResult};
use crate::sync::Relax;
use crate::task::{Pid, Priority, StackRegion, TaskClass, TaskFn, TaskState, Tcb};

/// Task scheduler over an `N`-slot table
pub struct Scheduler<const N: usize = MAX_TASKS> {
    inner: Mutex<SchedInner<N>>,
    config: SchedConfig,
}

struct SchedInner<const N: usize> {
    /// Static task table
    tasks: [Tcb; N],
    /// Claimed slots
    task_count: usize,
    /// Running slot (None = idle)
    current: Option<usize>,
    /// Idle task context
    idle: Tcb,
    /// Ticks left in the running task's quantum
    quantum_left: u16,
    /// Ticks since `init`
    ticks: u32,
    /// Total context switches
    context_switches: u32,
}

/// Contexts to save into / restore from, decided under the table lock
struct Switch {
    from: *mut Context,
    to: *const Context,
}

impl<const N: usize> SchedInner<N> {
    const fn new(quantum: u16) -> Self {
        Self {
            tasks: [Tcb::empty(); N],
            task_count: 0,
            current: None,
            idle: Tcb::idle(),
            quantum_left: quantum,
            ticks: 0,
            context_switches: 0,
        }
    }

    fn slot(&self, pid: Pid) -> KernelResult<usize> {
        let idx = pid.index();
        if idx < N && self.tasks[idx].is_active() {
            Ok(idx)
        } else {
            Err(KernelError::NoSuchTask(pid))
        }
    }

    /// Highest-priority runnable slot, round-robin among equals
    ///
    /// The scan starts right after the current slot, so the current task
    /// only keeps the CPU against equals when nobody else is runnable.
    fn pick_next(&self) -> Option<usize> {
        let start = self.current.map_or(0, |c| c + 1);
        let mut best: Option<usize> = None;
        for k in 0..N {
            let i = (start + k) % N;
            let task = &self.tasks[i];
            if !task.is_runnable() {
                continue;
            }
            match best {
                Some(b) if self.tasks[b].priority <= task.priority => {}
                _ => best = Some(i),
            }
        }
        best
    }

    fn tcb_mut(&mut self, slot: Option<usize>) -> &mut Tcb {
        match slot {
            Some(i) => &mut self.tasks[i],
            None => &mut self.idle,
        }
    }

    /// Hand the CPU to `next`, returning the contexts to swap
    fn switch_to_slot(&mut self, next: Option<usize>, quantum: u16) -> Option<Switch> {
        self.quantum_left = quantum;
        let prev = self.current;
        if next == prev {
            self.tcb_mut(next).state = TaskState::Running;
            return None;
        }

        let outgoing = self.tcb_mut(prev);
        if outgoing.state == TaskState::Running {
            outgoing.state = TaskState::Ready;
        }
        self.tcb_mut(next).state = TaskState::Running;
        self.current = next;
        self.context_switches = self.context_switches.wrapping_add(1);
        trace!("switch {} -> {}", pid_of(prev), pid_of(next));

        let from: *mut Context = match prev {
            Some(i) => &mut self.tasks[i].context,
            None => &mut self.idle.context,
        };
        let to: *const Context = match next {
            Some(i) => &self.tasks[i].context,
            None => &self.idle.context,
        };
        Some(Switch { from, to })
    }

    fn reschedule(&mut self, quantum: u16) -> Option<Switch> {
        let next = self.pick_next();
        self.switch_to_slot(next, quantum)
    }
}

fn pid_of(slot: Option<usize>) -> Pid {
    slot.map_or(Pid::IDLE, |i| Pid(i as u8))
}

impl<const N: usize> Scheduler<N> {
    /// Slot indices must stay clear of `Pid::IDLE`
    const SLOTS_FIT_PID: () = assert!(N < u8::MAX as usize, "task table too large for 8-bit pids");

    /// Empty table; call `init` before use
    pub const fn new(config: SchedConfig) -> Self {
        let () = Self::SLOTS_FIT_PID;
        Self {
            inner: Mutex::new(SchedInner::new(config.quantum_ticks)),
            config,
        }
    }

    /// Clear the table, make idle the running task, arm the tick
    pub fn init(&self) {
        let quantum = self.config.quantum_ticks;
        self.with_inner(|inner| *inner = SchedInner::new(quantum));
        arch::init_tick_timer(self.config.tick_hz);
        info!(
            "scheduler: {} slots, tick {} Hz, quantum {} ticks",
            N, self.config.tick_hz, self.config.quantum_ticks
        );
    }

    pub fn config(&self) -> SchedConfig {
        self.config
    }

    /// Claim a slot for a new `Ready` task in class 0
    pub fn create(&self, entry: TaskFn, priority: Priority, stack: StackRegion) -> KernelResult<Pid> {
        self.create_in_class(entry, priority, TaskClass::DEFAULT, stack)
    }

    /// Claim a slot for a new `Ready` task tagged with `class`
    ///
    /// Fails with `TaskTableFull` once every slot is taken; the table is
    /// left untouched on any error.
    pub fn create_in_class(
        &self,
        entry: TaskFn,
        priority: Priority,
        class: TaskClass,
        stack: StackRegion,
    ) -> KernelResult<Pid> {
        if let Err(e) = stack.validate() {
            warn!("create: {}", e);
            return Err(e);
        }

        let pid = self.with_inner(|inner| -> Option<Pid> {
            let idx = inner.tasks.iter().position(|t| !t.is_active())?;
            let pid = Pid(idx as u8);
            inner.tasks[idx] = Tcb::new(pid, entry, priority, class, &stack);
            inner.task_count += 1;
            Some(pid)
        });
        let Some(pid) = pid else {
            warn!("create: task table full ({} slots)", N);
            return Err(KernelError::TaskTableFull);
        };
        debug!(
            "create: pid {} priority {} class {} stack {} bytes",
            pid,
            priority.level(),
            class.get(),
            stack.len()
        );
        Ok(pid)
    }

    /// Give up the CPU; the caller stays `Ready`
    pub fn yield_now(&self) {
        let quantum = self.config.quantum_ticks;
        self.switch_with(|inner| inner.reschedule(quantum));
    }

    /// Run `pid` next, regardless of priority
    pub fn switch_to(&self, pid: Pid) -> KernelResult<()> {
        let quantum = self.config.quantum_ticks;
        self.try_switch_with(|inner| {
            let idx = inner.slot(pid)?;
            Ok(inner.switch_to_slot(Some(idx), quantum))
        })
    }

    /// Pid of the running task (`Pid::IDLE` when idle)
    pub fn current_id(&self) -> Pid {
        self.with_inner(|inner| pid_of(inner.current))
    }

    /// Timer interrupt body
    ///
    /// Counts the tick, wakes sleepers whose delay ran out, and
    /// reschedules when the quantum expires, when idle is running and
    /// something became runnable, or when a woken task outranks the
    /// running one.
    pub fn on_tick(&self) {
        let quantum = self.config.quantum_ticks;
        self.switch_with(|inner| {
            inner.ticks = inner.ticks.wrapping_add(1);

            let mut best_woken: Option<Priority> = None;
            for task in inner.tasks.iter_mut() {
                if task.state != TaskState::Sleeping {
                    continue;
                }
                task.sleep_ticks = task.sleep_ticks.saturating_sub(1);
                if task.sleep_ticks == 0 {
                    task.state = TaskState::Ready;
                    if task.is_runnable() {
                        best_woken = Some(best_woken.map_or(task.priority, |p| p.min(task.priority)));
                    }
                }
            }

            inner.quantum_left = inner.quantum_left.saturating_sub(1);
            let preempt = match (inner.current, best_woken) {
                (Some(c), Some(p)) => p < inner.tasks[c].priority,
                _ => false,
            };
            let idle_with_work =
                inner.current.is_none() && inner.tasks.iter().any(Tcb::is_runnable);

            if inner.quantum_left == 0 || preempt || idle_with_work {
                inner.reschedule(quantum)
            } else {
                None
            }
        });
    }

    /// Sleep the running task for `ticks` timer ticks (0 = yield)
    pub fn sleep(&self, ticks: u16) -> KernelResult<()> {
        if ticks == 0 {
            return self.in_task().map(|_| self.yield_now());
        }
        let quantum = self.config.quantum_ticks;
        self.try_switch_with(|inner| {
            let c = inner.current.ok_or(KernelError::NotInTask)?;
            let task = &mut inner.tasks[c];
            task.state = TaskState::Sleeping;
            task.sleep_ticks = ticks;
            Ok(inner.reschedule(quantum))
        })
    }

    /// Park the running task until `deps` signals arrive
    #[cfg(feature = "dep-wait")]
    pub fn block(&self, deps: u8) -> KernelResult<()> {
        if deps == 0 {
            return self.in_task();
        }
        let quantum = self.config.quantum_ticks;
        self.try_switch_with(|inner| {
            let c = inner.current.ok_or(KernelError::NotInTask)?;
            let task = &mut inner.tasks[c];
            task.state = TaskState::Blocked;
            task.dependency_count = deps;
            Ok(inner.reschedule(quantum))
        })
    }

    /// Satisfy one dependency of `pid`; a `Blocked` task becomes `Ready` at zero
    ///
    /// The count drops whatever the task's state, so a task that was
    /// forced onto the CPU by `switch_to` while blocked still gets
    /// released. Does not switch: the woken task runs at the next yield
    /// or tick.
    #[cfg(feature = "dep-wait")]
    pub fn signal(&self, pid: Pid) -> KernelResult<()> {
        self.with_inner(|inner| -> KernelResult<()> {
            let idx = inner.slot(pid)?;
            let task = &mut inner.tasks[idx];
            if task.dependency_count > 0 {
                task.dependency_count -= 1;
                if task.dependency_count == 0 && task.state == TaskState::Blocked {
                    task.state = TaskState::Ready;
                }
            }
            Ok(())
        })
    }

    /// Leave idle for the first selected task
    pub fn start(&self) {
        info!("scheduler: starting with {} task(s)", self.task_count());
        self.yield_now();
    }

    /// Copy of a task's TCB
    pub fn task(&self, pid: Pid) -> Option<Tcb> {
        self.with_inner(|inner| inner.slot(pid).ok().map(|idx| inner.tasks[idx]))
    }

    pub fn state_of(&self, pid: Pid) -> Option<TaskState> {
        self.task(pid).map(|t| t.state)
    }

    pub fn task_count(&self) -> usize {
        self.with_inner(|inner| inner.task_count)
    }

    pub fn context_switches(&self) -> u32 {
        self.with_inner(|inner| inner.context_switches)
    }

    /// Ticks counted by `on_tick` since `init`
    pub fn now_ticks(&self) -> u32 {
        self.with_inner(|inner| inner.ticks)
    }

    fn in_task(&self) -> KernelResult<()> {
        match self.with_inner(|inner| inner.current) {
            Some(_) => Ok(()),
            None => Err(KernelError::NotInTask),
        }
    }

    /// Table access with interrupts off
    ///
    /// The tick handler takes the same lock, so holding it with
    /// interrupts enabled could spin the handler forever on one core.
    fn with_inner<R>(&self, f: impl FnOnce(&mut SchedInner<N>) -> R) -> R {
        arch::without_interrupts(|| f(&mut self.inner.lock()))
    }

    /// Decide under the table lock, then switch with interrupts off
    fn switch_with<F>(&self, decide: F)
    where
        F: FnOnce(&mut SchedInner<N>) -> Option<Switch>,
    {
        let irq = arch::disable_interrupts();
        let switch = decide(&mut self.inner.lock());
        Self::perform(switch);
        arch::restore_interrupts(irq);
    }

    fn try_switch_with<F>(&self, decide: F) -> KernelResult<()>
    where
        F: FnOnce(&mut SchedInner<N>) -> KernelResult<Option<Switch>>,
    {
        let irq = arch::disable_interrupts();
        let decided = decide(&mut self.inner.lock());
        let result = decided.map(Self::perform);
        arch::restore_interrupts(irq);
        result
    }

    fn perform(switch: Option<Switch>) {
        if let Some(Switch { from, to }) = switch {
            // SAFETY: both pointers target TCBs inside `self.inner`, which
            // outlives this call; interrupts are disabled and the core is
            // single, so nothing else touches them until the switch is done.
            unsafe { arch::switch_context(from, to) };
        }
    }
}

impl<const N: usize> Relax for Scheduler<N> {
    fn relax(&self) {
        self.yield_now();
    }
}
