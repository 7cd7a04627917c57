//! Host simulation of the architecture layer
//!
//! Each host thread models one execution context: it owns an
//! interrupt-enable flag and a simulated stack-pointer register.
//! `switch_context` moves that register in and out of `Context`s, which
//! is all the scheduler needs to be exercised off-target.
//!
//! Author: Moroya Sakamoto

use portable_atomic::{AtomicU32, AtomicU8, Ordering};

use super::IrqState;
use crate::task::{StackRegion, TaskFn};

static TICK_HZ: AtomicU32 = AtomicU32::new(0);

#[cfg(any(test, feature = "std"))]
mod cpu {
    use core::cell::Cell;

    std::thread_local! {
        static IRQ_ENABLED: Cell<bool> = const { Cell::new(true) };
        static SP: Cell<usize> = const { Cell::new(0) };
    }

    pub(super) fn irq_enabled() -> bool {
        IRQ_ENABLED.with(Cell::get)
    }

    pub(super) fn set_irq_enabled(on: bool) {
        IRQ_ENABLED.with(|c| c.set(on));
    }

    pub(super) fn sp() -> usize {
        SP.with(Cell::get)
    }

    pub(super) fn set_sp(sp: usize) {
        SP.with(|c| c.set(sp));
    }
}

#[cfg(not(any(test, feature = "std")))]
mod cpu {
    use portable_atomic::{AtomicBool, AtomicUsize, Ordering};

    static IRQ_ENABLED: AtomicBool = AtomicBool::new(true);
    static SP: AtomicUsize = AtomicUsize::new(0);

    pub(super) fn irq_enabled() -> bool {
        IRQ_ENABLED.load(Ordering::Relaxed)
    }

    pub(super) fn set_irq_enabled(on: bool) {
        IRQ_ENABLED.store(on, Ordering::Relaxed);
    }

    pub(super) fn sp() -> usize {
        SP.load(Ordering::Relaxed)
    }

    pub(super) fn set_sp(sp: usize) {
        SP.store(sp, Ordering::Relaxed);
    }
}

/// Disable interrupts, returning the previous state
#[inline]
pub fn disable_interrupts() -> IrqState {
    let was = cpu::irq_enabled();
    cpu::set_irq_enabled(false);
    IrqState(was as u8)
}

/// Restore the state returned by `disable_interrupts`
#[inline]
pub fn restore_interrupts(state: IrqState) {
    cpu::set_irq_enabled(state.0 != 0);
}

#[inline]
pub fn interrupts_enabled() -> bool {
    cpu::irq_enabled()
}

/// Set the cell to 1 and report whether it was already non-zero
#[inline]
pub fn atomic_test_and_set(cell: &AtomicU8) -> bool {
    let irq = disable_interrupts();
    let prev = cell.swap(1, Ordering::Acquire);
    restore_interrupts(irq);
    prev != 0
}

/// Arm the periodic tick (recorded only; the host drives ticks by hand)
pub fn init_tick_timer(tick_hz: u32) {
    TICK_HZ.store(tick_hz, Ordering::Relaxed);
}

/// Frequency passed to the last `init_tick_timer`
pub fn tick_hz() -> u32 {
    TICK_HZ.load(Ordering::Relaxed)
}

/// Simulated stack-pointer register of the calling context
pub fn current_stack_pointer() -> usize {
    cpu::sp()
}

/// Saved execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    sp: usize,
}

impl Context {
    pub const fn empty() -> Self {
        Self { sp: 0 }
    }

    /// Initial frame: one return-address slot below the top of the stack
    pub fn prepare(_entry: TaskFn, stack: &StackRegion) -> Self {
        Self {
            sp: stack.top() - core::mem::size_of::<usize>(),
        }
    }

    pub fn stack_pointer(&self) -> usize {
        self.sp
    }
}

/// Save the running context into `from` and resume `to`
///
/// # Safety
/// Both pointers must be valid, and interrupts must be disabled.
pub unsafe fn switch_context(from: *mut Context, to: *const Context) {
    // SAFETY: caller guarantees both pointers are valid for this call.
    unsafe {
        (*from).sp = cpu::sp();
        cpu::set_sp((*to).sp);
    }
}
