//! AVR8 (ATmega) implementation
//!
//! Single core, no compare-and-swap: atomicity comes from clearing the
//! I bit in SREG around every read-modify-write.
//!
//! A switched-out task keeps its call-saved registers (r2-r17, r28,
//! r29) and return address on its own stack; `Context` holds only SP.
//!
//! Author: Moroya Sakamoto

use core::arch::{asm, naked_asm};
use core::ptr::write_volatile;

use portable_atomic::{AtomicU8, Ordering};

use super::IrqState;
use crate::task::{StackRegion, TaskFn};

/// CPU clock the Timer0 divider is computed from
const CPU_HZ: u32 = 16_000_000;

const SREG_I: u8 = 1 << 7;

// Data-space addresses of the Timer0 registers
const TCCR0A: *mut u8 = 0x44 as *mut u8;
const TCCR0B: *mut u8 = 0x45 as *mut u8;
const OCR0A: *mut u8 = 0x47 as *mut u8;
const TIMSK0: *mut u8 = 0x6E as *mut u8;

#[inline(always)]
pub fn disable_interrupts() -> IrqState {
    let sreg: u8;
    // SAFETY: reading SREG and clearing I has no memory effects.
    unsafe {
        asm!("in {0}, 0x3F", "cli", out(reg) sreg, options(nostack));
    }
    IrqState(sreg)
}

#[inline(always)]
pub fn restore_interrupts(state: IrqState) {
    // SAFETY: writes back a value previously read from SREG.
    unsafe {
        asm!("out 0x3F, {0}", in(reg) state.0, options(nostack));
    }
}

#[inline(always)]
pub fn interrupts_enabled() -> bool {
    let sreg: u8;
    // SAFETY: plain register read.
    unsafe {
        asm!("in {0}, 0x3F", out(reg) sreg, options(nomem, nostack));
    }
    sreg & SREG_I != 0
}

#[inline(always)]
pub fn atomic_test_and_set(cell: &AtomicU8) -> bool {
    let irq = disable_interrupts();
    let prev = cell.load(Ordering::Relaxed);
    cell.store(1, Ordering::Relaxed);
    restore_interrupts(irq);
    prev != 0
}

/// Timer0 in CTC mode, prescaler 64, compare-match interrupt enabled
pub fn init_tick_timer(tick_hz: u32) {
    let hz = if tick_hz == 0 { 1 } else { tick_hz };
    let top = (CPU_HZ / 64 / hz).saturating_sub(1).min(u8::MAX as u32) as u8;
    // SAFETY: fixed Timer0 register addresses on ATmega parts.
    unsafe {
        write_volatile(TCCR0A, 1 << 1);
        write_volatile(TCCR0B, 0b011);
        write_volatile(OCR0A, top);
        write_volatile(TIMSK0, 1 << 1);
    }
}

/// Call-saved registers pushed by `switch_context`
const SAVED_REGS: usize = 18;

/// Saved stack pointer; registers live on the task's own stack
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    sp: u16,
}

impl Context {
    pub const fn empty() -> Self {
        Self { sp: 0 }
    }

    /// Lay out the frame `switch_context` pops on first switch-in
    ///
    /// Top down: the trampoline as return address, then the register
    /// block with `entry` in r2:r3 and zeros elsewhere.
    pub fn prepare(entry: TaskFn, stack: &StackRegion) -> Self {
        let ret = (task_trampoline as usize as u16).to_le_bytes();
        let start = (entry as usize as u16).to_le_bytes();
        let top = stack.top() as *mut u8;
        // SAFETY: StackRegion is an exclusively owned 'static buffer of
        // at least MIN_STACK_BYTES, which covers the 2 + SAVED_REGS bytes
        // written below the top.
        unsafe {
            write_volatile(top.sub(1), ret[0]);
            write_volatile(top.sub(2), ret[1]);
            // r2 is pushed first, so it sits highest
            write_volatile(top.sub(3), start[0]);
            write_volatile(top.sub(4), start[1]);
            for offset in 5..=2 + SAVED_REGS {
                write_volatile(top.sub(offset), 0);
            }
        }
        Self {
            sp: (stack.top() - (3 + SAVED_REGS)) as u16,
        }
    }

    pub fn stack_pointer(&self) -> usize {
        self.sp as usize
    }
}

/// First code a new task runs: enable interrupts and jump to r3:r2
#[unsafe(naked)]
unsafe extern "C" fn task_trampoline() -> ! {
    naked_asm!("sei", "movw r30, r2", "ijmp");
}

/// Push the call-saved registers, store SP into `from`, load SP from
/// `to`, pop that context's registers and return into it
///
/// # Safety
/// Interrupts must be disabled and `to` must hold a prepared or saved context.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_from: *mut Context, _to: *const Context) {
    // from = r25:r24, to = r23:r22
    naked_asm!(
        "push r2", "push r3", "push r4", "push r5",
        "push r6", "push r7", "push r8", "push r9",
        "push r10", "push r11", "push r12", "push r13",
        "push r14", "push r15", "push r16", "push r17",
        "push r28", "push r29",
        "in r18, 0x3D",
        "in r19, 0x3E",
        "movw r30, r24",
        "st Z, r18",
        "std Z+1, r19",
        "movw r30, r22",
        "ld r18, Z",
        "ldd r19, Z+1",
        "out 0x3E, r19",
        "out 0x3D, r18",
        "pop r29", "pop r28",
        "pop r17", "pop r16", "pop r15", "pop r14",
        "pop r13", "pop r12", "pop r11", "pop r10",
        "pop r9", "pop r8", "pop r7", "pop r6",
        "pop r5", "pop r4", "pop r3", "pop r2",
        "ret",
    );
}
