//! Architecture layer: the three primitives the core needs
//!
//! `disable_interrupts` / `restore_interrupts` / `atomic_test_and_set`,
//! plus the opaque saved execution `Context` the scheduler swaps.
//! Nothing outside this module and the scheduler touches register state.
//!
//! Author: Moroya Sakamoto

#[cfg(target_arch = "avr")]
mod avr;
#[cfg(target_arch = "avr")]
pub use avr::{
    atomic_test_and_set, disable_interrupts, init_tick_timer, interrupts_enabled,
    restore_interrupts, switch_context, Context,
};

#[cfg(not(target_arch = "avr"))]
mod host;
#[cfg(not(target_arch = "avr"))]
pub use host::{
    atomic_test_and_set, current_stack_pointer, disable_interrupts, init_tick_timer,
    interrupts_enabled, restore_interrupts, switch_context, tick_hz, Context,
};

/// Interrupt-enable state captured by `disable_interrupts`
///
/// Opaque: the status register on AVR, a 0/1 flag on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqState(pub(crate) u8);

/// Run `f` with interrupts disabled, restoring the previous state afterwards
#[inline]
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let irq = disable_interrupts();
    let result = f();
    restore_interrupts(irq);
    result
}
