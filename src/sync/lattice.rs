//! Golden-ratio ticket lattice
//!
//! Each locker draws a ticket by adding a fixed stride to a shared
//! counter. The stride is the golden-ratio conjugate scaled to the
//! ticket width, so successive tickets scatter evenly over the ring and
//! every step is shorter than half of it. That keeps the wraparound
//! comparison `is_older` consistent with draw order between any two
//! neighbouring tickets.
//!
//! Author: Moroya Sakamoto

use portable_atomic::Ordering;

#[cfg(any(feature = "word16", target_arch = "avr"))]
mod width {
    pub type Ticket = u16;
    pub type AtomicTicket = portable_atomic::AtomicU16;
    /// 2^16 - round(0.618034 * 2^16)
    pub const GOLDEN_STRIDE: Ticket = 0x61C9;
}

#[cfg(not(any(feature = "word16", target_arch = "avr")))]
mod width {
    pub type Ticket = u32;
    pub type AtomicTicket = portable_atomic::AtomicU32;
    /// 2^32 - round(0.618034 * 2^32)
    pub const GOLDEN_STRIDE: Ticket = 0x61C8_8647;
}

pub use width::{AtomicTicket, Ticket, GOLDEN_STRIDE};

/// Unsigned counter word with wraparound ordering
pub trait SeqWord: Copy + Eq {
    /// Half the ring; distances at or beyond this are "not older"
    const HALF: Self;
    const ZERO: Self;

    fn wrapping_sub(self, rhs: Self) -> Self;
    fn less_than(self, rhs: Self) -> bool;
}

macro_rules! impl_seq_word {
    ($($t:ty),*) => {$(
        impl SeqWord for $t {
            const HALF: Self = 1 << (<$t>::BITS - 1);
            const ZERO: Self = 0;

            #[inline]
            fn wrapping_sub(self, rhs: Self) -> Self {
                <$t>::wrapping_sub(self, rhs)
            }

            #[inline]
            fn less_than(self, rhs: Self) -> bool {
                self < rhs
            }
        }
    )*};
}

impl_seq_word!(u8, u16, u32);

/// True iff `a` was drawn before `b`, modulo wraparound
///
/// Holds when the forward distance from `a` to `b` is non-zero and less
/// than half the ring.
#[inline]
pub fn is_older<W: SeqWord>(a: W, b: W) -> bool {
    let d = b.wrapping_sub(a);
    d != W::ZERO && d.less_than(W::HALF)
}

/// Shared ticket dispenser
#[derive(Debug)]
pub struct Lattice {
    counter: AtomicTicket,
}

impl Lattice {
    pub const fn new() -> Self {
        Self::starting_at(0)
    }

    /// Dispenser whose first ticket is `seed + GOLDEN_STRIDE`
    pub const fn starting_at(seed: Ticket) -> Self {
        Self {
            counter: AtomicTicket::new(seed),
        }
    }

    /// Draw a fresh ticket
    #[inline]
    pub fn next_ticket(&self) -> Ticket {
        self.counter
            .fetch_add(GOLDEN_STRIDE, Ordering::AcqRel)
            .wrapping_add(GOLDEN_STRIDE)
    }

    /// Most recently issued ticket
    pub fn current(&self) -> Ticket {
        self.counter.load(Ordering::Acquire)
    }
}

impl Default for Lattice {
    fn default() -> Self {
        Self::new()
    }
}
