//! Cancellation of polling loops

use core::sync::atomic::{AtomicBool, Ordering};

/// Checked once per iteration of every polling loop.
///
/// When it reports `true`, the loop stops and returns
/// [`Error::Cancelled`](crate::Error::Cancelled). The hardware is left as
/// it was; call [`Sam::reset`](crate::Sam::reset) before starting another
/// capture on the same block.
pub trait Cancel {
    /// Returns `true` once cancellation has been requested.
    fn is_cancelled(&self) -> bool;
}

/// Never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct Never;

impl Cancel for Never {
    #[inline(always)]
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// A cancellation flag that another context, like an interrupt handler,
/// can raise.
#[derive(Debug, Default)]
pub struct CancelToken(AtomicBool);

impl CancelToken {
    /// A token that hasn't been cancelled.
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl Cancel for CancelToken {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl<C: Cancel + ?Sized> Cancel for &C {
    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}
