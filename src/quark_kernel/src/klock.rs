//! The kernel-state lock.
//!
//! All kernel state is guarded by the port's critical section. [`KLock`] is
//! an RAII guard pairing [`Port::enter_critical`] with
//! [`Port::leave_critical`] and granting access to the state for as long as
//! it is held.

use crate::port::Port;
use crate::state::KernelState;
use crate::Kernel;

/// RAII guard for the port's critical section.
pub(crate) struct KLock<'a, P: Port> {
    kernel: &'a Kernel<P>,
}

impl<P: Port> Kernel<P> {
    /// Enter the critical section and return a guard granting access to the
    /// kernel state.
    pub(crate) fn lock(&self) -> KLock<'_, P> {
        self.port().enter_critical();
        KLock { kernel: self }
    }
}

impl<P: Port> KLock<'_, P> {
    /// Borrow the kernel state.
    ///
    /// The returned borrow must not be kept alive across a call that can
    /// context-switch (the state may be mutated by other tasks while this
    /// one is suspended); re-borrow after such a call instead.
    #[inline]
    pub(crate) fn state(&mut self) -> &mut KernelState {
        // Safety: the critical section is held for the lifetime of the
        // guard, making this the only context accessing the state. Each call
        // derives a fresh borrow from the cell, so no reference is retained
        // across a suspension point.
        unsafe { &mut *self.kernel.state_ptr() }
    }
}

impl<P: Port> Drop for KLock<'_, P> {
    fn drop(&mut self) {
        self.kernel.port().leave_critical();
    }
}
