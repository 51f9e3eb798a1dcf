//! Software interrupts.
//!
//! A fixed set of software interrupt lines, each with at most one handler.
//! Raising a line enqueues a request; the queue is drained in FIFO order at
//! the next scheduler entry or interrupt exit, with the handlers executing
//! as interrupt-level code. A request raised while the queue is full, or
//! for an out-of-range line, is dropped silently.

use crate::cfg::{NUM_SOFT_INTS, SOFT_INT_QUEUE_LEN};
use crate::error::{Error, Result};
use crate::klock::KLock;
use crate::port::Port;
use crate::utils::Init;
use crate::Kernel;

/// The signature of a software interrupt handler. Receives the parameter
/// given to [`Kernel::soft_int`].
pub type SoftIntHandler = fn(usize);

#[derive(Debug, Clone, Copy)]
pub(crate) struct SoftIntReq {
    pub intno: u8,
    pub param: usize,
}

impl Init for SoftIntReq {
    const INIT: Self = Self { intno: 0, param: 0 };
}

impl<P: Port> Kernel<P> {
    /// Install a handler on a software interrupt line. Fails with
    /// [`Error::Fail`] if the line already has one.
    pub fn soft_int_set_handler(&self, intno: u8, handler: SoftIntHandler) -> Result<()> {
        let mut lock = self.lock();
        let st = lock.state();
        let slot = st
            .softint_handlers
            .get_mut(intno as usize)
            .ok_or(Error::BadArg)?;
        if slot.is_some() {
            return Err(Error::Fail);
        }
        *slot = Some(handler);
        Ok(())
    }

    /// Remove the handler of a software interrupt line.
    pub fn soft_int_del_handler(&self, intno: u8) -> Result<()> {
        let mut lock = self.lock();
        let st = lock.state();
        let slot = st
            .softint_handlers
            .get_mut(intno as usize)
            .ok_or(Error::BadArg)?;
        *slot = None;
        Ok(())
    }

    /// Raise a software interrupt. Callable from any context, including
    /// hardware interrupt handlers. The request is dropped silently when
    /// the line number is out of range or the queue is full.
    pub fn soft_int(&self, intno: u8, param: usize) {
        let mut lock = self.lock();
        {
            let st = lock.state();
            if intno as usize >= NUM_SOFT_INTS {
                return;
            }
            let next_in = (st.softint_in + 1) % (SOFT_INT_QUEUE_LEN + 1);
            if next_in == st.softint_out {
                return;
            }
            st.softint_queue[st.softint_in] = SoftIntReq { intno, param };
            st.softint_in = next_in;
        }
        // At task level the queue is serviced right away; from an interrupt
        // it is drained at the outermost exit
        self.schedule(&mut lock);
    }

    /// Drain the software interrupt queue, running each queued handler once
    /// at interrupt level.
    pub(crate) fn run_soft_ints(&self, lock: &mut KLock<'_, P>) {
        {
            let st = lock.state();
            if st.softint_in == st.softint_out {
                return;
            }
            st.in_interrupt += 1;
        }
        loop {
            let req = {
                let st = lock.state();
                if st.softint_in == st.softint_out {
                    break;
                }
                let req = st.softint_queue[st.softint_out];
                st.softint_out = (st.softint_out + 1) % (SOFT_INT_QUEUE_LEN + 1);
                req
            };
            let handler = { lock.state().softint_handlers[req.intno as usize] };
            if let Some(handler) = handler {
                // Handlers run with the critical section released so they
                // can invoke kernel services themselves
                self.port().leave_critical();
                handler(req.param);
                self.port().enter_critical();
            }
        }
        lock.state().in_interrupt -= 1;
    }
}
