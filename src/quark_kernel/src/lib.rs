//! The Quark kernel: a compact priority-preemptive real-time kernel with
//! optional round-robin scheduling among tasks of equal priority.
//!
//! The kernel is independent of the target architecture; everything
//! machine-specific is supplied by an implementation of the [`Port`] trait
//! injected at construction. A hosted simulation port for testing lives in
//! the `quark_port_std` crate.
//!
//! # Bringing the kernel up
//!
//! ```no_run
//! use quark_kernel::Kernel;
//! # use quark_kernel::{Port, Result, TaskEntry, TaskId};
//! # struct SomePort;
//! # unsafe impl Port for SomePort {
//! #     fn enter_critical(&self) {}
//! #     fn leave_critical(&self) {}
//! #     fn initialize_task_state(&self, _: TaskId, _: TaskEntry, _: *mut ()) -> Result<()> { Ok(()) }
//! #     fn deinitialize_task_state(&self, _: TaskId) {}
//! #     fn dispatch_first_task(&self, _: TaskId) -> ! { loop {} }
//! #     fn context_switch(&self, _: TaskId, _: TaskId) {}
//! #     fn interrupt_context_switch(&self, _: TaskId, _: TaskId) {}
//! #     fn exit_and_dispatch(&self, _: TaskId, _: TaskId) -> ! { loop {} }
//! # }
//!
//! fn first_task(_: *mut ()) {
//!     // create further tasks, semaphores, timers, ...
//! }
//!
//! fn main() {
//!     let kernel = Box::leak(Box::new(Kernel::new(SomePort)));
//!     kernel.start(first_task, core::ptr::null_mut(), 3)
//! }
//! ```

#![cfg_attr(not(test), no_std)]

use core::cell::UnsafeCell;

pub mod cfg;
mod error;
mod event;
mod flag;
mod interrupt;
mod klock;
mod msgbox;
mod mutex;
mod port;
mod sched;
mod semaphore;
mod softint;
mod state;
mod task;
mod timer;
mod utils;

#[cfg(test)]
mod test_utils;

pub use self::{
    error::{Error, Result},
    event::WaitResult,
    flag::{FlagId, FlagMode},
    msgbox::MsgId,
    mutex::MutexId,
    port::{Port, TaskEntry},
    semaphore::SemaId,
    softint::SoftIntHandler,
    task::TaskId,
    timer::TimerId,
};

/// Durations and timeouts, in timer ticks.
pub type Ticks = u32;

/// A timeout value that never expires.
pub const INFINITE: Ticks = Ticks::MAX;

/// A kernel instance: the port and all kernel state.
///
/// The state is guarded by the port's critical section; see
/// [`Port::enter_critical`].
pub struct Kernel<P: Port> {
    port: P,
    state: UnsafeCell<state::KernelState>,
}

// Safety: the state cell is only accessed through `KLock`, which holds the
// port's critical section, serializing all accesses.
unsafe impl<P: Port> Sync for Kernel<P> {}

impl<P: Port> Kernel<P> {
    /// Construct a kernel around a port. Nothing runs until
    /// [`start`](Self::start) is called.
    pub fn new(port: P) -> Self {
        Self {
            port,
            state: UnsafeCell::new(state::KernelState::new()),
        }
    }

    /// The port this kernel was built on.
    pub fn port(&self) -> &P {
        &self.port
    }

    pub(crate) fn state_ptr(&self) -> *mut state::KernelState {
        self.state.get()
    }

    /// Bring the kernel up: create the idle task and the first application
    /// task, then dispatch the most urgent of the two. Never returns.
    ///
    /// # Panics
    ///
    /// Panics if the port fails to set up the initial task contexts.
    pub fn start(&'static self, entry: TaskEntry, param: *mut (), priority: u8) -> ! {
        let mut lock = self.lock();
        let idle = match self.create_task_in(
            &mut lock,
            idle_main::<P>,
            self as *const Self as *mut (),
            0,
        ) {
            Ok(t) => t,
            Err(_) => panic!("failed to create the idle task"),
        };
        if self.create_task_in(&mut lock, entry, param, priority).is_err() {
            panic!("failed to create the first task");
        }
        let first = {
            let st = lock.state();
            st.current = idle;
            st.running = true;
            st.in_interrupt = 0;
            let first = sched::select_next(st);
            st.current = first;
            first
        };
        // The critical section is handed over to the first task's context
        core::mem::forget(lock);
        self.port.dispatch_first_task(first)
    }
}

/// Body of the idle task. Runs the scheduler and the port's idle hook in a
/// loop; it never blocks, so the ready table is never empty.
fn idle_main<P: Port>(param: *mut ()) {
    // `start` passes the kernel instance, which is 'static
    let kernel: &Kernel<P> = unsafe { &*param.cast() };
    loop {
        let mut lock = kernel.lock();
        kernel.schedule(&mut lock);
        drop(lock);
        kernel.port().idle();
    }
}
