//! The interface between the kernel and an architecture port.

use crate::error::Result;
use crate::task::TaskId;

/// The signature of a task entry function. The parameter is the value given
/// at task creation, passed through verbatim.
pub type TaskEntry = fn(*mut ());

/// Implemented by a port.
///
/// A port provides the execution environment: a critical section covering
/// all kernel state accesses, per-task execution contexts, and the actual
/// transfer of control between contexts.
///
/// # Safety
///
/// Implementing a port is inherently unsafe because the kernel's memory
/// safety rests on the critical section being exclusive: between
/// [`enter_critical`] and the matching [`leave_critical`], no other context
/// may enter the critical section.
///
/// These methods are only meant to be called by the kernel.
///
/// [`enter_critical`]: Self::enter_critical
/// [`leave_critical`]: Self::leave_critical
pub unsafe trait Port: Sync + Sized + 'static {
    /// Enter the critical section, blocking kernel-managed interrupts (or
    /// the hosted equivalent) until [`leave_critical`] is called.
    ///
    /// [`leave_critical`]: Self::leave_critical
    fn enter_critical(&self);

    /// Leave the critical section entered by [`enter_critical`].
    ///
    /// [`enter_critical`]: Self::enter_critical
    fn leave_critical(&self);

    /// Prepare the execution context of a new task so that `entry(param)`
    /// runs the next time the task receives control.
    ///
    /// Called with the critical section active. May fail, e.g. if the port
    /// cannot allocate a stack; the kernel then rolls the creation back.
    fn initialize_task_state(&self, task: TaskId, entry: TaskEntry, param: *mut ()) -> Result<()>;

    /// Release any per-task resources acquired by
    /// [`initialize_task_state`]. Called with the critical section active.
    ///
    /// [`initialize_task_state`]: Self::initialize_task_state
    fn deinitialize_task_state(&self, task: TaskId);

    /// Transfer control to `first`, discarding the startup context.
    ///
    /// Called exactly once, with the critical section active. The first task
    /// starts executing with the critical section inactive.
    fn dispatch_first_task(&self, first: TaskId) -> !;

    /// Suspend `prev` and run `next`, returning when `prev` is dispatched
    /// again.
    ///
    /// Called with the critical section active. The port releases the
    /// critical section as part of the switch and re-enters it before
    /// returning, so from the caller's perspective the critical section is
    /// active across the call.
    fn context_switch(&self, prev: TaskId, next: TaskId);

    /// Like [`context_switch`], but invoked at the exit of the outermost
    /// interrupt handler to switch away from the interrupted task.
    ///
    /// [`context_switch`]: Self::context_switch
    fn interrupt_context_switch(&self, prev: TaskId, next: TaskId);

    /// Abandon `prev` forever and run `next`. The context of `prev` is never
    /// resumed. Called with the critical section active.
    fn exit_and_dispatch(&self, prev: TaskId, next: TaskId) -> !;

    /// Called repeatedly by the idle task with the critical section
    /// inactive. A hosted port can use this to deliver simulated timer
    /// interrupts; a bare-metal port would typically sleep the processor.
    fn idle(&self) {}
}
