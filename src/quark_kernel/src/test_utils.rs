//! Helpers for in-crate unit tests.
//!
//! `DummyPort` performs no real context switching; "switching" amounts to
//! the kernel updating its notion of the current task. That makes the
//! scheduler's decisions directly observable from straight-line test code:
//! after an operation, `current_task` is whatever the scheduler picked.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::klock::KLock;
use crate::port::{Port, TaskEntry};
use crate::state::KernelState;
use crate::task::TaskId;
use crate::{Kernel, Result};

#[derive(Default)]
pub(crate) struct DummyPort {
    critical: AtomicBool,
    pub switches: Mutex<Vec<(TaskId, TaskId)>>,
}

unsafe impl Port for DummyPort {
    fn enter_critical(&self) {
        let was = self.critical.swap(true, Ordering::SeqCst);
        assert!(!was, "critical section entered twice");
    }

    fn leave_critical(&self) {
        let was = self.critical.swap(false, Ordering::SeqCst);
        assert!(was, "critical section left while inactive");
    }

    fn initialize_task_state(&self, _task: TaskId, _entry: TaskEntry, _param: *mut ()) -> Result<()> {
        Ok(())
    }

    fn deinitialize_task_state(&self, _task: TaskId) {}

    fn dispatch_first_task(&self, _first: TaskId) -> ! {
        unreachable!("tests never dispatch for real");
    }

    fn context_switch(&self, prev: TaskId, next: TaskId) {
        self.switches.lock().unwrap().push((prev, next));
    }

    fn interrupt_context_switch(&self, prev: TaskId, next: TaskId) {
        self.switches.lock().unwrap().push((prev, next));
    }

    fn exit_and_dispatch(&self, _prev: TaskId, _next: TaskId) -> ! {
        panic!("exit_and_dispatch");
    }
}

pub(crate) fn dummy_entry(_: *mut ()) {}

/// Build a started kernel plus one task per entry of `prios`, without going
/// through a real port dispatch. The kernel's current task afterwards is
/// whatever the scheduler picked last.
pub(crate) fn kernel_with_tasks(prios: &[u8]) -> (Kernel<DummyPort>, Vec<TaskId>) {
    let kernel = Kernel::new(DummyPort::default());
    {
        let mut lock = kernel.lock();
        let idle = kernel
            .create_task_in(&mut lock, dummy_entry, core::ptr::null_mut(), 0)
            .unwrap();
        let st = lock.state();
        st.current = idle;
        st.running = true;
        st.in_interrupt = 0;
    }
    let tasks = prios
        .iter()
        .map(|&p| {
            kernel
                .task_create(dummy_entry, core::ptr::null_mut(), p)
                .unwrap()
        })
        .collect();
    (kernel, tasks)
}

/// Run `f` with the kernel state borrowed.
pub(crate) fn with_state<P: Port, R>(k: &Kernel<P>, f: impl FnOnce(&mut KernelState) -> R) -> R {
    let mut lock: KLock<'_, P> = k.lock();
    f(lock.state())
}

/// Deliver `n` timer interrupts.
pub(crate) fn run_ticks<P: Port>(k: &Kernel<P>, n: u32) {
    for _ in 0..n {
        k.enter_interrupt();
        k.tick();
        k.exit_interrupt();
    }
}
