//! Simulator port: runs the Quark kernel on a hosted platform, backing
//! every task with an OS thread.
//!
//! The port maintains the invariant that at most one task thread executes
//! at a time. A context switch parks the outgoing thread on a condition
//! variable and releases the incoming one; the kernel's critical section is
//! a flag under the same mutex, so "disabling interrupts" simply excludes
//! the other (parked) threads.
//!
//! Simulated timer interrupts are delivered from the idle hook: a test
//! installs a closure with [`StdPort::set_idle_hook`] that calls
//! [`enter_interrupt`], [`tick`] and [`exit_interrupt`] on the kernel.
//!
//! [`enter_interrupt`]: quark_kernel::Kernel::enter_interrupt
//! [`tick`]: quark_kernel::Kernel::tick
//! [`exit_interrupt`]: quark_kernel::Kernel::exit_interrupt

use once_cell::sync::OnceCell;
use quark_kernel::cfg::MAX_TASKS;
use quark_kernel::{Error, Kernel, Port, Result, TaskEntry, TaskId};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::Duration;

/// A closure run by the idle task. Install it before [`boot`]; it is the
/// usual place to inject simulated timer interrupts.
pub type IdleHook = Box<dyn Fn() + Send>;

struct SchedState {
    /// The critical-section flag. Guards all kernel state.
    critical: bool,
    /// The task whose backing thread may execute.
    running: Option<TaskId>,
    /// Whether each task slot has a live backing thread.
    live: [bool; MAX_TASKS],
}

/// The hosted port. Create one through [`new_kernel`].
pub struct StdPort {
    sched: Mutex<SchedState>,
    cond: Condvar,
    kernel: OnceCell<&'static Kernel<StdPort>>,
    idle_hook: Mutex<Option<IdleHook>>,
}

/// A task parameter smuggled into the backing thread. Only the task entry
/// it was destined for ever dereferences it.
struct SendPtr(*mut ());
unsafe impl Send for SendPtr {}

/// Create a kernel instance driven by a fresh [`StdPort`]. The instance is
/// leaked; a simulated kernel never shuts down.
pub fn new_kernel() -> &'static Kernel<StdPort> {
    let kernel: &'static Kernel<StdPort> = Box::leak(Box::new(Kernel::new(StdPort {
        sched: Mutex::new(SchedState {
            critical: false,
            running: None,
            live: [false; MAX_TASKS],
        }),
        cond: Condvar::new(),
        kernel: OnceCell::new(),
        idle_hook: Mutex::new(None),
    })));
    kernel
        .port()
        .kernel
        .set(kernel)
        .unwrap_or_else(|_| unreachable!());
    kernel
}

/// Start the kernel on a dedicated boot thread and return immediately.
pub fn boot(
    kernel: &'static Kernel<StdPort>,
    entry: TaskEntry,
    param: *mut (),
    priority: u8,
) -> Result<()> {
    let param = SendPtr(param);
    thread::Builder::new()
        .name("boot".to_owned())
        .spawn(move || {
            // Capture the wrapper whole; capturing just the field would
            // capture a bare `*mut ()`, which is not `Send`
            let param = param;
            kernel.start(entry, param.0, priority)
        })
        .map_err(|_| Error::NoMem)?;
    Ok(())
}

impl StdPort {
    /// Install the idle hook. Call this before [`boot`]; the hook runs on
    /// the idle task's thread with the critical section inactive.
    pub fn set_idle_hook(&self, hook: IdleHook) {
        *self.idle_hook.lock().unwrap() = Some(hook);
    }
}

/// The body of a task's backing thread: wait to be dispatched for the
/// first time, run the entry function, then retire the task.
fn task_main(kernel: &'static Kernel<StdPort>, task: TaskId, entry: TaskEntry, param: SendPtr) {
    let port = kernel.port();
    {
        let mut sched = port.sched.lock().unwrap();
        loop {
            if !sched.live[task.as_usize()] {
                // Rolled back before ever being dispatched
                return;
            }
            if sched.running == Some(task) && !sched.critical {
                break;
            }
            sched = port.cond.wait(sched).unwrap();
        }
    }
    log::trace!("task {} started", task.as_usize());
    entry(param.0);
    log::trace!("task {} returned from its entry", task.as_usize());
    kernel.task_exit()
}

unsafe impl Port for StdPort {
    fn enter_critical(&self) {
        let mut sched = self.sched.lock().unwrap();
        while sched.critical {
            sched = self.cond.wait(sched).unwrap();
        }
        sched.critical = true;
    }

    fn leave_critical(&self) {
        let mut sched = self.sched.lock().unwrap();
        debug_assert!(sched.critical);
        sched.critical = false;
        self.cond.notify_all();
    }

    fn initialize_task_state(&self, task: TaskId, entry: TaskEntry, param: *mut ()) -> Result<()> {
        let kernel = *self.kernel.get().ok_or(Error::Fail)?;
        self.sched.lock().unwrap().live[task.as_usize()] = true;
        let param = SendPtr(param);
        let spawned = thread::Builder::new()
            .name(format!("task{}", task.as_usize()))
            .spawn(move || task_main(kernel, task, entry, param));
        if spawned.is_err() {
            self.sched.lock().unwrap().live[task.as_usize()] = false;
            return Err(Error::NoMem);
        }
        log::trace!("spawned a backing thread for task {}", task.as_usize());
        Ok(())
    }

    fn deinitialize_task_state(&self, task: TaskId) {
        let mut sched = self.sched.lock().unwrap();
        sched.live[task.as_usize()] = false;
        self.cond.notify_all();
    }

    fn dispatch_first_task(&self, first: TaskId) -> ! {
        log::trace!("dispatching the first task {}", first.as_usize());
        {
            let mut sched = self.sched.lock().unwrap();
            debug_assert!(sched.critical);
            sched.critical = false;
            sched.running = Some(first);
            self.cond.notify_all();
        }
        // The boot thread has no further role
        loop {
            thread::park();
        }
    }

    fn context_switch(&self, prev: TaskId, next: TaskId) {
        log::trace!(
            "context switch {} -> {}",
            prev.as_usize(),
            next.as_usize()
        );
        let mut sched = self.sched.lock().unwrap();
        debug_assert!(sched.critical);
        sched.critical = false;
        sched.running = Some(next);
        self.cond.notify_all();
        loop {
            if sched.running == Some(prev) && !sched.critical {
                break;
            }
            sched = self.cond.wait(sched).unwrap();
        }
        sched.critical = true;
    }

    fn interrupt_context_switch(&self, prev: TaskId, next: TaskId) {
        // Interrupts are simulated on the interrupted task's thread, so
        // this is an ordinary switch
        self.context_switch(prev, next);
    }

    fn exit_and_dispatch(&self, prev: TaskId, next: TaskId) -> ! {
        log::trace!(
            "task {} exiting, dispatching {}",
            prev.as_usize(),
            next.as_usize()
        );
        {
            let mut sched = self.sched.lock().unwrap();
            debug_assert!(sched.critical);
            sched.critical = false;
            sched.running = Some(next);
            self.cond.notify_all();
        }
        loop {
            thread::park();
        }
    }

    fn idle(&self) {
        let hook = self.idle_hook.lock().unwrap();
        if let Some(hook) = &*hook {
            hook();
        } else {
            thread::sleep(Duration::from_micros(100));
        }
    }
}
