//! End-to-end scheduling tests: real context switches on backing threads,
//! with simulated timer interrupts injected from the idle hook.
//!
//! Task entries report their progress through a channel; every `recv` has a
//! generous timeout so a scheduling bug fails the test instead of hanging
//! it.

use once_cell::sync::OnceCell;
use quark_kernel::cfg::MAX_MESSAGES;
use quark_kernel::{Error, FlagId, FlagMode, Kernel, MutexId, SemaId, WaitResult};
use quark_port_std::{boot, new_kernel, StdPort};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn leak<T>(value: T) -> *mut () {
    Box::into_raw(Box::new(value)) as *mut ()
}

/// Deliver one simulated timer interrupt per idle iteration.
fn install_ticker(kernel: &'static Kernel<StdPort>) {
    kernel.port().set_idle_hook(Box::new(move || {
        kernel.enter_interrupt();
        kernel.tick();
        kernel.exit_interrupt();
        thread::sleep(Duration::from_micros(200));
    }));
}

fn drain(rx: &Receiver<&'static str>, n: usize) -> Vec<&'static str> {
    (0..n).map(|_| rx.recv_timeout(RECV_TIMEOUT).unwrap()).collect()
}

mod preemption {
    use super::*;

    struct Ctx {
        kernel: &'static Kernel<StdPort>,
        tx: Mutex<Sender<&'static str>>,
        sema: OnceCell<SemaId>,
    }

    fn low(param: *mut ()) {
        let ctx: &Ctx = unsafe { &*(param as *const Ctx) };
        let kernel = ctx.kernel;
        let s = kernel.sema_create(0).unwrap();
        ctx.sema.set(s).unwrap();
        kernel.task_create(high, param, 5).unwrap();
        // `high` preempted us at creation and is now blocked on the
        // semaphore
        ctx.tx.lock().unwrap().send("low:signal").unwrap();
        kernel.sema_signal(s).unwrap();
        ctx.tx.lock().unwrap().send("low:done").unwrap();
    }

    fn high(param: *mut ()) {
        let ctx: &Ctx = unsafe { &*(param as *const Ctx) };
        ctx.tx.lock().unwrap().send("high:wait").unwrap();
        ctx.kernel.sema_get(*ctx.sema.get().unwrap()).unwrap();
        ctx.tx.lock().unwrap().send("high:got").unwrap();
    }

    #[test]
    fn a_signal_hands_control_to_the_more_urgent_waiter() {
        init_logging();
        let kernel = new_kernel();
        let (tx, rx) = channel();
        let param = leak(Ctx {
            kernel,
            tx: Mutex::new(tx),
            sema: OnceCell::new(),
        });
        boot(kernel, low, param, 3).unwrap();
        assert_eq!(
            drain(&rx, 4),
            ["high:wait", "low:signal", "high:got", "low:done"]
        );
    }
}

mod round_robin {
    use super::*;

    struct Ctx {
        kernel: &'static Kernel<StdPort>,
        tx: Mutex<Sender<u8>>,
        tag: u8,
    }

    fn spin(param: *mut ()) {
        let ctx: &Ctx = unsafe { &*(param as *const Ctx) };
        for _ in 0..3 {
            ctx.tx.lock().unwrap().send(ctx.tag).unwrap();
            ctx.kernel.yield_now();
        }
    }

    fn starter(param: *mut ()) {
        let ctx: &Ctx = unsafe { &*(param as *const Ctx) };
        let kernel = ctx.kernel;
        for tag in 0..3 {
            let peer = leak(Ctx {
                kernel,
                tx: Mutex::new(ctx.tx.lock().unwrap().clone()),
                tag,
            });
            kernel.task_create(spin, peer, 3).unwrap();
        }
    }

    #[test]
    fn yielding_tasks_of_equal_priority_rotate() {
        init_logging();
        let kernel = new_kernel();
        let (tx, rx) = channel();
        let param = leak(Ctx {
            kernel,
            tx: Mutex::new(tx),
            tag: u8::MAX,
        });
        boot(kernel, starter, param, 4).unwrap();
        let seq: Vec<u8> = (0..9)
            .map(|_| rx.recv_timeout(RECV_TIMEOUT).unwrap())
            .collect();
        // A strict rotation: the same order repeats every three entries
        let mut first = seq[..3].to_vec();
        first.sort_unstable();
        assert_eq!(first, [0, 1, 2]);
        for i in 0..6 {
            assert_eq!(seq[i], seq[i + 3], "sequence {seq:?} is not cyclic");
        }
    }
}

mod timeouts {
    use super::*;

    struct Ctx {
        kernel: &'static Kernel<StdPort>,
        tx: Mutex<Sender<&'static str>>,
    }

    fn waiter(param: *mut ()) {
        let ctx: &Ctx = unsafe { &*(param as *const Ctx) };
        let kernel = ctx.kernel;
        let s = kernel.sema_create(0).unwrap();
        assert_eq!(kernel.sema_wait(s, 5), Ok(WaitResult::TimedOut));
        assert!(kernel.jiffies() >= 5);
        ctx.tx.lock().unwrap().send("timed-out").unwrap();

        let t = kernel.timer_create().unwrap();
        kernel.timer_set(t, s, 3, 0).unwrap();
        kernel.timer_start(t).unwrap();
        kernel.sema_get(s).unwrap();
        assert_eq!(kernel.timer_fired(t), Ok(true));
        ctx.tx.lock().unwrap().send("fired").unwrap();
    }

    #[test]
    fn waits_expire_and_timers_fire_with_the_tick() {
        init_logging();
        let kernel = new_kernel();
        install_ticker(kernel);
        let (tx, rx) = channel();
        let param = leak(Ctx {
            kernel,
            tx: Mutex::new(tx),
        });
        boot(kernel, waiter, param, 3).unwrap();
        assert_eq!(drain(&rx, 2), ["timed-out", "fired"]);
    }
}

mod mutex_transfer {
    use super::*;

    struct Ctx {
        kernel: &'static Kernel<StdPort>,
        tx: Mutex<Sender<&'static str>>,
        mutex: OnceCell<MutexId>,
    }

    fn low(param: *mut ()) {
        let ctx: &Ctx = unsafe { &*(param as *const Ctx) };
        let kernel = ctx.kernel;
        let m = kernel.mutex_create().unwrap();
        ctx.mutex.set(m).unwrap();
        kernel.mutex_lock(m).unwrap();
        ctx.tx.lock().unwrap().send("low:locked").unwrap();
        kernel.task_create(high, param, 5).unwrap();
        ctx.tx.lock().unwrap().send("low:unlock").unwrap();
        kernel.mutex_unlock(m).unwrap();
        ctx.tx.lock().unwrap().send("low:done").unwrap();
    }

    fn high(param: *mut ()) {
        let ctx: &Ctx = unsafe { &*(param as *const Ctx) };
        let kernel = ctx.kernel;
        let m = *ctx.mutex.get().unwrap();
        assert_eq!(kernel.mutex_try_lock(m), Ok(false));
        ctx.tx.lock().unwrap().send("high:block").unwrap();
        kernel.mutex_lock(m).unwrap();
        ctx.tx.lock().unwrap().send("high:locked").unwrap();
        // Ownership came over with the wake-up; relocking nests
        kernel.mutex_lock(m).unwrap();
        kernel.mutex_unlock(m).unwrap();
        kernel.mutex_unlock(m).unwrap();
    }

    #[test]
    fn unlocking_passes_ownership_to_the_blocked_task() {
        init_logging();
        let kernel = new_kernel();
        let (tx, rx) = channel();
        let param = leak(Ctx {
            kernel,
            tx: Mutex::new(tx),
            mutex: OnceCell::new(),
        });
        boot(kernel, low, param, 3).unwrap();
        assert_eq!(
            drain(&rx, 5),
            [
                "low:locked",
                "high:block",
                "low:unlock",
                "high:locked",
                "low:done"
            ]
        );
    }
}

mod mutex_recycle {
    use super::*;

    struct Ctx {
        kernel: &'static Kernel<StdPort>,
        tx: Mutex<Sender<&'static str>>,
        mutex: OnceCell<MutexId>,
    }

    fn owner(param: *mut ()) {
        let ctx: &Ctx = unsafe { &*(param as *const Ctx) };
        let kernel = ctx.kernel;
        let m = kernel.mutex_create().unwrap();
        ctx.mutex.set(m).unwrap();
        kernel.mutex_lock(m).unwrap();
        kernel.task_create(waiter, param, 3).unwrap();
        // Let the less urgent waiter park itself on the mutex
        kernel.sleep(3).unwrap();
        // The unlock makes the waiter the owner but does not dispatch it
        // (it is less urgent), so the pend set is already empty here and
        // the control block can be destroyed and recycled before the
        // waiter ever resumes
        kernel.mutex_unlock(m).unwrap();
        kernel.mutex_destroy(m).unwrap();
        let m2 = kernel.mutex_create().unwrap();
        assert_eq!(m2, m);
        kernel.mutex_lock(m2).unwrap();
        ctx.tx.lock().unwrap().send("owner:recycled").unwrap();
        kernel.sleep(3).unwrap();
        // The stale waiter must not have touched the recycled mutex
        assert_eq!(kernel.mutex_unlock(m2), Ok(()));
        ctx.tx.lock().unwrap().send("owner:intact").unwrap();
    }

    fn waiter(param: *mut ()) {
        let ctx: &Ctx = unsafe { &*(param as *const Ctx) };
        let kernel = ctx.kernel;
        let m = *ctx.mutex.get().unwrap();
        kernel.mutex_lock(m).unwrap();
        ctx.tx.lock().unwrap().send("waiter:resumed").unwrap();
        // By now the handle refers to a recycled mutex held by somebody
        // else; unlocking through it is refused
        assert_eq!(kernel.mutex_unlock(m), Err(Error::Fail));
        ctx.tx.lock().unwrap().send("waiter:refused").unwrap();
    }

    #[test]
    fn a_stale_waiter_cannot_corrupt_a_recycled_mutex() {
        init_logging();
        let kernel = new_kernel();
        install_ticker(kernel);
        let (tx, rx) = channel();
        let param = leak(Ctx {
            kernel,
            tx: Mutex::new(tx),
            mutex: OnceCell::new(),
        });
        boot(kernel, owner, param, 5).unwrap();
        assert_eq!(
            drain(&rx, 4),
            [
                "owner:recycled",
                "waiter:resumed",
                "waiter:refused",
                "owner:intact"
            ]
        );
    }
}

mod flag_timeouts {
    use super::*;

    struct Ctx {
        kernel: &'static Kernel<StdPort>,
        tx: Mutex<Sender<&'static str>>,
        flag: OnceCell<FlagId>,
    }

    fn waiter(param: *mut ()) {
        let ctx: &Ctx = unsafe { &*(param as *const Ctx) };
        let kernel = ctx.kernel;
        let f = kernel.flag_create().unwrap();
        ctx.flag.set(f).unwrap();
        // Nobody sets a flag, so the wait runs out
        assert_eq!(kernel.flag_wait(f, FlagMode::GetSingle, 3), Ok(None));
        assert!(kernel.jiffies() >= 3);
        ctx.tx.lock().unwrap().send("expired").unwrap();

        // The setter fires well before this timeout
        kernel.task_create(setter, param, 4).unwrap();
        assert_eq!(
            kernel.flag_wait(f, FlagMode::GetSingle, 50),
            Ok(Some(6))
        );
        ctx.tx.lock().unwrap().send("signaled").unwrap();
    }

    fn setter(param: *mut ()) {
        let ctx: &Ctx = unsafe { &*(param as *const Ctx) };
        ctx.kernel.sleep(2).unwrap();
        ctx.kernel.flag_set(*ctx.flag.get().unwrap(), 6).unwrap();
    }

    #[test]
    fn finite_flag_waits_expire_or_are_satisfied_early() {
        init_logging();
        let kernel = new_kernel();
        install_ticker(kernel);
        let (tx, rx) = channel();
        let param = leak(Ctx {
            kernel,
            tx: Mutex::new(tx),
            flag: OnceCell::new(),
        });
        boot(kernel, waiter, param, 5).unwrap();
        assert_eq!(drain(&rx, 2), ["expired", "signaled"]);
    }
}

mod alloc_throttle {
    use super::*;

    struct Ctx {
        kernel: &'static Kernel<StdPort>,
        tx: Mutex<Sender<&'static str>>,
    }

    fn hog(param: *mut ()) {
        let ctx: &Ctx = unsafe { &*(param as *const Ctx) };
        let kernel = ctx.kernel;
        let mut held = Vec::new();
        for _ in 0..MAX_MESSAGES {
            held.push(kernel.msg_alloc().unwrap());
        }
        // The claimant preempts and blocks on the exhausted pool
        kernel.task_create(claimant, param, 6).unwrap();
        ctx.tx.lock().unwrap().send("hog:free").unwrap();
        kernel.msg_free(held[0]).unwrap();
        ctx.tx.lock().unwrap().send("hog:done").unwrap();
    }

    fn claimant(param: *mut ()) {
        let ctx: &Ctx = unsafe { &*(param as *const Ctx) };
        let kernel = ctx.kernel;
        ctx.tx.lock().unwrap().send("claimant:wait").unwrap();
        // Blocks until the hog returns a buffer
        let m = kernel.msg_alloc().unwrap();
        ctx.tx.lock().unwrap().send("claimant:got").unwrap();
        kernel.msg_free(m).unwrap();
    }

    #[test]
    fn a_blocked_allocator_is_woken_by_a_free() {
        init_logging();
        let kernel = new_kernel();
        let (tx, rx) = channel();
        let param = leak(Ctx {
            kernel,
            tx: Mutex::new(tx),
        });
        boot(kernel, hog, param, 3).unwrap();
        assert_eq!(
            drain(&rx, 4),
            ["claimant:wait", "hog:free", "claimant:got", "hog:done"]
        );
    }
}

mod messaging {
    use super::*;

    struct Ctx {
        kernel: &'static Kernel<StdPort>,
        tx: Mutex<Sender<String>>,
    }

    fn consumer(param: *mut ()) {
        let ctx: &Ctx = unsafe { &*(param as *const Ctx) };
        let kernel = ctx.kernel;
        // Nothing is sent for the first few ticks
        assert_eq!(kernel.msg_wait(2), Ok(None));
        ctx.tx.lock().unwrap().send("none".to_owned()).unwrap();
        for _ in 0..2 {
            let m = kernel.msg_get().unwrap();
            let mut buf = [0u8; 8];
            let n = kernel.msg_read(m, &mut buf).unwrap();
            kernel.msg_free(m).unwrap();
            let text = String::from_utf8_lossy(&buf[..n]).into_owned();
            ctx.tx.lock().unwrap().send(text).unwrap();
        }
    }

    fn producer(param: *mut ()) {
        let ctx: &Ctx = unsafe { &*(param as *const Ctx) };
        let kernel = ctx.kernel;
        let dest = kernel.task_create(consumer, param, 5).unwrap();
        // Let the consumer's poll expire first
        kernel.sleep(4).unwrap();
        for payload in [b"B1", b"B2"] {
            let m = kernel.msg_alloc().unwrap();
            kernel.msg_write(m, payload).unwrap();
            kernel.msg_send(m, dest).unwrap();
        }
    }

    #[test]
    fn mail_wakes_the_receiver_in_order() {
        init_logging();
        let kernel = new_kernel();
        install_ticker(kernel);
        let (tx, rx) = channel();
        let param = leak(Ctx {
            kernel,
            tx: Mutex::new(tx),
        });
        boot(kernel, producer, param, 3).unwrap();
        let got: Vec<String> = (0..3)
            .map(|_| rx.recv_timeout(RECV_TIMEOUT).unwrap())
            .collect();
        assert_eq!(got, ["none", "B1", "B2"]);
    }
}
