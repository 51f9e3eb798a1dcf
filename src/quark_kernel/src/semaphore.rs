//! Counting semaphores.

use crate::error::{Error, Result};
use crate::event::{
    alloc_event, free_event, pend_add, pend_contains, pend_remove, EventId, EventKind, WaitResult,
};
use crate::klock::KLock;
use crate::port::Port;
use crate::task::{make_unready, sleep_dequeue, sleep_enqueue};
use crate::{Kernel, Ticks, INFINITE};

/// Identifies a semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaId(pub(crate) EventId);

impl<P: Port> Kernel<P> {
    /// Create a semaphore with the given initial count.
    pub fn sema_create(&self, count: i32) -> Result<SemaId> {
        if count < 0 {
            return Err(Error::BadArg);
        }
        let mut lock = self.lock();
        let ev = alloc_event(lock.state(), EventKind::Semaphore { count })?;
        Ok(SemaId(ev))
    }

    /// Destroy a semaphore. Fails with [`Error::Fail`] while a task is
    /// still pending on it.
    pub fn sema_destroy(&self, sema: SemaId) -> Result<()> {
        let mut lock = self.lock();
        let st = lock.state();
        check_sema(st, sema.0)?;
        free_event(st, sema.0)
    }

    /// Take the semaphore, blocking until the count is positive.
    pub fn sema_get(&self, sema: SemaId) -> Result<()> {
        let mut lock = self.lock();
        check_sema(lock.state(), sema.0)?;
        self.sema_get_in(&mut lock, sema.0)
    }

    /// Take the semaphore, waiting at most `timeout` ticks. A `timeout` of
    /// zero polls without blocking; [`INFINITE`] never expires.
    pub fn sema_wait(&self, sema: SemaId, timeout: Ticks) -> Result<WaitResult> {
        let mut lock = self.lock();
        check_sema(lock.state(), sema.0)?;
        if timeout == INFINITE {
            self.sema_get_in(&mut lock, sema.0)?;
            return Ok(WaitResult::Signaled);
        }
        self.sema_wait_in(&mut lock, sema.0, timeout)
    }

    /// Raise the semaphore count by one, or hand the token directly to the
    /// most urgent pending task. The count saturates at `i32::MAX`.
    pub fn sema_signal(&self, sema: SemaId) -> Result<()> {
        let mut lock = self.lock();
        check_sema(lock.state(), sema.0)?;
        self.sema_signal_in(&mut lock, sema.0)
    }

    pub(crate) fn sema_get_in(&self, lock: &mut KLock<'_, P>, ev: EventId) -> Result<()> {
        {
            let st = lock.state();
            let EventKind::Semaphore { count } = &mut st.events[ev.index()].kind else {
                return Err(Error::BadArg);
            };
            if *count > 0 {
                *count -= 1;
                return Ok(());
            }
            if st.in_interrupt != 0 || st.sched_lock != 0 {
                return Err(Error::BadContext);
            }
            let cur = st.current;
            pend_add(st, ev, cur);
            make_unready(st, cur);
        }
        self.schedule(lock);
        // The signaler removed our pend bit and left the count untouched;
        // the token was handed over directly
        Ok(())
    }

    pub(crate) fn sema_wait_in(
        &self,
        lock: &mut KLock<'_, P>,
        ev: EventId,
        timeout: Ticks,
    ) -> Result<WaitResult> {
        {
            let st = lock.state();
            let EventKind::Semaphore { count } = &mut st.events[ev.index()].kind else {
                return Err(Error::BadArg);
            };
            if *count > 0 {
                *count -= 1;
                return Ok(WaitResult::Signaled);
            }
            if timeout == 0 {
                return Ok(WaitResult::TimedOut);
            }
            if st.in_interrupt != 0 || st.sched_lock != 0 {
                return Err(Error::BadContext);
            }
            let cur = st.current;
            pend_add(st, ev, cur);
            make_unready(st, cur);
            sleep_enqueue(st, cur, timeout);
        }
        self.schedule(lock);
        // Signal and expiry are told apart by sleep-list membership: the
        // tick handler dequeues expired tasks, a signaler removes the pend
        // bit but leaves the sleep entry alone
        let st = lock.state();
        let cur = st.current;
        if st.tasks[cur.index()].sleeping {
            sleep_dequeue(st, cur);
            Ok(WaitResult::Signaled)
        } else if pend_contains(st, ev, cur) {
            pend_remove(st, ev, cur);
            Ok(WaitResult::TimedOut)
        } else {
            // Signaled in the very tick that expired the wait
            Ok(WaitResult::Signaled)
        }
    }

    pub(crate) fn sema_signal_in(&self, lock: &mut KLock<'_, P>, ev: EventId) -> Result<()> {
        let was_zero = {
            let st = lock.state();
            let EventKind::Semaphore { count } = st.events[ev.index()].kind else {
                return Err(Error::BadArg);
            };
            count == 0
        };
        if was_zero {
            if !self.wake_one_pending(lock, ev) {
                let st = lock.state();
                if let EventKind::Semaphore { count } = &mut st.events[ev.index()].kind {
                    *count = 1;
                }
            }
        } else {
            let st = lock.state();
            if let EventKind::Semaphore { count } = &mut st.events[ev.index()].kind {
                if *count < i32::MAX {
                    *count += 1;
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn check_sema(st: &crate::state::KernelState, ev: EventId) -> Result<()> {
    match st.events[ev.index()].kind {
        EventKind::Semaphore { .. } => Ok(()),
        _ => Err(Error::BadArg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{kernel_with_tasks, with_state};

    fn count_of(kernel: &crate::Kernel<crate::test_utils::DummyPort>, s: SemaId) -> i32 {
        with_state(kernel, |st| match st.events[s.0.index()].kind {
            EventKind::Semaphore { count } => count,
            _ => panic!("not a semaphore"),
        })
    }

    #[test]
    fn poll_consumes_and_signal_restores() {
        let (kernel, _) = kernel_with_tasks(&[2]);
        let s = kernel.sema_create(2).unwrap();
        assert_eq!(kernel.sema_wait(s, 0), Ok(WaitResult::Signaled));
        kernel.sema_get(s).unwrap();
        assert_eq!(kernel.sema_wait(s, 0), Ok(WaitResult::TimedOut));
        kernel.sema_signal(s).unwrap();
        assert_eq!(count_of(&kernel, s), 1);
        assert_eq!(kernel.sema_wait(s, 0), Ok(WaitResult::Signaled));
        kernel.sema_destroy(s).unwrap();
    }

    #[test]
    fn create_rejects_negative_count() {
        let (kernel, _) = kernel_with_tasks(&[]);
        assert_eq!(kernel.sema_create(-1), Err(Error::BadArg));
    }

    #[test]
    fn blocked_task_is_woken_by_signal_with_a_direct_handover() {
        let (kernel, tasks) = kernel_with_tasks(&[2]);
        let t = tasks[0];
        let s = kernel.sema_create(0).unwrap();
        kernel.sema_get(s).unwrap();
        assert_ne!(kernel.current_task(), t);
        assert!(with_state(&kernel, |st| pend_contains(st, s.0, t)));
        kernel.sema_signal(s).unwrap();
        assert_eq!(kernel.current_task(), t);
        assert!(!with_state(&kernel, |st| pend_contains(st, s.0, t)));
        // The token was handed over, not added to the count
        assert_eq!(count_of(&kernel, s), 0);
    }

    #[test]
    fn destroy_fails_while_a_task_is_pending() {
        let (kernel, _) = kernel_with_tasks(&[2]);
        let s = kernel.sema_create(0).unwrap();
        kernel.sema_get(s).unwrap();
        assert_eq!(kernel.sema_destroy(s), Err(Error::Fail));
        kernel.sema_signal(s).unwrap();
        kernel.sema_destroy(s).unwrap();
    }

    #[test]
    fn count_saturates_instead_of_overflowing() {
        let (kernel, _) = kernel_with_tasks(&[2]);
        let s = kernel.sema_create(i32::MAX).unwrap();
        kernel.sema_signal(s).unwrap();
        assert_eq!(count_of(&kernel, s), i32::MAX);
    }

    #[test]
    fn kind_confusion_is_rejected() {
        let (kernel, _) = kernel_with_tasks(&[2]);
        let f = kernel.flag_create().unwrap();
        assert_eq!(kernel.sema_signal(SemaId(f.0)), Err(Error::BadArg));
        assert_eq!(kernel.sema_destroy(SemaId(f.0)), Err(Error::BadArg));
    }

    #[test]
    fn blocking_is_forbidden_in_interrupt_context() {
        let (kernel, _) = kernel_with_tasks(&[2]);
        let s = kernel.sema_create(0).unwrap();
        kernel.enter_interrupt();
        assert_eq!(kernel.sema_get(s), Err(Error::BadContext));
        // A poll is still fine
        assert_eq!(kernel.sema_wait(s, 0), Ok(WaitResult::TimedOut));
        kernel.exit_interrupt();
    }
}
