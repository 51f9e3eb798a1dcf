//! Recursive mutexes.
//!
//! A mutex is an event whose count starts at 1. Locking moves it to 0;
//! every recursive acquisition by the owner decrements it further, and
//! unlocking walks the count back up. When a waiter is woken, the count
//! stays at 0 and ownership transfers directly.

use crate::error::{Error, Result};
use crate::event::{alloc_event, free_event, pend_add, wake_one_pending_in, EventKind};
use crate::port::Port;
use crate::task::make_unready;
use crate::Kernel;

/// Identifies a mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutexId(pub(crate) crate::event::EventId);

impl<P: Port> Kernel<P> {
    pub fn mutex_create(&self) -> Result<MutexId> {
        let mut lock = self.lock();
        let ev = alloc_event(
            lock.state(),
            EventKind::Mutex {
                count: 1,
                owner: None,
            },
        )?;
        Ok(MutexId(ev))
    }

    /// Destroy a mutex. Fails with [`Error::Fail`] while a task is still
    /// pending on it.
    pub fn mutex_destroy(&self, m: MutexId) -> Result<()> {
        let mut lock = self.lock();
        let st = lock.state();
        match st.events[m.0.index()].kind {
            EventKind::Mutex { .. } => free_event(st, m.0),
            _ => Err(Error::BadArg),
        }
    }

    /// Try to lock the mutex without blocking. Returns `Ok(false)` when the
    /// mutex is held by another task.
    pub fn mutex_try_lock(&self, m: MutexId) -> Result<bool> {
        let mut lock = self.lock();
        let st = lock.state();
        let cur = st.current;
        let EventKind::Mutex { count, owner } = &mut st.events[m.0.index()].kind else {
            return Err(Error::BadArg);
        };
        if *owner == Some(cur) {
            *count -= 1;
            return Ok(true);
        }
        if *count < 1 {
            return Ok(false);
        }
        *count = 0;
        *owner = Some(cur);
        Ok(true)
    }

    /// Lock the mutex, blocking while another task holds it. Relocking by
    /// the owner nests.
    pub fn mutex_lock(&self, m: MutexId) -> Result<()> {
        let mut lock = self.lock();
        {
            let st = lock.state();
            let cur = st.current;
            let EventKind::Mutex { count, owner } = &mut st.events[m.0.index()].kind else {
                return Err(Error::BadArg);
            };
            if *owner == Some(cur) {
                *count -= 1;
                return Ok(());
            }
            if *count > 0 {
                *count = 0;
                *owner = Some(cur);
                return Ok(());
            }
            if st.in_interrupt != 0 || st.sched_lock != 0 {
                return Err(Error::BadContext);
            }
            pend_add(st, m.0, cur);
            make_unready(st, cur);
        }
        self.schedule(&mut lock);
        // Woken by an unlock, which already recorded us as the owner; the
        // control block is not touched here because it may have been
        // destroyed and recycled before we resumed
        Ok(())
    }

    /// Unlock the mutex. Fails with [`Error::Fail`] if the caller does not
    /// hold it.
    pub fn mutex_unlock(&self, m: MutexId) -> Result<()> {
        let mut lock = self.lock();
        {
            let st = lock.state();
            let cur = st.current;
            let EventKind::Mutex { count, owner } = &mut st.events[m.0.index()].kind else {
                return Err(Error::BadArg);
            };
            if *owner != Some(cur) {
                return Err(Error::Fail);
            }
            if *count < 0 {
                // Undo one recursive acquisition
                *count += 1;
                return Ok(());
            }
            debug_assert_eq!(*count, 0);
            *owner = None;
        }
        // Ownership transfers to the woken waiter within this same critical
        // section, before it can possibly resume
        let woken = {
            let st = lock.state();
            let woken = wake_one_pending_in(st, m.0);
            if let EventKind::Mutex { count, owner } = &mut st.events[m.0.index()].kind {
                match woken {
                    Some(t) => *owner = Some(t),
                    None => *count = 1,
                }
            }
            woken.is_some()
        };
        if woken {
            self.schedule(&mut lock);
        }
        Ok(())
    }
}
