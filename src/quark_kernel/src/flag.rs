//! Flag sets.
//!
//! A flag set collects up to `usize::BITS - 1` one-bit conditions. Setting
//! a flag wakes one waiter; waiters consume either the lowest set flag or
//! the whole mask, depending on the mode.

use crate::error::{Error, Result};
use crate::event::{
    alloc_event, free_event, pend_add, pend_contains, pend_remove, EventId, EventKind,
};
use crate::klock::KLock;
use crate::port::Port;
use crate::task::{make_unready, sleep_dequeue, sleep_enqueue};
use crate::{Kernel, Ticks, INFINITE};

/// Identifies a flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlagId(pub(crate) EventId);

/// How a waiter consumes satisfied flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagMode {
    /// Take the lowest set flag; the result is its bit number.
    GetSingle,
    /// Take every set flag; the result is the mask.
    GetMask,
}

fn consume(mask: &mut usize, mode: FlagMode) -> usize {
    match mode {
        FlagMode::GetSingle => {
            let bit = mask.trailing_zeros() as usize;
            *mask &= !(1usize << bit);
            bit
        }
        FlagMode::GetMask => {
            let taken = *mask;
            *mask = 0;
            taken
        }
    }
}

impl<P: Port> Kernel<P> {
    pub fn flag_create(&self) -> Result<FlagId> {
        let mut lock = self.lock();
        let ev = alloc_event(lock.state(), EventKind::Flag { mask: 0 })?;
        Ok(FlagId(ev))
    }

    /// Destroy a flag set. Fails with [`Error::Fail`] while a task is still
    /// pending on it.
    pub fn flag_destroy(&self, f: FlagId) -> Result<()> {
        let mut lock = self.lock();
        let st = lock.state();
        match st.events[f.0.index()].kind {
            EventKind::Flag { .. } => free_event(st, f.0),
            _ => Err(Error::BadArg),
        }
    }

    /// Set one flag and wake a waiter if there is one. `flag` must be less
    /// than `usize::BITS - 1`.
    pub fn flag_set(&self, f: FlagId, flag: u32) -> Result<()> {
        if flag >= usize::BITS - 1 {
            return Err(Error::BadArg);
        }
        let mut lock = self.lock();
        {
            let st = lock.state();
            let EventKind::Flag { mask } = &mut st.events[f.0.index()].kind else {
                return Err(Error::BadArg);
            };
            *mask |= 1usize << flag;
        }
        self.wake_one_pending(&mut lock, f.0);
        Ok(())
    }

    /// Wait until at least one flag is set, then consume per `mode`.
    pub fn flag_get(&self, f: FlagId, mode: FlagMode) -> Result<usize> {
        let mut lock = self.lock();
        match self.flag_acquire(&mut lock, f.0, mode, INFINITE)? {
            Some(v) => Ok(v),
            // An infinite wait only returns with a value
            None => Err(Error::Fail),
        }
    }

    /// Like [`flag_get`], but give up after `timeout` ticks, returning
    /// `Ok(None)`. A `timeout` of zero polls without blocking.
    ///
    /// [`flag_get`]: Self::flag_get
    pub fn flag_wait(&self, f: FlagId, mode: FlagMode, timeout: Ticks) -> Result<Option<usize>> {
        let mut lock = self.lock();
        self.flag_acquire(&mut lock, f.0, mode, timeout)
    }

    /// The wait loop shared by `flag_get` and `flag_wait`. A wake-up does
    /// not consume anything by itself; the waiter re-checks the mask, so
    /// several waiters may race for the same flags.
    fn flag_acquire(
        &self,
        lock: &mut KLock<'_, P>,
        ev: EventId,
        mode: FlagMode,
        timeout: Ticks,
    ) -> Result<Option<usize>> {
        let mut remaining = timeout;
        loop {
            let start = {
                let st = lock.state();
                let cur = st.current;
                let EventKind::Flag { mask } = &mut st.events[ev.index()].kind else {
                    return Err(Error::BadArg);
                };
                if *mask != 0 {
                    return Ok(Some(consume(mask, mode)));
                }
                if remaining == 0 {
                    return Ok(None);
                }
                if st.in_interrupt != 0 || st.sched_lock != 0 {
                    return Err(Error::BadContext);
                }
                pend_add(st, ev, cur);
                make_unready(st, cur);
                if timeout != INFINITE {
                    sleep_enqueue(st, cur, remaining);
                }
                st.jiffies
            };
            self.schedule(lock);
            if timeout != INFINITE {
                let st = lock.state();
                let cur = st.current;
                if !st.tasks[cur.index()].sleeping {
                    // Expired; a flag may still have arrived in that tick
                    if pend_contains(st, ev, cur) {
                        pend_remove(st, ev, cur);
                    }
                    if let EventKind::Flag { mask } = &mut st.events[ev.index()].kind {
                        if *mask != 0 {
                            return Ok(Some(consume(mask, mode)));
                        }
                    }
                    return Ok(None);
                }
                sleep_dequeue(st, cur);
                let elapsed = st.jiffies.wrapping_sub(start);
                remaining = remaining.saturating_sub(elapsed);
            }
        }
    }
}
