//! Tick-driven software timers.
//!
//! An armed timer sits on a doubly index-linked active list walked by the
//! tick handler. When its countdown reaches zero it signals its bound
//! semaphore and latches a "fired" flag; with a nonzero reload value it
//! rearms itself, otherwise it leaves the list.

use crate::cfg::MAX_TIMERS;
use crate::error::{Error, Result};
use crate::port::Port;
use crate::semaphore::{check_sema, SemaId};
use crate::state::KernelState;
use crate::utils::Init;
use crate::{Kernel, Ticks};

/// Identifies a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub(crate) u8);

impl TimerId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

pub(crate) struct TimerCb {
    pub in_use: bool,
    /// Whether the timer is on the active list.
    pub active: bool,
    pub counter: Ticks,
    pub wait: Ticks,
    pub reload: Ticks,
    pub fired: bool,
    pub sema: Option<SemaId>,
    pub prev: Option<TimerId>,
    pub next: Option<TimerId>,
}

impl Init for TimerCb {
    const INIT: Self = Self {
        in_use: false,
        active: false,
        counter: 0,
        wait: 0,
        reload: 0,
        fired: false,
        sema: None,
        prev: None,
        next: None,
    };
}

fn check_timer(st: &KernelState, t: TimerId) -> Result<()> {
    if t.index() < MAX_TIMERS && st.timers[t.index()].in_use {
        Ok(())
    } else {
        Err(Error::BadArg)
    }
}

pub(crate) fn link_timer(st: &mut KernelState, t: TimerId) {
    debug_assert!(!st.timers[t.index()].active);
    let head = st.timer_head;
    {
        let cb = &mut st.timers[t.index()];
        cb.prev = None;
        cb.next = head;
        cb.active = true;
    }
    if let Some(h) = head {
        st.timers[h.index()].prev = Some(t);
    }
    st.timer_head = Some(t);
}

pub(crate) fn unlink_timer(st: &mut KernelState, t: TimerId) {
    let (prev, next) = {
        let cb = &mut st.timers[t.index()];
        debug_assert!(cb.active);
        cb.active = false;
        (cb.prev.take(), cb.next.take())
    };
    match prev {
        Some(p) => st.timers[p.index()].next = next,
        None => st.timer_head = next,
    }
    if let Some(n) = next {
        st.timers[n.index()].prev = prev;
    }
}

impl<P: Port> Kernel<P> {
    pub fn timer_create(&self) -> Result<TimerId> {
        let mut lock = self.lock();
        let st = lock.state();
        let t = st.free_timers.pop().ok_or(Error::NoMem)?;
        st.timers[t.index()] = TimerCb::INIT;
        st.timers[t.index()].in_use = true;
        Ok(t)
    }

    /// Bind a timer to a semaphore and program its delay and reload values.
    /// A running timer is stopped first. `wait` must be nonzero; a zero
    /// `reload` makes the timer one-shot.
    pub fn timer_set(&self, t: TimerId, sema: SemaId, wait: Ticks, reload: Ticks) -> Result<()> {
        if wait == 0 {
            return Err(Error::BadArg);
        }
        let mut lock = self.lock();
        let st = lock.state();
        check_timer(st, t)?;
        check_sema(st, sema.0)?;
        if st.timers[t.index()].active {
            unlink_timer(st, t);
        }
        let cb = &mut st.timers[t.index()];
        cb.sema = Some(sema);
        cb.wait = wait;
        cb.reload = reload;
        Ok(())
    }

    /// Arm the timer: seed the countdown from the programmed delay, clear
    /// the fired latch and join the active list. Fails with [`Error::Fail`]
    /// if the timer was never programmed.
    pub fn timer_start(&self, t: TimerId) -> Result<()> {
        let mut lock = self.lock();
        let st = lock.state();
        check_timer(st, t)?;
        if st.timers[t.index()].sema.is_none() {
            return Err(Error::Fail);
        }
        let cb = &mut st.timers[t.index()];
        cb.counter = cb.wait;
        cb.fired = false;
        if !st.timers[t.index()].active {
            link_timer(st, t);
        }
        Ok(())
    }

    /// Disarm the timer. A stopped timer keeps its programming and can be
    /// restarted.
    pub fn timer_stop(&self, t: TimerId) -> Result<()> {
        let mut lock = self.lock();
        let st = lock.state();
        check_timer(st, t)?;
        if st.timers[t.index()].active {
            unlink_timer(st, t);
        }
        Ok(())
    }

    /// Read and clear the fired latch.
    pub fn timer_fired(&self, t: TimerId) -> Result<bool> {
        let mut lock = self.lock();
        let st = lock.state();
        check_timer(st, t)?;
        let fired = st.timers[t.index()].fired;
        st.timers[t.index()].fired = false;
        Ok(fired)
    }

    /// Stop the timer and return it to the pool.
    pub fn timer_destroy(&self, t: TimerId) -> Result<()> {
        let mut lock = self.lock();
        let st = lock.state();
        check_timer(st, t)?;
        if st.timers[t.index()].active {
            unlink_timer(st, t);
        }
        st.timers[t.index()].in_use = false;
        let _ = st.free_timers.try_push(t);
        Ok(())
    }
}
