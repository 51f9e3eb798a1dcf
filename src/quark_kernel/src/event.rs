//! The common substrate of semaphores, mutexes and flag sets.
//!
//! All three are backed by one pool of event control blocks. An event holds
//! a kind-specific payload and a bit table of pending tasks, indexed by the
//! tasks' table coordinates so that wake-up uses the same priority scan as
//! the scheduler.

use crate::cfg::TASKS_PER_PRIO;
use crate::error::{Error, Result};
use crate::klock::KLock;
use crate::port::Port;
use crate::state::KernelState;
use crate::task::{self, TaskId};
use crate::utils::bittab::{find_first_set_from, BitTable};
use crate::utils::Init;
use crate::Kernel;

/// Index into the event pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EventId(pub(crate) u8);

impl EventId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// The outcome of a wait with a finite timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// The wait was satisfied before the timeout elapsed.
    Signaled,
    /// The timeout elapsed first.
    TimedOut,
}

/// Kind-specific payload of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventKind {
    Free,
    Semaphore {
        count: i32,
    },
    /// `count` starts at 1 (unlocked); 0 means locked once and each
    /// recursive acquisition decrements it further.
    Mutex {
        count: i32,
        owner: Option<TaskId>,
    },
    Flag {
        mask: usize,
    },
}

pub(crate) struct EventCb {
    pub kind: EventKind,
    pub pend: BitTable,
}

impl Init for EventCb {
    const INIT: Self = Self {
        kind: EventKind::Free,
        pend: BitTable::INIT,
    };
}

pub(crate) fn alloc_event(st: &mut KernelState, kind: EventKind) -> Result<EventId> {
    let ev = st.free_events.pop().ok_or(Error::NoMem)?;
    let cb = &mut st.events[ev.index()];
    cb.kind = kind;
    cb.pend = BitTable::INIT;
    Ok(ev)
}

/// Return an event to the pool. Fails if a task is still pending on it.
pub(crate) fn free_event(st: &mut KernelState, ev: EventId) -> Result<()> {
    if st.events[ev.index()].pend.first_level().is_some() {
        return Err(Error::Fail);
    }
    st.events[ev.index()].kind = EventKind::Free;
    let _ = st.free_events.try_push(ev);
    Ok(())
}

pub(crate) fn pend_add(st: &mut KernelState, ev: EventId, t: TaskId) {
    let c = st.tasks[t.index()].coord;
    st.events[ev.index()].pend.set(c.level as usize, c.slot as usize);
    st.tasks[t.index()].pending_on = Some(ev);
}

pub(crate) fn pend_remove(st: &mut KernelState, ev: EventId, t: TaskId) {
    let c = st.tasks[t.index()].coord;
    st.events[ev.index()].pend.clear(c.level as usize, c.slot as usize);
    st.tasks[t.index()].pending_on = None;
}

pub(crate) fn pend_contains(st: &KernelState, ev: EventId, t: TaskId) -> bool {
    let c = st.tasks[t.index()].coord;
    st.events[ev.index()].pend.get(c.level as usize, c.slot as usize)
}

/// Make the most urgent task pending on `ev` ready and request a
/// reschedule. The round-robin offset of the level is consulted but not
/// advanced. Returns the woken task so that the caller can transfer any
/// event-specific state to it within the same critical section.
pub(crate) fn wake_one_pending_in(st: &mut KernelState, ev: EventId) -> Option<TaskId> {
    let level = st.events[ev.index()].pend.first_level()?;
    let word = st.events[ev.index()].pend.level_word(level);
    let slot = find_first_set_from(word, st.next_rr[level] as usize);
    // A pend bit always maps to an occupied table slot
    let t = st.task_table[level * TASKS_PER_PRIO + slot]?;
    pend_remove(st, ev, t);
    task::make_ready(st, t);
    st.must_schedule = true;
    Some(t)
}

impl<P: Port> Kernel<P> {
    /// [`wake_one_pending_in`] followed by a dispatch. Returns whether a
    /// task was woken.
    pub(crate) fn wake_one_pending(&self, lock: &mut KLock<'_, P>, ev: EventId) -> bool {
        if wake_one_pending_in(lock.state(), ev).is_none() {
            return false;
        }
        self.schedule(lock);
        true
    }
}
