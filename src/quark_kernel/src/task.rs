//! Task control blocks, the task table and task lifecycle services.
//!
//! A task occupies exactly one slot of the task table, addressed by a
//! (level, slot) coordinate. Level `0` corresponds to the highest priority;
//! the public API exposes the inverse numbering where a larger priority
//! number means more urgent.

use crate::cfg::{MAX_TASKS, NUM_PRIO_LEVELS, TASKS_PER_PRIO};
use crate::error::{Error, Result};
use crate::event::EventId;
use crate::klock::KLock;
use crate::msgbox::MsgId;
use crate::port::{Port, TaskEntry};
use crate::sched::select_next;
use crate::semaphore::SemaId;
use crate::state::KernelState;
use crate::utils::bittab::{find_first_set, SLOT_MASK};
use crate::utils::Init;
use crate::{Kernel, Ticks};

/// Identifies a task. Handles stay valid until the task exits; using a stale
/// handle fails with [`Error::BadArg`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub(crate) u8);

impl TaskId {
    /// The task's index in the control block pool. Intended for ports that
    /// keep per-task context in an array of their own.
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Position of a task in the task table. Level `0` is the highest priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Coord {
    pub level: u8,
    pub slot: u8,
}

impl Coord {
    #[inline]
    pub(crate) fn table_index(self) -> usize {
        self.level as usize * TASKS_PER_PRIO + self.slot as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    Unused,
    Active,
    /// Mid-exit; the control block is still being torn down.
    Zombie,
}

pub(crate) struct TaskCb {
    pub state: TaskState,
    pub coord: Coord,
    /// Remaining ticks while on the sleep list.
    pub ticks: Ticks,
    pub sleeping: bool,
    pub sleep_prev: Option<TaskId>,
    pub sleep_next: Option<TaskId>,
    /// The event this task is pending on, if any.
    pub pending_on: Option<EventId>,
    pub msg_head: Option<MsgId>,
    pub msg_tail: Option<MsgId>,
    /// Lazily created receive semaphore, see `msgbox`.
    pub msg_sem: Option<SemaId>,
    /// Set while the task is about to block on `msg_sem`.
    pub msg_pending_wait: bool,
}

impl Init for TaskCb {
    const INIT: Self = Self {
        state: TaskState::Unused,
        coord: Coord { level: 0, slot: 0 },
        ticks: 0,
        sleeping: false,
        sleep_prev: None,
        sleep_next: None,
        pending_on: None,
        msg_head: None,
        msg_tail: None,
        msg_sem: None,
        msg_pending_wait: false,
    };
}

pub(crate) fn check_task(st: &KernelState, t: TaskId) -> Result<()> {
    if t.index() < MAX_TASKS && st.tasks[t.index()].state == TaskState::Active {
        Ok(())
    } else {
        Err(Error::BadArg)
    }
}

/// Mark a task ready to run.
pub(crate) fn make_ready(st: &mut KernelState, t: TaskId) {
    let c = st.tasks[t.index()].coord;
    st.ready.set(c.level as usize, c.slot as usize);
}

/// Remove a task from the ready table.
pub(crate) fn make_unready(st: &mut KernelState, t: TaskId) {
    let c = st.tasks[t.index()].coord;
    st.ready.clear(c.level as usize, c.slot as usize);
}

/// Put a task on the sleep list with a fresh tick budget.
pub(crate) fn sleep_enqueue(st: &mut KernelState, t: TaskId, ticks: Ticks) {
    debug_assert!(!st.tasks[t.index()].sleeping);
    let head = st.sleep_head;
    {
        let cb = &mut st.tasks[t.index()];
        cb.ticks = ticks;
        cb.sleep_prev = None;
        cb.sleep_next = head;
        cb.sleeping = true;
    }
    if let Some(h) = head {
        st.tasks[h.index()].sleep_prev = Some(t);
    }
    st.sleep_head = Some(t);
}

/// Unlink a task from the sleep list.
pub(crate) fn sleep_dequeue(st: &mut KernelState, t: TaskId) {
    let (prev, next) = {
        let cb = &mut st.tasks[t.index()];
        debug_assert!(cb.sleeping);
        cb.sleeping = false;
        (cb.sleep_prev.take(), cb.sleep_next.take())
    };
    match prev {
        Some(p) => st.tasks[p.index()].sleep_next = next,
        None => st.sleep_head = next,
    }
    if let Some(n) = next {
        st.tasks[n.index()].sleep_prev = prev;
    }
}

impl<P: Port> Kernel<P> {
    /// Create a task executing `entry(param)` at the given priority
    /// (`0` = lowest). The new task becomes ready immediately and preempts
    /// the caller if it is more urgent.
    ///
    /// Fails with [`Error::Fail`] if every slot of the priority level is
    /// occupied and with [`Error::NoMem`] if the control block pool is
    /// exhausted.
    pub fn task_create(&self, entry: TaskEntry, param: *mut (), priority: u8) -> Result<TaskId> {
        let mut lock = self.lock();
        let t = self.create_task_in(&mut lock, entry, param, priority)?;
        self.schedule(&mut lock);
        Ok(t)
    }

    pub(crate) fn create_task_in(
        &self,
        lock: &mut KLock<'_, P>,
        entry: TaskEntry,
        param: *mut (),
        priority: u8,
    ) -> Result<TaskId> {
        let (t, level, slot) = {
            let st = lock.state();
            if priority as usize >= NUM_PRIO_LEVELS {
                return Err(Error::BadArg);
            }
            let level = NUM_PRIO_LEVELS - 1 - priority as usize;
            let free = !st.allocated.level_word(level) & SLOT_MASK;
            if free == 0 {
                return Err(Error::Fail);
            }
            let slot = find_first_set(free);
            let t = st.free_tasks.pop().ok_or(Error::NoMem)?;
            let cb = &mut st.tasks[t.index()];
            *cb = TaskCb::INIT;
            cb.coord = Coord {
                level: level as u8,
                slot: slot as u8,
            };
            (t, level, slot)
        };
        if let Err(e) = self.port().initialize_task_state(t, entry, param) {
            let _ = lock.state().free_tasks.try_push(t);
            return Err(e);
        }
        let st = lock.state();
        st.tasks[t.index()].state = TaskState::Active;
        st.allocated.set(level, slot);
        st.task_table[level * TASKS_PER_PRIO + slot] = Some(t);
        make_ready(st, t);
        Ok(t)
    }

    /// Terminate the calling task, releasing its control block, table slot
    /// and message resources, then dispatch the next ready task. Never
    /// returns.
    pub fn task_exit(&self) -> ! {
        let mut lock = self.lock();
        let prev = {
            let st = lock.state();
            let cur = st.current;
            st.tasks[cur.index()].state = TaskState::Zombie;
            cur
        };
        self.sweep_task_messages(&mut lock, prev);
        let next = {
            let st = lock.state();
            let c = st.tasks[prev.index()].coord;
            make_unready(st, prev);
            st.allocated.clear(c.level as usize, c.slot as usize);
            st.task_table[c.table_index()] = None;
            st.tasks[prev.index()].state = TaskState::Unused;
            let _ = st.free_tasks.try_push(prev);
            let next = select_next(st);
            st.current = next;
            next
        };
        self.port().deinitialize_task_state(prev);
        self.port().exit_and_dispatch(prev, next)
    }

    /// The task currently executing. Only meaningful after [`Kernel::start`].
    pub fn current_task(&self) -> TaskId {
        let mut lock = self.lock();
        lock.state().current
    }

    /// Whether a task handle refers to a live task.
    pub fn task_is_active(&self, t: TaskId) -> bool {
        let mut lock = self.lock();
        check_task(lock.state(), t).is_ok()
    }

    pub fn task_get_priority(&self, t: TaskId) -> Result<u8> {
        let mut lock = self.lock();
        let st = lock.state();
        check_task(st, t)?;
        Ok((NUM_PRIO_LEVELS - 1) as u8 - st.tasks[t.index()].coord.level)
    }

    /// Move a task to another priority level. The task keeps its run state:
    /// a ready task stays ready, a blocked or sleeping task stays blocked.
    /// Fails with [`Error::Fail`] if the destination level is full.
    pub fn task_set_priority(&self, t: TaskId, priority: u8) -> Result<()> {
        let mut lock = self.lock();
        {
            let st = lock.state();
            check_task(st, t)?;
            if priority as usize >= NUM_PRIO_LEVELS {
                return Err(Error::BadArg);
            }
            let new_level = NUM_PRIO_LEVELS - 1 - priority as usize;
            let old = st.tasks[t.index()].coord;
            if old.level as usize == new_level {
                return Ok(());
            }
            let free = !st.allocated.level_word(new_level) & SLOT_MASK;
            if free == 0 {
                return Err(Error::Fail);
            }
            let slot = find_first_set(free);
            let was_ready = st.ready.get(old.level as usize, old.slot as usize);

            st.ready.clear(old.level as usize, old.slot as usize);
            st.allocated.clear(old.level as usize, old.slot as usize);
            st.task_table[old.table_index()] = None;

            let new = Coord {
                level: new_level as u8,
                slot: slot as u8,
            };
            st.tasks[t.index()].coord = new;
            st.allocated.set(new_level, slot);
            st.task_table[new.table_index()] = Some(t);
            if was_ready {
                st.ready.set(new_level, slot);
            }
            // A pend bit is keyed by the coordinate, so it moves along
            if let Some(ev) = st.tasks[t.index()].pending_on {
                st.events[ev.index()]
                    .pend
                    .clear(old.level as usize, old.slot as usize);
                st.events[ev.index()].pend.set(new_level, slot);
            }
        }
        self.schedule(&mut lock);
        Ok(())
    }

    /// Suspend the calling task for `ticks` timer ticks. `sleep(0)` merely
    /// offers the processor to more urgent work.
    pub fn sleep(&self, ticks: Ticks) -> Result<()> {
        let mut lock = self.lock();
        {
            let st = lock.state();
            if st.in_interrupt != 0 || st.sched_lock != 0 {
                return Err(Error::BadContext);
            }
            if ticks != 0 {
                let cur = st.current;
                make_unready(st, cur);
                sleep_enqueue(st, cur, ticks);
            }
        }
        self.schedule(&mut lock);
        Ok(())
    }
}
