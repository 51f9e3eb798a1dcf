//! The kernel's mutable state.
//!
//! Everything lives in one structure owned by [`Kernel`](crate::Kernel) and
//! accessed through [`KLock`](crate::klock::KLock); there are no mutable
//! statics anywhere in the kernel.

use arrayvec::ArrayVec;

use crate::cfg::{
    MAX_EVENTS, MAX_MESSAGES, MAX_TASKS, MAX_TIMERS, NUM_PRIO_LEVELS, NUM_SOFT_INTS,
    SOFT_INT_QUEUE_LEN, TASKS_PER_PRIO,
};
use crate::event::{EventCb, EventId, EventKind};
use crate::msgbox::{MsgCb, MsgId};
use crate::softint::{SoftIntHandler, SoftIntReq};
use crate::task::{TaskCb, TaskId};
use crate::timer::{TimerCb, TimerId};
use crate::utils::bittab::BitTable;
use crate::utils::Init;
use crate::Ticks;

pub(crate) struct KernelState {
    /// Becomes true in `start` once the first dispatch is imminent.
    pub running: bool,
    /// Interrupt nesting depth. Starts at 1 so that nothing gets scheduled
    /// before `start` brings the kernel up.
    pub in_interrupt: u32,
    /// Schedule-inhibit counter, see `sched_lock`.
    pub sched_lock: u32,
    /// A reschedule was requested while it could not be carried out.
    pub must_schedule: bool,
    /// Free-running tick counter.
    pub jiffies: Ticks,
    pub current: TaskId,

    pub ready: BitTable,
    pub allocated: BitTable,
    /// Per-level round-robin offsets into the slot words.
    pub next_rr: [u8; NUM_PRIO_LEVELS],
    pub task_table: [Option<TaskId>; NUM_PRIO_LEVELS * TASKS_PER_PRIO],
    pub tasks: [TaskCb; MAX_TASKS],
    pub free_tasks: ArrayVec<TaskId, MAX_TASKS>,
    /// Head of the doubly index-linked list of sleeping tasks.
    pub sleep_head: Option<TaskId>,

    pub events: [EventCb; MAX_EVENTS],
    pub free_events: ArrayVec<EventId, MAX_EVENTS>,

    pub timers: [TimerCb; MAX_TIMERS],
    pub free_timers: ArrayVec<TimerId, MAX_TIMERS>,
    /// Head of the doubly index-linked list of armed timers.
    pub timer_head: Option<TimerId>,

    pub msgs: [MsgCb; MAX_MESSAGES],
    pub free_msgs: ArrayVec<MsgId, MAX_MESSAGES>,
    /// Serializes tasks blocking for a message buffer.
    pub msg_alloc_sync: EventId,
    /// Signaled when a buffer is freed while an allocator is waiting.
    pub msg_alloc_wait: EventId,
    pub msg_alloc_requested: bool,

    /// Ring buffer of raised software interrupts; one slot is kept empty to
    /// distinguish full from empty.
    pub softint_queue: [SoftIntReq; SOFT_INT_QUEUE_LEN + 1],
    pub softint_in: usize,
    pub softint_out: usize,
    pub softint_handlers: [Option<SoftIntHandler>; NUM_SOFT_INTS],
}

impl KernelState {
    pub(crate) fn new() -> Self {
        let mut st = Self {
            running: false,
            in_interrupt: 1,
            sched_lock: 0,
            must_schedule: false,
            jiffies: 0,
            current: TaskId(0),
            ready: BitTable::INIT,
            allocated: BitTable::INIT,
            next_rr: [0; NUM_PRIO_LEVELS],
            task_table: [None; NUM_PRIO_LEVELS * TASKS_PER_PRIO],
            tasks: [TaskCb::INIT; MAX_TASKS],
            free_tasks: ArrayVec::new(),
            sleep_head: None,
            events: [EventCb::INIT; MAX_EVENTS],
            free_events: ArrayVec::new(),
            timers: [TimerCb::INIT; MAX_TIMERS],
            free_timers: ArrayVec::new(),
            timer_head: None,
            msgs: [MsgCb::INIT; MAX_MESSAGES],
            free_msgs: ArrayVec::new(),
            msg_alloc_sync: EventId(0),
            msg_alloc_wait: EventId(0),
            msg_alloc_requested: false,
            softint_queue: [SoftIntReq::INIT; SOFT_INT_QUEUE_LEN + 1],
            softint_in: 0,
            softint_out: 0,
            softint_handlers: [None; NUM_SOFT_INTS],
        };
        // Free pools hand out low indices first
        for i in (0..MAX_TASKS).rev() {
            let _ = st.free_tasks.try_push(TaskId(i as u8));
        }
        for i in (0..MAX_EVENTS).rev() {
            let _ = st.free_events.try_push(EventId(i as u8));
        }
        for i in (0..MAX_TIMERS).rev() {
            let _ = st.free_timers.try_push(TimerId(i as u8));
        }
        for i in (0..MAX_MESSAGES).rev() {
            let _ = st.free_msgs.try_push(MsgId(i as u8));
        }
        // The message-pool allocation throttle exists from the start
        if let Some(sync) = st.free_events.pop() {
            st.events[sync.index()].kind = EventKind::Semaphore { count: 1 };
            st.msg_alloc_sync = sync;
        }
        if let Some(wait) = st.free_events.pop() {
            st.events[wait.index()].kind = EventKind::Semaphore { count: 0 };
            st.msg_alloc_wait = wait;
        }
        st
    }
}
