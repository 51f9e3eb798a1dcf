//! Message boxes.
//!
//! Every task owns a FIFO of pooled fixed-size message buffers. A sender
//! allocates a buffer, fills it and posts it to the destination task; the
//! receiver pops buffers in arrival order and returns them to the pool.
//! Reception blocks on a per-task semaphore that is created lazily on the
//! first blocking receive.

use crate::cfg::{MAX_MESSAGES, MSG_PAYLOAD_SIZE};
use crate::error::{Error, Result};
use crate::event::{alloc_event, free_event, EventKind, WaitResult};
use crate::klock::KLock;
use crate::port::Port;
use crate::semaphore::SemaId;
use crate::state::KernelState;
use crate::task::{check_task, TaskId};
use crate::utils::Init;
use crate::{Kernel, Ticks, INFINITE};

/// Identifies a message buffer held by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MsgId(pub(crate) u8);

impl MsgId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MsgState {
    Free,
    /// Held by a task between alloc/get and send/free.
    Owned,
    /// Sitting in some task's receive queue.
    Queued,
}

pub(crate) struct MsgCb {
    pub state: MsgState,
    pub len: usize,
    pub next: Option<MsgId>,
    pub data: [u8; MSG_PAYLOAD_SIZE],
}

impl Init for MsgCb {
    const INIT: Self = Self {
        state: MsgState::Free,
        len: 0,
        next: None,
        data: [0; MSG_PAYLOAD_SIZE],
    };
}

fn check_owned(st: &KernelState, m: MsgId) -> Result<()> {
    if m.index() < MAX_MESSAGES && st.msgs[m.index()].state == MsgState::Owned {
        Ok(())
    } else {
        Err(Error::BadArg)
    }
}

/// Pop the head of a task's receive queue.
fn pop_msg(st: &mut KernelState, t: TaskId) -> Option<MsgId> {
    let head = st.tasks[t.index()].msg_head?;
    let next = st.msgs[head.index()].next.take();
    st.tasks[t.index()].msg_head = next;
    if next.is_none() {
        st.tasks[t.index()].msg_tail = None;
    }
    st.msgs[head.index()].state = MsgState::Owned;
    Some(head)
}

impl<P: Port> Kernel<P> {
    /// Take a buffer from the message pool.
    ///
    /// At task level this blocks until a buffer becomes available. From an
    /// interrupt handler or with scheduling inhibited an exhausted pool
    /// fails with [`Error::NoMem`] instead.
    pub fn msg_alloc(&self) -> Result<MsgId> {
        let mut lock = self.lock();
        loop {
            {
                let st = lock.state();
                if let Some(m) = st.free_msgs.pop() {
                    let cb = &mut st.msgs[m.index()];
                    cb.state = MsgState::Owned;
                    cb.len = 0;
                    cb.next = None;
                    return Ok(m);
                }
                if st.in_interrupt != 0 || st.sched_lock != 0 {
                    return Err(Error::NoMem);
                }
            }
            // Serialize would-be allocators, then wait for a free
            let (sync, wait) = {
                let st = lock.state();
                (st.msg_alloc_sync, st.msg_alloc_wait)
            };
            self.sema_get_in(&mut lock, sync)?;
            lock.state().msg_alloc_requested = true;
            self.sema_get_in(&mut lock, wait)?;
            self.sema_signal_in(&mut lock, sync)?;
        }
    }

    /// Return a buffer to the message pool, possibly waking a task blocked
    /// in [`msg_alloc`].
    ///
    /// [`msg_alloc`]: Self::msg_alloc
    pub fn msg_free(&self, m: MsgId) -> Result<()> {
        let mut lock = self.lock();
        {
            let st = lock.state();
            check_owned(st, m)?;
            st.msgs[m.index()].state = MsgState::Free;
            let _ = st.free_msgs.try_push(m);
        }
        self.notify_msg_freed(&mut lock);
        Ok(())
    }

    /// Copy `data` into an owned buffer. Fails with [`Error::BadArg`] if
    /// the payload does not fit.
    pub fn msg_write(&self, m: MsgId, data: &[u8]) -> Result<()> {
        if data.len() > MSG_PAYLOAD_SIZE {
            return Err(Error::BadArg);
        }
        let mut lock = self.lock();
        let st = lock.state();
        check_owned(st, m)?;
        let cb = &mut st.msgs[m.index()];
        cb.data[..data.len()].copy_from_slice(data);
        cb.len = data.len();
        Ok(())
    }

    /// Copy the payload of an owned buffer into `buf`, returning the number
    /// of bytes copied.
    pub fn msg_read(&self, m: MsgId, buf: &mut [u8]) -> Result<usize> {
        let mut lock = self.lock();
        let st = lock.state();
        check_owned(st, m)?;
        let cb = &st.msgs[m.index()];
        let n = cb.len.min(buf.len());
        buf[..n].copy_from_slice(&cb.data[..n]);
        Ok(n)
    }

    /// Post an owned buffer to the destination task's receive queue,
    /// passing ownership. If the destination no longer exists the buffer is
    /// returned to the pool and the call fails with [`Error::Fail`].
    pub fn msg_send(&self, m: MsgId, dest: TaskId) -> Result<()> {
        let mut lock = self.lock();
        let undeliverable = {
            let st = lock.state();
            check_owned(st, m)?;
            if check_task(st, dest).is_err() {
                st.msgs[m.index()].state = MsgState::Free;
                let _ = st.free_msgs.try_push(m);
                true
            } else {
                st.msgs[m.index()].state = MsgState::Queued;
                st.msgs[m.index()].next = None;
                match st.tasks[dest.index()].msg_tail {
                    Some(tail) => st.msgs[tail.index()].next = Some(m),
                    None => st.tasks[dest.index()].msg_head = Some(m),
                }
                st.tasks[dest.index()].msg_tail = Some(m);
                false
            }
        };
        if undeliverable {
            self.notify_msg_freed(&mut lock);
            return Err(Error::Fail);
        }
        // Wake the receiver if it is blocked waiting for mail
        let sem = {
            let st = lock.state();
            if st.tasks[dest.index()].msg_pending_wait {
                st.tasks[dest.index()].msg_pending_wait = false;
                st.tasks[dest.index()].msg_sem
            } else {
                None
            }
        };
        if let Some(sem) = sem {
            self.sema_signal_in(&mut lock, sem.0)?;
        }
        Ok(())
    }

    /// Receive the oldest queued message, blocking until one arrives.
    pub fn msg_get(&self) -> Result<MsgId> {
        match self.msg_recv(INFINITE)? {
            Some(m) => Ok(m),
            // An infinite wait only returns with a message
            None => Err(Error::Fail),
        }
    }

    /// Like [`msg_get`], but give up after `timeout` ticks, returning
    /// `Ok(None)`. A `timeout` of zero polls without blocking.
    ///
    /// [`msg_get`]: Self::msg_get
    pub fn msg_wait(&self, timeout: Ticks) -> Result<Option<MsgId>> {
        self.msg_recv(timeout)
    }

    /// Whether the calling task has mail queued.
    pub fn msg_available(&self) -> bool {
        let mut lock = self.lock();
        let st = lock.state();
        st.tasks[st.current.index()].msg_head.is_some()
    }

    fn msg_recv(&self, timeout: Ticks) -> Result<Option<MsgId>> {
        let mut lock = self.lock();
        let mut remaining = timeout;
        loop {
            {
                let st = lock.state();
                let cur = st.current;
                if let Some(m) = pop_msg(st, cur) {
                    return Ok(Some(m));
                }
                if remaining == 0 {
                    return Ok(None);
                }
                if st.in_interrupt != 0 || st.sched_lock != 0 {
                    return Err(Error::BadContext);
                }
            }
            let sem = self.ensure_msg_sem(&mut lock)?;
            let start = {
                let st = lock.state();
                let cur = st.current;
                st.tasks[cur.index()].msg_pending_wait = true;
                st.jiffies
            };
            if timeout == INFINITE {
                self.sema_get_in(&mut lock, sem.0)?;
            } else {
                match self.sema_wait_in(&mut lock, sem.0, remaining)? {
                    WaitResult::Signaled => {
                        let st = lock.state();
                        let elapsed = st.jiffies.wrapping_sub(start);
                        remaining = remaining.saturating_sub(elapsed);
                    }
                    WaitResult::TimedOut => {
                        let st = lock.state();
                        let cur = st.current;
                        st.tasks[cur.index()].msg_pending_wait = false;
                        // Mail may have arrived in the very tick that
                        // expired the wait
                        if let Some(m) = pop_msg(st, cur) {
                            return Ok(Some(m));
                        }
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Create the calling task's receive semaphore on first use.
    fn ensure_msg_sem(&self, lock: &mut KLock<'_, P>) -> Result<SemaId> {
        let st = lock.state();
        let cur = st.current;
        if let Some(sem) = st.tasks[cur.index()].msg_sem {
            return Ok(sem);
        }
        let ev = alloc_event(st, EventKind::Semaphore { count: 0 })?;
        let sem = SemaId(ev);
        st.tasks[cur.index()].msg_sem = Some(sem);
        Ok(sem)
    }

    /// Signal the allocation throttle after a buffer went back to the pool.
    fn notify_msg_freed(&self, lock: &mut KLock<'_, P>) {
        let wait = {
            let st = lock.state();
            if !st.msg_alloc_requested {
                return;
            }
            st.msg_alloc_requested = false;
            st.msg_alloc_wait
        };
        let _ = self.sema_signal_in(lock, wait);
    }

    /// Release a dying task's message resources: queued buffers go back to
    /// the pool and the receive semaphore is destroyed.
    pub(crate) fn sweep_task_messages(&self, lock: &mut KLock<'_, P>, t: TaskId) {
        let mut freed_any = false;
        {
            let st = lock.state();
            while let Some(m) = pop_msg(st, t) {
                st.msgs[m.index()].state = MsgState::Free;
                let _ = st.free_msgs.try_push(m);
                freed_any = true;
            }
            if let Some(sem) = st.tasks[t.index()].msg_sem.take() {
                // Only the owner ever pends on its receive semaphore, so
                // the pend set is empty here
                let _ = free_event(st, sem.0);
            }
            st.tasks[t.index()].msg_pending_wait = false;
        }
        if freed_any {
            self.notify_msg_freed(lock);
        }
    }
}
