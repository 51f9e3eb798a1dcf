//! Interrupt bracketing and the periodic tick.
//!
//! A port's interrupt handlers must bracket kernel service calls with
//! [`Kernel::enter_interrupt`] / [`Kernel::exit_interrupt`]. While the
//! nesting count is nonzero, reschedule requests are deferred; the
//! outermost `exit_interrupt` drains the software interrupt queue and
//! performs the deferred switch.

use arrayvec::ArrayVec;

use crate::cfg::MAX_TIMERS;
use crate::event::EventId;
use crate::port::Port;
use crate::sched::select_next;
use crate::task::{make_ready, sleep_dequeue};
use crate::timer::unlink_timer;
use crate::{Kernel, Ticks};

impl<P: Port> Kernel<P> {
    /// Note the entry into an interrupt handler.
    pub fn enter_interrupt(&self) {
        let mut lock = self.lock();
        lock.state().in_interrupt += 1;
    }

    /// Note the exit from an interrupt handler. At the outermost level this
    /// drains the software interrupt queue and honors a deferred reschedule
    /// request.
    pub fn exit_interrupt(&self) {
        let mut lock = self.lock();
        {
            let st = lock.state();
            if st.in_interrupt == 0 {
                return;
            }
            st.in_interrupt -= 1;
            if st.in_interrupt != 0 {
                return;
            }
        }
        self.run_soft_ints(&mut lock);
        let (prev, next) = {
            let st = lock.state();
            if st.sched_lock != 0 || !st.must_schedule {
                return;
            }
            st.must_schedule = false;
            let next = select_next(st);
            if next == st.current {
                return;
            }
            let prev = st.current;
            st.current = next;
            (prev, next)
        };
        self.port().interrupt_context_switch(prev, next);
    }

    /// The periodic tick handler. Must be called between matching
    /// [`enter_interrupt`] / [`exit_interrupt`] calls.
    ///
    /// Advances jiffies, counts down armed timers and sleeping tasks, and
    /// requests a reschedule (which also drives time slicing among tasks of
    /// equal priority).
    ///
    /// [`enter_interrupt`]: Self::enter_interrupt
    /// [`exit_interrupt`]: Self::exit_interrupt
    pub fn tick(&self) {
        let mut lock = self.lock();
        // Semaphores of expired timers are signaled after the list walk;
        // signaling re-enters the event layer
        let mut fired: ArrayVec<EventId, MAX_TIMERS> = ArrayVec::new();
        {
            let st = lock.state();
            if !st.running {
                return;
            }
            st.jiffies = st.jiffies.wrapping_add(1);

            let mut cur = st.timer_head;
            while let Some(t) = cur {
                let i = t.index();
                let next = st.timers[i].next;
                st.timers[i].counter = st.timers[i].counter.saturating_sub(1);
                if st.timers[i].counter == 0 {
                    st.timers[i].fired = true;
                    if let Some(sema) = st.timers[i].sema {
                        let _ = fired.try_push(sema.0);
                    }
                    if st.timers[i].reload != 0 {
                        st.timers[i].counter = st.timers[i].reload;
                    } else {
                        unlink_timer(st, t);
                    }
                }
                cur = next;
            }

            let mut cur = st.sleep_head;
            while let Some(t) = cur {
                let i = t.index();
                let next = st.tasks[i].sleep_next;
                st.tasks[i].ticks = st.tasks[i].ticks.saturating_sub(1);
                if st.tasks[i].ticks == 0 {
                    sleep_dequeue(st, t);
                    make_ready(st, t);
                }
                cur = next;
            }

            st.must_schedule = true;
        }
        for ev in fired {
            let _ = self.sema_signal_in(&mut lock, ev);
        }
    }

    /// The free-running tick counter. Wraps around on overflow.
    pub fn jiffies(&self) -> Ticks {
        let mut lock = self.lock();
        lock.state().jiffies
    }
}
