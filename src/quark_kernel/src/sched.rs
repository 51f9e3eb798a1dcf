//! The scheduler.
//!
//! Selection is two find-first-set scans: the ready table's summary word
//! picks the most urgent level, then the level word is scanned circularly
//! from the level's round-robin offset. Tasks of equal priority therefore
//! take turns whenever a reschedule happens, and the periodic tick requests
//! a reschedule, which yields time slicing for free.

use crate::cfg::{NUM_PRIO_LEVELS, TASKS_PER_PRIO};
use crate::klock::KLock;
use crate::port::Port;
use crate::state::KernelState;
use crate::task::TaskId;
use crate::utils::bittab::find_first_set_from;
use crate::Kernel;

/// Pick the next task to run and advance the round-robin offset of its
/// level. The idle task is always ready, so selection cannot fail.
pub(crate) fn select_next(st: &mut KernelState) -> TaskId {
    let Some(level) = st.ready.first_level() else {
        // The idle task never blocks, so this is unreachable
        return st.current;
    };
    let word = st.ready.level_word(level);
    let slot = find_first_set_from(word, st.next_rr[level] as usize);
    st.next_rr[level] = ((slot + 1) & (TASKS_PER_PRIO - 1)) as u8;
    // A ready bit always maps to an occupied table slot
    st.task_table[level * TASKS_PER_PRIO + slot].unwrap_or(st.current)
}

enum YieldPlan {
    Plain,
    Switch(TaskId, TaskId),
    Stay,
}

impl<P: Port> Kernel<P> {
    /// Run the scheduler: drain pending software interrupts, then dispatch
    /// the most urgent ready task.
    ///
    /// Inside an interrupt handler or with scheduling inhibited this only
    /// records that a reschedule is wanted; the request is honored at the
    /// outermost interrupt exit or when the inhibit count drops to zero.
    pub(crate) fn schedule(&self, lock: &mut KLock<'_, P>) {
        if lock.state().in_interrupt != 0 {
            lock.state().must_schedule = true;
            return;
        }
        self.run_soft_ints(lock);
        let (prev, next) = {
            let st = lock.state();
            if st.sched_lock != 0 {
                st.must_schedule = true;
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
        self.port().context_switch(prev, next);
    }

    /// Offer the processor to other ready tasks of the same or lower
    /// priority. With several ready tasks at the caller's level this rotates
    /// through them in slot order.
    pub fn yield_now(&self) {
        let mut lock = self.lock();
        if lock.state().in_interrupt != 0 {
            return;
        }
        self.run_soft_ints(&mut lock);
        let plan = {
            let st = lock.state();
            if st.sched_lock != 0 {
                st.must_schedule = true;
                YieldPlan::Stay
            } else {
                let cur = st.current;
                let c = st.tasks[cur.index()].coord;
                let clevel = c.level as usize;
                if st.must_schedule || clevel + 1 >= NUM_PRIO_LEVELS {
                    // Deferred requests and the lowest level are served by a
                    // plain reschedule
                    YieldPlan::Plain
                } else {
                    // Prefer a ready peer at our own level, else fall to the
                    // next lower level that has a ready task
                    let peers = st.ready.level_word(clevel) & !(1usize << c.slot);
                    let below = st.ready.summary() & !((1usize << (clevel + 1)) - 1);
                    let target = if peers != 0 {
                        Some((clevel, peers))
                    } else if below != 0 {
                        let level = below.trailing_zeros() as usize;
                        Some((level, st.ready.level_word(level)))
                    } else {
                        None
                    };
                    match target {
                        None => YieldPlan::Stay,
                        Some((level, word)) => {
                            let slot = find_first_set_from(word, st.next_rr[level] as usize);
                            st.next_rr[level] = ((slot + 1) & (TASKS_PER_PRIO - 1)) as u8;
                            match st.task_table[level * TASKS_PER_PRIO + slot] {
                                Some(next) if next != cur => {
                                    st.current = next;
                                    YieldPlan::Switch(cur, next)
                                }
                                _ => YieldPlan::Stay,
                            }
                        }
                    }
                }
            }
        };
        match plan {
            YieldPlan::Plain => self.schedule(&mut lock),
            YieldPlan::Switch(prev, next) => self.port().context_switch(prev, next),
            YieldPlan::Stay => {}
        }
    }

    /// Inhibit task switching. Nestable; interrupts still run but any
    /// reschedule they request is deferred until [`sched_unlock`] brings
    /// the count back to zero.
    ///
    /// [`sched_unlock`]: Self::sched_unlock
    pub fn sched_lock(&self) {
        let mut lock = self.lock();
        lock.state().sched_lock += 1;
    }

    /// Undo one [`sched_lock`]. When the count reaches zero, a deferred
    /// reschedule request is honored immediately.
    ///
    /// [`sched_lock`]: Self::sched_lock
    pub fn sched_unlock(&self) {
        let mut lock = self.lock();
        let resched = {
            let st = lock.state();
            if st.sched_lock == 0 {
                return;
            }
            st.sched_lock -= 1;
            st.sched_lock == 0 && st.must_schedule
        };
        if resched {
            self.schedule(&mut lock);
        }
    }
}
