//! Compile-time kernel capacities.
//!
//! All pools are sized here. The values are deliberately small; a port or
//! application that needs more room adjusts them and rebuilds the kernel.

/// The number of distinct task priorities. Priority `0` is the lowest and
/// `NUM_PRIO_LEVELS - 1` is the highest. The idle task runs at priority `0`.
pub const NUM_PRIO_LEVELS: usize = 8;

/// The number of task slots per priority level. Must be a power of two no
/// larger than the machine word size.
pub const TASKS_PER_PRIO: usize = 8;

/// The size of the task control block pool. A task table slot is only usable
/// while a control block is available, so there is no point in making this
/// larger than `NUM_PRIO_LEVELS * TASKS_PER_PRIO`.
pub const MAX_TASKS: usize = 16;

/// The size of the event pool, shared by semaphores, mutexes and flag sets.
/// Two entries are reserved for the message-pool allocation throttle.
pub const MAX_EVENTS: usize = 32;

/// The size of the timer pool.
pub const MAX_TIMERS: usize = 8;

/// The size of the message buffer pool.
pub const MAX_MESSAGES: usize = 16;

/// The payload capacity of a pooled message buffer, in bytes.
pub const MSG_PAYLOAD_SIZE: usize = 64;

/// The number of software interrupt lines.
pub const NUM_SOFT_INTS: usize = 8;

/// The capacity of the software interrupt request queue. Requests raised
/// while the queue is full are dropped.
pub const SOFT_INT_QUEUE_LEN: usize = 8;

const _: () = assert!(TASKS_PER_PRIO.is_power_of_two());
const _: () = assert!(TASKS_PER_PRIO <= usize::BITS as usize);
const _: () = assert!(NUM_PRIO_LEVELS <= usize::BITS as usize);
const _: () = assert!(MAX_TASKS <= 256 && MAX_EVENTS <= 256);
const _: () = assert!(MAX_TIMERS <= 256 && MAX_MESSAGES <= 256);
