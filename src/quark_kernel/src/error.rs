/// The error code returned by a kernel service.
///
/// Timeouts are not errors; operations that can time out report that through
/// their return value (e.g. [`WaitResult::TimedOut`]).
///
/// [`WaitResult::TimedOut`]: crate::WaitResult::TimedOut
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum Error {
    /// The operation could not be carried out, e.g. all slots of the
    /// requested priority level are occupied or an event is still in use.
    Fail = 1,
    /// A fixed-size pool is exhausted.
    NoMem = 2,
    /// A parameter or object handle is invalid.
    BadArg = 3,
    /// The operation is not allowed in the calling context, e.g. a blocking
    /// wait was attempted from an interrupt handler or with scheduling
    /// inhibited.
    BadContext = 4,
}

impl Error {
    /// The conventional integer form of the error code (negative on error).
    pub const fn code(self) -> i8 {
        -(self as i8)
    }
}

pub type Result<T> = core::result::Result<T, Error>;
