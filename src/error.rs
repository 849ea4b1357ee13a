//! Kernel error taxonomy
//!
//! Allocation, validation, capacity and protocol failures. IPC outcomes are
//! not errors; see [`QueueStatus`](crate::queue::QueueStatus).
//!
//! Author: Moroya Sakamoto

use thiserror::Error;

/// Kernel operation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KernelError {
    /// Stack size is zero, unaligned, or smaller than one saved frame
    #[error("stack size is not a valid multiple of the stack alignment")]
    StackSizeInvalid,
    /// Task table is full and no killed slot can be reused
    #[error("task table is full")]
    TooManyTasks,
    /// Stack pool has no gap large enough
    #[error("stack pool exhausted")]
    OutOfMemory,
    /// StartOperatingSystem was issued twice
    #[error("kernel already started")]
    AlreadyStarted,
    /// First-task hand-off fell through
    #[error("kernel start failed")]
    StartFailed,
    /// Operation requires a started kernel
    #[error("kernel not started")]
    NotStarted,
    /// No live task carries this id
    #[error("no such task")]
    NoSuchTask,
    /// Every slot group is bound to another channel
    #[error("no free channel")]
    NoChannel,
    /// Stack guard words were overwritten
    #[error("stack overflow detected")]
    StackOverflow,
    /// Channel could not satisfy a non-blocking operation
    #[error("operation would block")]
    WouldBlock,
    /// Trap carried an unknown request code
    #[error("undefined request")]
    UndefinedRequest,
}

pub type Result<T> = core::result::Result<T, KernelError>;
