//! Error kinds surfaced at the engine's external boundary.
//!
//! Every fallible operation returns one of these instead of a raw negative
//! integer; the numbered-request dispatcher in [`crate::fs`] is the one place
//! that flattens them back down to the negative codes an ioctl-style caller
//! expects.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RdError {
    /// Malformed path, unknown descriptor, wrong type for the operation,
    /// out-of-range seek, or a copy-in/copy-out failure.
    #[error("invalid argument")]
    InvalidArgument,

    /// `creat`/`mkdir` target already exists.
    #[error("already exists")]
    AlreadyExists,

    /// The inode table or the data-block pool is exhausted.
    #[error("no space left")]
    NoSpace,

    /// The file is already at the addressing ceiling.
    #[error("file too big")]
    FileTooBig,

    /// A non-blocking exclusive acquire was refused, or the target inode has
    /// outstanding opens.
    #[error("resource busy")]
    Busy,

    /// Unlink of a non-empty directory.
    #[error("directory not empty")]
    NotEmpty,

    /// A second `INIT` request.
    #[error("already initialized")]
    AlreadyInitialized,

    /// `INIT` has not yet succeeded.
    #[error("not initialized")]
    NotInitialized,

    /// A consistency invariant was violated at runtime (bitmap/counter
    /// disagreement, an inode scan that should have found a free slot but
    /// didn't). Always logged before being returned.
    #[error("internal consistency failure")]
    Internal,
}

impl RdError {
    /// The stable negative code this error is reported as at the external
    /// boundary (see the request table in the specification).
    pub fn code(self) -> i32 {
        match self {
            RdError::InvalidArgument => -1,
            RdError::AlreadyExists => -2,
            RdError::NoSpace => -3,
            RdError::FileTooBig => -4,
            RdError::Busy => -5,
            RdError::NotEmpty => -6,
            RdError::AlreadyInitialized => -7,
            RdError::NotInitialized => -8,
            RdError::Internal => -9,
        }
    }
}

pub type RdResult<T> = Result<T, RdError>;
