//! Engine-wide status codes
//!
//! Every fallible operation in the engine returns one of these. Codec
//! failures are returned locally, never panicked.

use thiserror::Error;

/// Result type alias using [`Status`] as the error
pub type Result<T> = std::result::Result<T, Status>;

/// Status kinds shared by every layer of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Status {
    /// Unspecified failure
    #[error("generic failure")]
    GenericFailure,

    /// An argument violated the operation's preconditions
    #[error("invalid parameters")]
    InvalidParameters,

    /// The operation is not legal in the current state
    #[error("invalid state")]
    InvalidState,

    /// A decoded length or nesting depth exceeds the configured limits
    #[error("out of memory")]
    OutOfMemory,

    /// Short read/write or malformed wire data
    #[error("encoding error")]
    EncodingError,

    /// A peer sent a value that contradicts the protocol state
    #[error("invalid received parameter")]
    InvalidReceivedParameter,

    /// A pending operation expired
    #[error("timeout")]
    Timeout,

    /// The operation would block
    #[error("would block")]
    WouldBlock,

    /// The underlying channel or socket is closed
    #[error("closed")]
    Closed,

    /// The requested feature is not implemented
    #[error("not supported")]
    NotSupported,
}
