//! Error handling for the Minos kernel crates

use alloc::string::{String, ToString};
use core::fmt;

/// Common error type used throughout the Minos kernel crates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid argument
    InvalidArgument(String),
    /// Invalid state
    InvalidState(String),
    /// Resource not found
    NotFound(String),
    /// Out of memory
    OutOfMemory,
    /// I/O error
    IoError(String),
    /// Access to an address no page record covers
    SegmentationFault(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::OutOfMemory => write!(f, "Out of memory"),
            Error::IoError(msg) => write!(f, "I/O error: {}", msg),
            Error::SegmentationFault(addr) => write!(f, "Segmentation fault at {:#x}", addr),
        }
    }
}

/// Result type for operations that can fail
pub type Result<T> = core::result::Result<T, Error>;

/// Creates a new invalid argument error
pub fn invalid_argument(msg: &str) -> Error {
    Error::InvalidArgument(msg.to_string())
}

/// Creates a new invalid state error
pub fn invalid_state(msg: &str) -> Error {
    Error::InvalidState(msg.to_string())
}

/// Creates a new not found error
pub fn not_found(msg: &str) -> Error {
    Error::NotFound(msg.to_string())
}

/// Creates a new out of memory error
pub fn out_of_memory() -> Error {
    Error::OutOfMemory
}

/// Creates a new IO error
pub fn io_error(msg: &str) -> Error {
    Error::IoError(msg.to_string())
}
