use std::os::unix::io::RawFd;

use thiserror::Error;

/// Failure taxonomy surfaced by reactor and socket operations.
///
/// Interrupted syscalls are retried internally and never reach this type.
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("fd {fd} out of range for this backend")]
    Range { fd: RawFd },

    #[error("fd {fd} already registered")]
    AlreadyRegistered { fd: RawFd },

    #[error("fd {fd} not registered")]
    NotRegistered { fd: RawFd },

    #[error("operation on fd {fd} would block")]
    WouldBlock { fd: RawFd },

    #[error("connection on fd {fd} closed")]
    Closed { fd: RawFd },

    #[error("no acceptable backend available for the requested mask")]
    NoBackend,

    #[error("invalid address '{input}': {reason}")]
    InvalidAddress { input: String, reason: &'static str },

    #[error("mock script violation: {0}")]
    MockMismatch(String),

    #[error("i/o error on fd {fd}: {source}")]
    IoUnknown { fd: RawFd, source: std::io::Error },
}

impl ReactorError {
    /// Fatal mock-only error. The caller should treat this as a broken test,
    /// never as a recoverable condition.
    pub fn mock_mismatch(msg: impl Into<String>) -> Self {
        ReactorError::MockMismatch(msg.into())
    }

    pub fn from_io(fd: RawFd, err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            WouldBlock => ReactorError::WouldBlock { fd },
            _ => ReactorError::IoUnknown { fd, source: err },
        }
    }
}
