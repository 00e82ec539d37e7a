//! Errors raised by the pass-through layer.
//!
//! These describe failures of the *transport*: misuse of the request builder,
//! OS calls that could not be made, and malformed reports from the platform.
//! A device that executed a command and answered with a bad status is not an
//! error at this level, see [`crate::pt::ResultCategory`].

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PtError {
    /// The request builder was misused (missing or duplicated CDB, conflicting
    /// buffers, unsupported attributes, reuse without clearing).
    #[error("bad parameters: {0}")]
    BadParams(String),

    /// An OS primitive failed before or while issuing the command.
    #[error("{context}: {}", os_message(.errno))]
    Os { errno: i32, context: &'static str },

    /// Every slot of a fixed-size handle table is in use.
    #[error("too many open handles (capacity {capacity})")]
    TooManyOpenHandles { capacity: usize },

    /// The handle was never opened or has already been closed.
    #[error("device handle is not open")]
    NotOpen,

    /// The platform reported a residual outside `0..=requested`.
    #[error("malformed response: residual {resid} with {requested} bytes requested")]
    Malformed { resid: i64, requested: usize },

    /// The current platform cannot express the request at all.
    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),
}

fn os_message(errno: &i32) -> io::Error {
    io::Error::from_raw_os_error(*errno)
}

impl PtError {
    /// Builds an [`PtError::Os`] from the calling thread's last OS error.
    pub fn last_os_error(context: &'static str) -> Self {
        let errno = io::Error::last_os_error().raw_os_error().unwrap_or(0);
        Self::Os { errno, context }
    }

    pub fn from_io(err: &io::Error, context: &'static str) -> Self {
        Self::Os {
            errno: err.raw_os_error().unwrap_or(0),
            context,
        }
    }

    /// The negated platform error number, as the C tools return it.
    ///
    /// Errors that did not come from the OS map to `0`.
    pub fn negated(&self) -> i32 {
        match self {
            Self::Os { errno, .. } => -errno,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PtError;

    #[test]
    fn negated_errno() {
        let e = PtError::Os {
            errno: 2,
            context: "open",
        };
        assert_eq!(e.negated(), -2);
        assert!(e.to_string().starts_with("open: "));
        assert_eq!(PtError::NotOpen.negated(), 0);
    }
}
