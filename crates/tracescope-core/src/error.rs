//! Failure taxonomy of the data engine.
//!
//! Every public entry point returns [`Result`]. Each error kind maps to a
//! negative errno value via [`Error::errno`], so callers that speak the
//! classic integer convention (language bindings, exit codes) can recover
//! the exact numeric code.

use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All failures the engine distinguishes.
#[derive(Debug, Error)]
pub enum Error {
    /// A file path or named entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// No readout interface accepts the file, or a document type mismatch.
    #[error("unrecognized data format: {0}")]
    InvalidFormat(String),

    /// The file opens but yields zero usable entries.
    #[error("no trace data in {}", .0.display())]
    NoData(PathBuf),

    /// A plugin or input name/data-format is already registered.
    #[error("already registered: {0}")]
    Conflict(String),

    /// The stream registry is full.
    #[error("stream registry exhausted")]
    Exhausted,

    /// A stream id does not map to a live slot.
    #[error("no such stream: {0}")]
    BadHandle(i16),

    /// A readout or processing method reported failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// A session document is malformed; the message names the sub-document.
    #[error("session document error: {0}")]
    Session(String),

    /// An underlying I/O operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The negative errno value corresponding to this error kind.
    pub fn errno(&self) -> i32 {
        match self {
            Error::NotFound(_) => -libc::ENOENT,
            Error::InvalidFormat(_) => -libc::EINVAL,
            Error::NoData(_) => -libc::ENODATA,
            Error::Conflict(_) => -libc::EEXIST,
            Error::Exhausted => -libc::ENODEV,
            Error::BadHandle(_) => -libc::EBADF,
            Error::Backend(_) => -libc::EFAULT,
            Error::Session(_) => -libc::EFAULT,
            Error::Io(err) => -err.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}
