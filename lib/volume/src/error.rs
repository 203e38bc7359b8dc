//! Error taxonomy shared by the adapters, the volume model and the navigator.

use std::io;

use thiserror::Error;

use crate::native::NativeError;

pub type VolumeResult<T> = Result<T, VolumeError>;

/// Error type for external users
#[derive(Error, Debug)]
pub enum VolumeError {
    /// The native library or its session state could not be set up.
    #[error("unable to initialize the {backend} library: {reason}")]
    Initialization {
        backend: &'static str,
        reason: String,
    },
    /// A recognised volume could not be opened or mounted.
    #[error("unable to open \"{path}\": {reason}")]
    Open { path: String, reason: String },
    /// Neither backend recognised the path.
    #[error("\"{path}\" is not a valid HFS or HFS+ volume")]
    NotHfsVolume { path: String },
    /// A read, list or stat call failed.
    #[error("{operation} failed: {reason}")]
    Operation {
        operation: &'static str,
        reason: String,
    },
    /// A mutating operation was attempted on a session opened read-only.
    #[error("the volume is mounted read-only")]
    ReadOnly,
    /// The active backend has no write support at all.
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        operation: &'static str,
        backend: &'static str,
    },
    /// The backend rejected a create, delete, rename or write.
    #[error("{operation} failed: {reason}")]
    WriteFailed {
        operation: &'static str,
        reason: String,
    },
    #[error("\"{path}\" already exists")]
    AlreadyExists { path: String },
    #[error("not enough free space on the volume: {reason}")]
    InsufficientSpace { reason: String },
    #[error("entry not found: {0}")]
    NotFound(String),
    /// The volume an entry was listed from has been closed.
    #[error("the volume has been closed")]
    Closed,
    /// The entry was produced by a different volume session.
    #[error("\"{name}\" does not belong to this volume")]
    ForeignEntry { name: String },
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },
    /// A deferred operation was discarded before it ran.
    #[error("the operation was cancelled")]
    Cancelled,
    /// Host side I/O failed while importing or exporting.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl VolumeError {
    pub(crate) fn operation(operation: &'static str, err: NativeError) -> Self {
        VolumeError::Operation {
            operation,
            reason: err.into_message(),
        }
    }

    /// Wrap a native write failure, recognising collisions and full volumes
    /// from the native error text.
    pub(crate) fn write(operation: &'static str, path: &str, err: NativeError) -> Self {
        let reason = err.into_message();
        let lowered = reason.to_ascii_lowercase();
        if lowered.contains("exist") {
            VolumeError::AlreadyExists {
                path: path.to_string(),
            }
        } else if lowered.contains("full") || lowered.contains("space") {
            VolumeError::InsufficientSpace { reason }
        } else {
            VolumeError::WriteFailed { operation, reason }
        }
    }

    /// Whether trying the same call again could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            VolumeError::ReadOnly
                | VolumeError::Unsupported { .. }
                | VolumeError::NotHfsVolume { .. }
                | VolumeError::InvalidName { .. }
                | VolumeError::ForeignEntry { .. }
                | VolumeError::Closed
        )
    }
}
