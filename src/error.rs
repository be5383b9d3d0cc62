//! Error Type Definition Module
//!
//! This module defines the errors that may be encountered while packaging
//! an EPUB container. All errors are uniformly wrapped in the
//! [PackagingError] enumeration, and every variant carries enough context
//! (the offending path or the violated requirement) to diagnose the failure.

use thiserror::Error;

/// Types of errors that can occur during EPUB packaging
///
/// Nothing in this crate retries a failed operation; every error aborts the
/// enclosing export and is handed back to the caller.
#[derive(Debug, Error)]
pub enum PackagingError {
    /// Unable to open a file error
    ///
    /// This error occurs when a source file, a font file, a staging path or
    /// the destination archive could not be opened or created, for example
    /// because of missing parent directories or insufficient permissions.
    #[error("Cannot open file: Unable to open \"{path}\": {source}")]
    CannotOpenFile {
        path: String,
        source: std::io::Error,
    },

    /// Unable to store file error
    ///
    /// This error occurs when writing data failed after the target was
    /// opened, e.g. streaming a file into an archive entry, finishing the
    /// archive, or writing obfuscated bytes back to a font file.
    #[error("Cannot store file: Unable to store \"{path}\": {source}")]
    CannotStoreFile {
        path: String,
        source: std::io::Error,
    },

    /// Precondition violation error
    ///
    /// This error occurs when data required by an operation is missing
    /// before the operation starts, such as the UUID identifier needed to
    /// obfuscate a font with the Adobe algorithm.
    #[error("Precondition violation: {reason}")]
    PreconditionViolation { reason: String },
}

impl PackagingError {
    pub(crate) fn open<P: Into<String>>(path: P, source: std::io::Error) -> Self {
        PackagingError::CannotOpenFile {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn store<P: Into<String>>(path: P, source: std::io::Error) -> Self {
        PackagingError::CannotStoreFile {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn precondition<R: Into<String>>(reason: R) -> Self {
        PackagingError::PreconditionViolation {
            reason: reason.into(),
        }
    }

    /// Replaces the path attached to this error
    pub(crate) fn with_path<P: Into<String>>(self, path: P) -> Self {
        match self {
            PackagingError::CannotOpenFile { source, .. } => Self::open(path, source),
            PackagingError::CannotStoreFile { source, .. } => Self::store(path, source),
            other => other,
        }
    }

    /// Returns the path attached to this error, if any
    pub fn path(&self) -> Option<&str> {
        match self {
            PackagingError::CannotOpenFile { path, .. }
            | PackagingError::CannotStoreFile { path, .. } => Some(path.as_str()),
            PackagingError::PreconditionViolation { .. } => None,
        }
    }
}

#[cfg(test)]
impl PartialEq for PackagingError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::CannotOpenFile { path: l_path, .. },
                Self::CannotOpenFile { path: r_path, .. },
            ) => l_path == r_path,
            (
                Self::CannotStoreFile { path: l_path, .. },
                Self::CannotStoreFile { path: r_path, .. },
            ) => l_path == r_path,
            (
                Self::PreconditionViolation { reason: l_reason },
                Self::PreconditionViolation { reason: r_reason },
            ) => l_reason == r_reason,
            _ => false,
        }
    }
}
