#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

/// Failure reported by a durable [`super::Backend`].
///
/// These never reach callers of [`super::CredentialStore`]; the store logs them and falls
/// back to memory.
#[non_exhaustive]
#[derive(Debug)]
pub enum StorageError {
    /// Underlying file or device failure
    Io(std::io::Error),
    /// Persisted contents could not be encoded or decoded
    Serde(serde_json::Error),
    /// The backend refused the operation (quota, permissions, private mode, ...)
    Unavailable(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "storage I/O error: {e}"),
            Self::Serde(e) => write!(f, "storage encoding error: {e}"),
            Self::Unavailable(reason) => write!(f, "storage unavailable: {reason}"),
        }
    }
}

impl StdError for StorageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Serde(e) => Some(e),
            Self::Unavailable(_) => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde(e)
    }
}
