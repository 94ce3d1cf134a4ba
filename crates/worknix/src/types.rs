use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle to a directory slot in the tree arena.
///
/// The generation is bumped every time a slot is released, so a handle kept
/// across a `delete_directory` stops resolving instead of aliasing a newer
/// directory that reused the slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DirId {
    index: u32,
    generation: u32,
}

impl DirId {
    /// The root directory handle (slot 0 is never released)
    pub const ROOT: DirId = DirId {
        index: 0,
        generation: 0,
    };

    /// Creates a DirId from a raw slot index and generation
    pub fn new(index: u32, generation: u32) -> Self {
        DirId { index, generation }
    }

    /// Returns the arena slot index
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Returns the slot generation this handle was issued for
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for DirId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Represents a point in time with second and nanosecond precision
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since Unix epoch
    pub secs: u64,
    /// Nanoseconds within the second
    pub nanos: u32,
}

impl Timestamp {
    /// Returns the current timestamp
    pub fn now() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            secs: now.as_secs(),
            nanos: now.subsec_nanos(),
        }
    }

    /// Calendar form in UTC, as printed by `date`.
    pub fn to_date_string(&self) -> String {
        i64::try_from(self.secs)
            .ok()
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, self.nanos))
            .map(|dt| dt.format("%a %b %e %H:%M:%S UTC %Y").to_string())
            .unwrap_or_else(|| self.to_string())
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.secs
            .cmp(&other.secs)
            .then_with(|| self.nanos.cmp(&other.nanos))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.secs, self.nanos)
    }
}

/// Error types for file system, session and persistence operations
#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    /// A path, file, user or package does not exist.
    #[error("{0}: no such file or directory")]
    NotFound(String),

    /// Mutation attempted without elevation outside setup mode, or on a
    /// protected path or account.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Malformed input such as a bad username or a password confirmation
    /// mismatch.
    #[error("invalid input: {0}")]
    Validation(String),

    /// A supplied credential did not match the stored one.
    #[error("authentication failed for '{0}'")]
    AuthenticationFailed(String),

    /// An operation that requires a logged-in session was called while
    /// logged out.
    #[error("no user is logged in")]
    NotLoggedIn,

    /// Snapshot encode, decode or store failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A lower-level I/O error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

impl VfsError {
    /// Returns true for the errors that belong to the persistence class.
    pub fn is_persistence(&self) -> bool {
        matches!(self, VfsError::Persistence(_) | VfsError::IoError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_ordering() {
        let a = Timestamp { secs: 5, nanos: 10 };
        let b = Timestamp { secs: 5, nanos: 11 };
        let c = Timestamp { secs: 6, nanos: 0 };
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a.max(c), c);
    }

    #[test]
    fn test_date_string() {
        let epoch = Timestamp { secs: 0, nanos: 0 };
        assert_eq!(epoch.to_date_string(), "Thu Jan  1 00:00:00 UTC 1970");
        let later = Timestamp { secs: 1_700_000_000, nanos: 0 };
        assert_eq!(later.to_date_string(), "Tue Nov 14 22:13:20 UTC 2023");
    }

    #[test]
    fn test_dir_id_display() {
        assert_eq!(DirId::ROOT.to_string(), "0v0");
        assert_eq!(DirId::new(7, 2).to_string(), "7v2");
    }

    #[test]
    fn test_error_messages() {
        let err = VfsError::NotFound("/nope".to_string());
        assert_eq!(err.to_string(), "/nope: no such file or directory");
        let err = VfsError::PermissionDenied("write /etc".to_string());
        assert_eq!(err.to_string(), "permission denied: write /etc");
    }

    #[test]
    fn test_io_error_is_persistence_class() {
        let err: VfsError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert!(err.is_persistence());
        assert!(!VfsError::NotLoggedIn.is_persistence());
    }
}
