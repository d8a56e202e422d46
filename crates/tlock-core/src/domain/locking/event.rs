//! Lock transition events
//!
//! Vocabulary for the `event` field of trace records emitted after a
//! transition commits.

/// Type of lock transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockEventType {
    /// A read lock was taken
    ReadAcquired,
    /// A read lock was given back
    ReadReleased,
    /// A write lock was taken by a task holding no reads, or nested
    WriteAcquired,
    /// The sole reader turned its read into a write lock
    Upgraded,
    /// A nested write lock was given back; the lock stays exclusive
    WriteReleased,
    /// The last write lock was given back; the lock is shared again
    Downgraded,
}

impl LockEventType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadAcquired => "read_acquired",
            Self::ReadReleased => "read_released",
            Self::WriteAcquired => "write_acquired",
            Self::Upgraded => "upgraded",
            Self::WriteReleased => "write_released",
            Self::Downgraded => "downgraded",
        }
    }

    /// Whether the transition took a lock (as opposed to giving one back)
    pub fn is_acquisition(&self) -> bool {
        matches!(
            self,
            Self::ReadAcquired | Self::WriteAcquired | Self::Upgraded
        )
    }
}

impl std::fmt::Display for LockEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
