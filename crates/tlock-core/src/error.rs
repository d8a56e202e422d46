//! Error types for tlock
//!
//! Two very different failure channels live here:
//!
//! - [`Error`] is an ordinary, recoverable error for the ambient surface
//!   (configuration parsing and validation).
//! - [`LockDefect`] describes caller misuse of a lock (unbalanced or
//!   wrongly attributed releases). Defects are never returned; they are
//!   raised as panics carrying the defect as payload.

use crate::stm::TaskId;
use thiserror::Error;
use tracing::error;

/// Result type alias using tlock's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Recoverable errors
#[derive(Error, Debug)]
pub enum Error {
    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration could not be parsed: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "E600",
            Self::ConfigParse(_) => "E601",
        }
    }
}

/// An unrecoverable invariant violation caused by the calling code.
///
/// Raised through [`LockDefect::raise`], which panics with the defect as the
/// panic payload. A panicking tokio task surfaces it through
/// `JoinError::into_panic`, where it can be downcast for diagnostics.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockDefect {
    /// More read locks released than the task holds
    #[error("Defect: task {task} releasing read locks it does not hold (held: {held})")]
    ReleaseReadNotHeld { task: TaskId, held: usize },

    /// Write lock released by a task that does not own it
    #[error("Defect: task {task} releasing write lock it does not hold")]
    ReleaseWriteNotHeld { task: TaskId },

    /// A transaction asked to block where blocking is impossible
    #[error("Defect: task {task} requested a retry inside a non-blocking transaction")]
    RetryInNonBlockingTransaction { task: TaskId },
}

impl LockDefect {
    /// Get error code for this defect
    pub fn code(&self) -> &'static str {
        match self {
            Self::ReleaseReadNotHeld { .. } => "E310",
            Self::ReleaseWriteNotHeld { .. } => "E311",
            Self::RetryInNonBlockingTransaction { .. } => "E312",
        }
    }

    /// The task whose misuse triggered the defect
    pub fn task(&self) -> TaskId {
        match self {
            Self::ReleaseReadNotHeld { task, .. }
            | Self::ReleaseWriteNotHeld { task }
            | Self::RetryInNonBlockingTransaction { task } => *task,
        }
    }

    /// Log the defect without raising it
    pub fn report(&self) {
        error!(code = self.code(), task = %self.task(), "{}", self);
    }

    /// Log the defect and abort the current task by panicking with it.
    pub fn raise(self) -> ! {
        self.report();
        std::panic::panic_any(self)
    }
}
