//! Task identity
//!
//! Every transaction runs on behalf of a task. The identity is the key used
//! for reentrancy bookkeeping, so it must be stable for the lifetime of the
//! task and distinct from every other live task.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;

/// Counter for identities minted with [`TaskId::fresh`]
static NEXT_DETACHED: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a logical task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Repr);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Repr {
    /// A tokio task
    Task(tokio::task::Id),
    /// Code running outside any tokio task (e.g. inside `block_on`)
    Thread(ThreadId),
    /// Identity handed out explicitly by the caller's own scheduler
    Detached(u64),
}

impl TaskId {
    /// Identity of the task currently running.
    ///
    /// Inside a tokio task this is the task id; anywhere else it falls back
    /// to the id of the current OS thread.
    ///
    /// The identity is per task, not per future. Futures polled concurrently
    /// in one task, such as the branches of `tokio::join!` or `select!`, get
    /// the same id, so a lock treats them as a single holder and lets them
    /// nest. Hand each of them a [`TaskId::fresh`] identity and use the
    /// lock's `*_as` methods when they must exclude each other.
    pub fn current() -> Self {
        match tokio::task::try_id() {
            Some(id) => Self(Repr::Task(id)),
            None => Self(Repr::Thread(std::thread::current().id())),
        }
    }

    /// Mint a new identity that is not tied to any tokio task or thread.
    pub fn fresh() -> Self {
        Self(Repr::Detached(NEXT_DETACHED.fetch_add(1, Ordering::Relaxed)))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Repr::Task(id) => write!(f, "task-{}", id),
            Repr::Thread(id) => write!(f, "thread-{:?}", id),
            Repr::Detached(n) => write!(f, "detached-{}", n),
        }
    }
}
