//! Transactional execution
//!
//! A small software-transactional-memory layer over single cells:
//!
//! - **`TRef`**: versioned cell, optimistic commit, blocking retry
//! - **`Journal`**: the context a transaction body runs in (snapshot read,
//!   buffered write, caller identity)
//! - **`TaskId`**: identity of the task a transaction runs for
//!
//! Transaction bodies are closures that may run more than once, so they must
//! not perform side effects. Logging happens after a commit, never inside a
//! body.

pub mod journal;
pub mod task;
pub mod tref;

pub use journal::{retry, Journal, Retry, StmResult};
pub use task::TaskId;
pub use tref::{TRef, Versioned, DEFAULT_CONTENTION_WARN_THRESHOLD};
