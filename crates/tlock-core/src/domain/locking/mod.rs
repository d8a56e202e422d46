//! Reentrant read/write locking
//!
//! This module provides a lock whose acquisitions and releases are atomic
//! transactions over a single state cell.
//!
//! # Architecture
//!
//! - **State Model**: `LockState` with its `Shared` and `Exclusive` cases
//! - **Lock**: `TReentrantLock`, the transactional acquire/release primitives
//!   and read-only introspection
//! - **Guards**: RAII guards and bracketed `with_*` forms for automatic release
//!
//! # Features
//!
//! - Many concurrent readers, one writer
//! - Reentrancy: a task may take the same lock any number of times
//! - Upgrade: the sole reader may take the write lock without letting go
//! - Writers may take nested reads and writes without blocking themselves
//! - Acquisitions and releases compose into one transaction through
//!   `TReentrantLock::atomically`
//!
//! # Holder identity
//!
//! Holders are tasks, identified by `TaskId::current()` unless an `*_as`
//! method is given an explicit `TaskId`. Futures polled concurrently within
//! one tokio task (`join!`, `select!`) share that identity: they nest like
//! reentrant calls and do not exclude each other. Give each one a
//! `TaskId::fresh()` identity when they need mutual exclusion.
//!
//! # Example
//!
//! ```ignore
//! use tlock_core::domain::locking::TReentrantLock;
//!
//! let lock = TReentrantLock::new();
//!
//! let total = lock.with_read_lock(async { catalog.total() }).await;
//!
//! // Lock is released when the guard is dropped
//! let _guard = lock.write_lock().await;
//! catalog.insert(item);
//! ```

pub mod event;
pub mod guard;
pub mod lock;
pub mod types;

// Re-export main types
pub use event::LockEventType;
pub use guard::{ReadLockGuard, WriteLockGuard};
pub use lock::TReentrantLock;
pub use types::{ExclusiveState, LockState, SharedState};
