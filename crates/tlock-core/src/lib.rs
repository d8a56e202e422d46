//! tlock Core Library
//!
//! This crate provides a reentrant, upgradeable read/write lock built on
//! transactions:
//! - Transactional cells with blocking retry (`stm`)
//! - The lock state model, algorithm, guards and introspection
//!   (`domain::locking`)
//! - Lock configuration
//! - Defects raised for unbalanced or misattributed releases

pub mod config;
pub mod domain;
pub mod error;
pub mod stm;

pub use domain::locking::{LockState, ReadLockGuard, TReentrantLock, WriteLockGuard};
pub use error::{Error, LockDefect, Result};
pub use stm::TaskId;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::LockConfig;
    pub use crate::domain::locking::{LockState, ReadLockGuard, TReentrantLock, WriteLockGuard};
    pub use crate::error::{Error, LockDefect, Result};
    pub use crate::stm::TaskId;
}
