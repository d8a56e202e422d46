//! Domain layer
//!
//! Contains the lock and its state model.

pub mod locking;
