//! Lock configuration

use crate::error::{Error, Result};
use crate::stm::DEFAULT_CONTENTION_WARN_THRESHOLD;
use serde::{Deserialize, Serialize};

/// Label used in trace events when none is configured
pub const DEFAULT_LOCK_LABEL: &str = "treentrant";

/// Configuration for a [`TReentrantLock`](crate::TReentrantLock)
///
/// Only diagnostics are configurable. Scheduling behaviour (ordering among
/// blocked tasks, timeouts) is deliberately absent from the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Name attached to every trace event emitted for this lock
    pub label: Option<String>,

    /// Consecutive retries of one acquisition before a contention warning
    pub contention_warn_threshold: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            label: None,
            contention_warn_threshold: DEFAULT_CONTENTION_WARN_THRESHOLD,
        }
    }
}

impl LockConfig {
    /// Set the label used in trace events
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the contention warning threshold
    pub fn with_contention_warn_threshold(mut self, threshold: u32) -> Self {
        self.contention_warn_threshold = threshold;
        self
    }

    /// The label, or the default one
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(DEFAULT_LOCK_LABEL)
    }

    /// Parse a configuration from JSON, filling unspecified fields with
    /// defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values that make no sense
    pub fn validate(&self) -> Result<()> {
        if self.contention_warn_threshold == 0 {
            return Err(Error::Config(
                "contention_warn_threshold must be at least 1".to_string(),
            ));
        }
        if matches!(self.label.as_deref(), Some(label) if label.trim().is_empty()) {
            return Err(Error::Config("label must not be blank".to_string()));
        }
        Ok(())
    }
}
