//! Transactional reentrant read/write lock
//!
//! Every acquire and release is one transaction over the lock's state cell.
//! A transaction either commits immediately or asks the engine to retry,
//! which parks the caller until the state changes. Releases never retry.
//!
//! Blocked tasks are not queued: when the state changes they all re-run and
//! whichever commits first wins. Starvation under sustained contention is
//! possible.
//!
//! The transaction bodies [`adjust_read`], [`acquire_write`] and
//! [`release_write`] are public so several of them can run as one
//! transaction through [`TReentrantLock::atomically`]. Composition is limited
//! to a single lock: each lock owns its own cell, and a transaction cannot
//! span two cells.
//!
//! Holders are keyed by [`TaskId`]. The plain methods use
//! [`TaskId::current`], which is shared by every future polled inside the
//! same tokio task; use the `*_as` forms with [`TaskId::fresh`] to make such
//! futures exclude each other.

use super::event::LockEventType;
use super::types::LockState;
use crate::config::LockConfig;
use crate::error::LockDefect;
use crate::stm::{retry, Journal, StmResult, TRef, TaskId};
use std::sync::Arc;
use tracing::debug;

/// Reentrant read/write lock supporting read-to-write upgrade.
///
/// Handles are cheap to clone; every clone refers to the same lock.
#[derive(Debug, Clone)]
pub struct TReentrantLock {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: TRef<LockState>,
    config: LockConfig,
}

impl Default for TReentrantLock {
    fn default() -> Self {
        Self::new()
    }
}

impl TReentrantLock {
    /// Create an unlocked lock
    pub fn new() -> Self {
        Self::with_config(LockConfig::default())
    }

    /// Create an unlocked lock with the given configuration
    pub fn with_config(config: LockConfig) -> Self {
        let state = TRef::new(LockState::empty_shared())
            .with_contention_warn_threshold(config.contention_warn_threshold);
        Self {
            inner: Arc::new(Inner { state, config }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &LockConfig {
        &self.inner.config
    }

    /// Whether two handles refer to the same lock
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ========== Raw Primitives ==========

    /// Take a read lock for the current task.
    ///
    /// Blocks while another task holds the write lock. Returns the number of
    /// reads the task now holds.
    pub async fn acquire_read(&self) -> usize {
        self.acquire_read_as(TaskId::current()).await
    }

    /// Take a read lock on behalf of `task`
    pub async fn acquire_read_as(&self, task: TaskId) -> usize {
        let held = self
            .inner
            .state
            .atomically(task, |journal| adjust_read(journal, 1))
            .await;
        self.record(task, LockEventType::ReadAcquired, held);
        held
    }

    /// Give back one read lock held by the current task.
    ///
    /// Returns the number of reads the task still holds. Releasing a read
    /// the task does not hold is a defect.
    pub async fn release_read(&self) -> usize {
        self.release_read_as(TaskId::current()).await
    }

    /// Give back one read lock held by `task`
    pub async fn release_read_as(&self, task: TaskId) -> usize {
        let held = self
            .inner
            .state
            .atomically(task, |journal| adjust_read(journal, -1))
            .await;
        self.record(task, LockEventType::ReadReleased, held);
        held
    }

    /// Release path for guards; a task that holds a read can never be
    /// made to wait by its own release.
    pub(crate) fn release_read_now(&self, task: TaskId) -> usize {
        let held = self
            .inner
            .state
            .atomically_now(task, |journal| adjust_read(journal, -1));
        self.record(task, LockEventType::ReadReleased, held);
        held
    }

    /// Take the write lock for the current task.
    ///
    /// Succeeds at once if nobody else holds a lock, if the task is the only
    /// reader (upgrade), or if the task already holds the write lock
    /// (nesting). Blocks otherwise. Returns the number of writes the task
    /// now holds.
    pub async fn acquire_write(&self) -> usize {
        self.acquire_write_as(TaskId::current()).await
    }

    /// Take the write lock on behalf of `task`
    pub async fn acquire_write_as(&self, task: TaskId) -> usize {
        let (held, event) = self
            .inner
            .state
            .atomically(task, acquire_write)
            .await;
        self.record(task, event, held);
        held
    }

    /// Give back one write lock held by the current task.
    ///
    /// Returns the number of writes the task still holds. When the last one
    /// goes, reads the task took meanwhile stay held as shared reads.
    /// Releasing a write lock the task does not own is a defect.
    pub async fn release_write(&self) -> usize {
        self.release_write_as(TaskId::current()).await
    }

    /// Give back one write lock held by `task`
    pub async fn release_write_as(&self, task: TaskId) -> usize {
        self.release_write_now(task)
    }

    pub(crate) fn release_write_now(&self, task: TaskId) -> usize {
        let (held, event) = self.inner.state.atomically_now(task, release_write);
        self.record(task, event, held);
        held
    }

    /// Release path for read guards dropped while the thread is panicking.
    /// A second panic there aborts the process, so a release of reads the
    /// task no longer holds is reported and skipped.
    pub(crate) fn release_read_unwinding(&self, task: TaskId) {
        let held = self.inner.state.atomically_now(task, |journal| {
            if journal.get().reads_held_by(journal.task()) == 0 {
                return Ok(None);
            }
            adjust_read(journal, -1).map(Some)
        });

        match held {
            Some(held) => self.record(task, LockEventType::ReadReleased, held),
            None => LockDefect::ReleaseReadNotHeld { task, held: 0 }.report(),
        }
    }

    /// Release path for write guards dropped while the thread is panicking
    pub(crate) fn release_write_unwinding(&self, task: TaskId) {
        let released = self.inner.state.atomically_now(task, |journal| {
            if journal.get().writes_held_by(journal.task()) == 0 {
                return Ok(None);
            }
            release_write(journal).map(Some)
        });

        match released {
            Some((held, event)) => self.record(task, event, held),
            None => LockDefect::ReleaseWriteNotHeld { task }.report(),
        }
    }

    // ========== Composite Transactions ==========

    /// Run `body` as one transaction against this lock on behalf of `task`.
    ///
    /// `body` may combine the transaction bodies of this module with reads of
    /// the state. Everything it does commits together, or not at all when it
    /// asks to retry, in which case the caller blocks until the state
    /// changes and `body` runs again. It may run several times, so it must
    /// be free of side effects.
    pub async fn atomically<A, F>(&self, task: TaskId, body: F) -> A
    where
        F: FnMut(&mut Journal<'_, LockState>) -> StmResult<A>,
    {
        let value = self.inner.state.atomically(task, body).await;
        debug!(
            lock = %self.inner.config.label(),
            task = %task,
            "Lock transaction committed"
        );
        value
    }

    // ========== Introspection ==========

    /// Copy of the current state
    pub fn snapshot(&self) -> LockState {
        self.inner.state.read().value.clone()
    }

    /// Total read locks held across all tasks
    pub fn read_locks(&self) -> usize {
        self.inner.state.read().value.read_locks()
    }

    /// Total write locks held
    pub fn write_locks(&self) -> usize {
        self.inner.state.read().value.write_locks()
    }

    /// Read locks held by `task`
    pub fn task_read_locks(&self, task: TaskId) -> usize {
        self.inner.state.read().value.reads_held_by(task)
    }

    /// Write locks held by `task`
    pub fn task_write_locks(&self, task: TaskId) -> usize {
        self.inner.state.read().value.writes_held_by(task)
    }

    /// Whether any read lock is held
    pub fn read_locked(&self) -> bool {
        self.read_locks() > 0
    }

    /// Whether the write lock is held
    pub fn write_locked(&self) -> bool {
        self.write_locks() > 0
    }

    /// Whether any lock is held
    pub fn locked(&self) -> bool {
        let snapshot = self.inner.state.read();
        snapshot.value.read_locks() > 0 || snapshot.value.write_locks() > 0
    }

    fn record(&self, task: TaskId, event: LockEventType, held: usize) {
        let lock = self.inner.config.label();
        if event.is_acquisition() {
            debug!(lock = %lock, task = %task, event = %event, held, "Lock acquired");
        } else {
            debug!(lock = %lock, task = %task, event = %event, held, "Lock released");
        }
    }
}

// ========== Transaction Bodies ==========

/// Shift the caller's read count by `delta` and return the reads it now
/// holds.
///
/// Retries while another task holds the write lock. Going below zero is a
/// [`LockDefect::ReleaseReadNotHeld`].
pub fn adjust_read(journal: &mut Journal<'_, LockState>, delta: isize) -> StmResult<usize> {
    let task = journal.task();
    let next = match journal.get() {
        LockState::Shared(shared) => LockState::Shared(shared.adjust_reader(task, delta)),
        LockState::Exclusive(exclusive) if exclusive.owner == task => {
            let Some(read_count) = exclusive.read_count.checked_add_signed(delta) else {
                LockDefect::ReleaseReadNotHeld {
                    task,
                    held: exclusive.read_count,
                }
                .raise()
            };
            LockState::exclusive(read_count, exclusive.write_count, task)
        }
        LockState::Exclusive(_) => return retry(),
    };

    let held = next.reads_held_by(task);
    journal.set(next);
    Ok(held)
}

/// Take a write lock (fresh, upgrade, or nested) and return the writes the
/// caller now holds with the kind of transition.
///
/// Retries while any other task holds a lock.
pub fn acquire_write(journal: &mut Journal<'_, LockState>) -> StmResult<(usize, LockEventType)> {
    let task = journal.task();
    let (next, event) = match journal.get() {
        LockState::Shared(shared) if shared.has_no_other_reader(task) => {
            let reads = shared.reads_held_by(task);
            let event = if reads > 0 {
                LockEventType::Upgraded
            } else {
                LockEventType::WriteAcquired
            };
            (LockState::exclusive(reads, 1, task), event)
        }
        LockState::Exclusive(exclusive) if exclusive.owner == task => (
            LockState::exclusive(exclusive.read_count, exclusive.write_count + 1, task),
            LockEventType::WriteAcquired,
        ),
        _ => return retry(),
    };

    let held = next.writes_held_by(task);
    journal.set(next);
    Ok((held, event))
}

/// Give back one write lock, downgrading to shared on the last one.
///
/// Never retries; a caller that does not own the write lock is a
/// [`LockDefect::ReleaseWriteNotHeld`].
pub fn release_write(journal: &mut Journal<'_, LockState>) -> StmResult<(usize, LockEventType)> {
    let task = journal.task();
    let (next, event) = match journal.get() {
        LockState::Exclusive(exclusive) if exclusive.owner == task && exclusive.write_count == 1 => (
            LockState::shared_for(task, exclusive.read_count),
            LockEventType::Downgraded,
        ),
        LockState::Exclusive(exclusive) if exclusive.owner == task => (
            LockState::exclusive(exclusive.read_count, exclusive.write_count - 1, task),
            LockEventType::WriteReleased,
        ),
        _ => LockDefect::ReleaseWriteNotHeld { task }.raise(),
    };

    let held = next.writes_held_by(task);
    journal.set(next);
    Ok((held, event))
}
