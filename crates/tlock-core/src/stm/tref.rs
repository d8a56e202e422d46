//! Transactional cell
//!
//! A `TRef` holds a versioned value behind a `tokio::sync::watch` channel.
//! Transactions read an immutable snapshot, compute a new value outside any
//! lock, and commit with a compare-and-swap on the version. A transaction
//! that returns [`Retry`](super::Retry) parks on the channel until the
//! version moves past the one it observed.

use super::journal::{Journal, Retry, StmResult};
use super::task::TaskId;
use crate::error::LockDefect;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{trace, warn};

/// Default number of consecutive retries after which a warning is logged
pub const DEFAULT_CONTENTION_WARN_THRESHOLD: u32 = 64;

/// A committed value together with the version that produced it
#[derive(Debug)]
pub struct Versioned<T> {
    /// Monotonic commit counter, starting at 0
    pub version: u64,
    /// The committed value
    pub value: T,
}

/// Outcome of a single attempt
enum Attempt<A> {
    Committed(A),
    Conflict,
    Blocked,
}

/// Transactional cell
#[derive(Debug)]
pub struct TRef<T> {
    cell: watch::Sender<Arc<Versioned<T>>>,
    contention_warn_threshold: u32,
}

impl<T> TRef<T> {
    /// Create a cell holding `value` at version 0
    pub fn new(value: T) -> Self {
        let (cell, _) = watch::channel(Arc::new(Versioned { version: 0, value }));
        Self {
            cell,
            contention_warn_threshold: DEFAULT_CONTENTION_WARN_THRESHOLD,
        }
    }

    /// Set how many consecutive retries one transaction may go through
    /// before a warning is logged
    pub fn with_contention_warn_threshold(mut self, threshold: u32) -> Self {
        self.contention_warn_threshold = threshold;
        self
    }

    /// Current committed snapshot
    pub fn read(&self) -> Arc<Versioned<T>> {
        Arc::clone(&self.cell.borrow())
    }

    /// Version of the current committed snapshot
    pub fn version(&self) -> u64 {
        self.cell.borrow().version
    }

    /// Run `body` atomically on behalf of `task`, blocking on retry.
    ///
    /// `body` may be evaluated several times and must be free of side
    /// effects. The future completes in the same poll that commits, so
    /// dropping it either leaves the cell untouched or observes the commit.
    pub async fn atomically<A, F>(&self, task: TaskId, mut body: F) -> A
    where
        F: FnMut(&mut Journal<'_, T>) -> StmResult<A>,
    {
        let mut attempts: u32 = 0;
        loop {
            let mut rx = self.cell.subscribe();
            let snapshot = self.read();

            match self.attempt(task, &snapshot, &mut body) {
                Attempt::Committed(value) => return value,
                Attempt::Conflict => {
                    trace!(task = %task, version = snapshot.version, "transaction conflicted, re-running");
                }
                Attempt::Blocked => {
                    attempts = attempts.saturating_add(1);
                    self.note_retry(task, snapshot.version, attempts);

                    let seen = snapshot.version;
                    drop(snapshot);
                    // The sender lives in `self`, so the channel cannot close here.
                    let _ = rx.wait_for(|current| current.version != seen).await;
                }
            }
        }
    }

    /// Run `body` atomically on behalf of `task` without ever suspending.
    ///
    /// For transactions that cannot block (lock releases). A retry requested
    /// by `body` is a defect.
    pub fn atomically_now<A, F>(&self, task: TaskId, mut body: F) -> A
    where
        F: FnMut(&mut Journal<'_, T>) -> StmResult<A>,
    {
        loop {
            let snapshot = self.read();
            match self.attempt(task, &snapshot, &mut body) {
                Attempt::Committed(value) => return value,
                Attempt::Conflict => continue,
                Attempt::Blocked => LockDefect::RetryInNonBlockingTransaction { task }.raise(),
            }
        }
    }

    fn attempt<A, F>(&self, task: TaskId, snapshot: &Arc<Versioned<T>>, body: &mut F) -> Attempt<A>
    where
        F: FnMut(&mut Journal<'_, T>) -> StmResult<A>,
    {
        let mut journal = Journal::new(task, &snapshot.value);
        let value = match body(&mut journal) {
            Ok(value) => value,
            Err(Retry) => return Attempt::Blocked,
        };

        let Some(next) = journal.into_write() else {
            // Read-only: the snapshot was consistent when taken.
            return Attempt::Committed(value);
        };

        let observed = snapshot.version;
        let committed = self.cell.send_if_modified(|current| {
            if current.version != observed {
                return false;
            }
            *current = Arc::new(Versioned {
                version: observed + 1,
                value: next,
            });
            true
        });

        if committed {
            Attempt::Committed(value)
        } else {
            Attempt::Conflict
        }
    }

    fn note_retry(&self, task: TaskId, version: u64, attempts: u32) {
        if attempts == self.contention_warn_threshold {
            warn!(
                task = %task,
                version,
                attempts,
                "transaction keeps retrying under contention"
            );
        } else {
            trace!(task = %task, version, attempts, "transaction blocked, waiting for change");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stm::retry;
    use std::time::Duration;

    #[tokio::test]
    async fn test_commit_bumps_version() {
        let cell = TRef::new(10u32);
        let task = TaskId::fresh();

        let seen = cell
            .atomically(task, |journal| {
                let next = *journal.get() + 1;
                journal.set(next);
                Ok(next)
            })
            .await;

        assert_eq!(seen, 11);
        assert_eq!(cell.read().value, 11);
        assert_eq!(cell.version(), 1);
    }

    #[tokio::test]
    async fn test_read_only_transaction_does_not_commit() {
        let cell = TRef::new(3u32);
        let value = cell.atomically(TaskId::fresh(), |journal| Ok(*journal.get())).await;

        assert_eq!(value, 3);
        assert_eq!(cell.version(), 0);
    }

    #[test]
    fn test_journal_reports_task() {
        let cell = TRef::new(());
        let task = TaskId::fresh();
        let seen = cell.atomically_now(task, |journal| Ok(journal.task()));
        assert_eq!(seen, task);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_blocks_until_value_changes() {
        let cell = Arc::new(TRef::new(0u32));

        let mut waiter = tokio::spawn({
            let cell = Arc::clone(&cell);
            async move {
                cell.atomically(TaskId::fresh(), |journal| {
                    if *journal.get() == 0 {
                        return retry();
                    }
                    Ok(*journal.get())
                })
                .await
            }
        });

        let blocked = tokio::time::timeout(Duration::from_millis(50), &mut waiter).await;
        assert!(blocked.is_err(), "transaction should still be waiting");

        cell.atomically_now(TaskId::fresh(), |journal| {
            journal.set(7);
            Ok(())
        });

        let value = waiter.await.expect("waiter should finish");
        assert_eq!(value, 7);
    }

    #[test]
    fn test_retry_in_non_blocking_transaction_is_defect() {
        let cell = TRef::new(0u32);
        let task = TaskId::fresh();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cell.atomically_now(task, |_| retry::<()>());
        }));

        let payload = result.expect_err("retry must be a defect here");
        assert_eq!(
            payload.downcast_ref::<LockDefect>(),
            Some(&LockDefect::RetryInNonBlockingTransaction { task })
        );
        assert_eq!(cell.version(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let cell = Arc::new(TRef::new(0u64));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let cell = Arc::clone(&cell);
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    cell.atomically(TaskId::current(), |journal| {
                        let next = *journal.get() + 1;
                        journal.set(next);
                        Ok(())
                    })
                    .await;
                    tokio::task::yield_now().await;
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cell.read().value, 800);
        assert_eq!(cell.version(), 800);
    }
}
