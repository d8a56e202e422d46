//! Lock guards for RAII-style lock management
//!
//! Guards release their lock when dropped, so the release runs on every exit
//! path: normal return, `?`, panic unwinding, or the enclosing future being
//! dropped because its task was cancelled.
//!
//! Acquisition cannot be torn by cancellation. The acquiring transaction
//! commits in the same poll that builds the guard, so a dropped acquisition
//! future has either changed nothing or already handed its hold to a guard.
//!
//! A guard normally raises a defect if its release is unbalanced. When it is
//! dropped during a panic the defect is only logged, because a second panic
//! while unwinding aborts the process.

use super::lock::TReentrantLock;
use crate::stm::TaskId;
use std::fmt;
use std::future::Future;

/// A read lock held by one task.
///
/// The lock is released when the guard is dropped.
#[derive(Debug)]
#[must_use = "the read lock is released as soon as the guard is dropped"]
pub struct ReadLockGuard {
    lock: TReentrantLock,
    task: TaskId,
    count: usize,
    released: bool,
}

impl ReadLockGuard {
    fn new(lock: TReentrantLock, task: TaskId, count: usize) -> Self {
        Self {
            lock,
            task,
            count,
            released: false,
        }
    }

    /// Reads the task held right after this one was taken
    pub fn count(&self) -> usize {
        self.count
    }

    /// The task holding the lock
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// The lock this guard belongs to
    pub fn lock(&self) -> &TReentrantLock {
        &self.lock
    }

    /// Explicitly release the lock (normally done automatically on drop)
    pub fn release(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        if !self.released {
            self.released = true;
            if std::thread::panicking() {
                self.lock.release_read_unwinding(self.task);
            } else {
                self.lock.release_read_now(self.task);
            }
        }
    }
}

impl Drop for ReadLockGuard {
    fn drop(&mut self) {
        self.do_release();
    }
}

impl fmt::Display for ReadLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReadLock[{} x{}]", self.task, self.count)
    }
}

/// The write lock held by one task.
///
/// The lock is released when the guard is dropped.
#[derive(Debug)]
#[must_use = "the write lock is released as soon as the guard is dropped"]
pub struct WriteLockGuard {
    lock: TReentrantLock,
    task: TaskId,
    count: usize,
    released: bool,
}

impl WriteLockGuard {
    fn new(lock: TReentrantLock, task: TaskId, count: usize) -> Self {
        Self {
            lock,
            task,
            count,
            released: false,
        }
    }

    /// Writes the task held right after this one was taken
    pub fn count(&self) -> usize {
        self.count
    }

    /// The task holding the lock
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// The lock this guard belongs to
    pub fn lock(&self) -> &TReentrantLock {
        &self.lock
    }

    /// Explicitly release the lock (normally done automatically on drop)
    pub fn release(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        if !self.released {
            self.released = true;
            if std::thread::panicking() {
                self.lock.release_write_unwinding(self.task);
            } else {
                self.lock.release_write_now(self.task);
            }
        }
    }
}

impl Drop for WriteLockGuard {
    fn drop(&mut self) {
        self.do_release();
    }
}

impl fmt::Display for WriteLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WriteLock[{} x{}]", self.task, self.count)
    }
}

impl TReentrantLock {
    // ========== Scoped Acquisition ==========

    /// Take a read lock for the current task, released when the guard drops
    pub async fn read_lock(&self) -> ReadLockGuard {
        self.read_lock_as(TaskId::current()).await
    }

    /// Take a read lock on behalf of `task`
    pub async fn read_lock_as(&self, task: TaskId) -> ReadLockGuard {
        let count = self.acquire_read_as(task).await;
        ReadLockGuard::new(self.clone(), task, count)
    }

    /// Take the write lock for the current task, released when the guard
    /// drops.
    ///
    /// The holder is [`TaskId::current`], so futures running concurrently in
    /// one tokio task (`join!`, `select!`) count as the same holder and nest
    /// rather than exclude each other. Give each of them its own identity
    /// with [`write_lock_as`](Self::write_lock_as) and [`TaskId::fresh`].
    pub async fn write_lock(&self) -> WriteLockGuard {
        self.write_lock_as(TaskId::current()).await
    }

    /// Take the write lock on behalf of `task`
    pub async fn write_lock_as(&self, task: TaskId) -> WriteLockGuard {
        let count = self.acquire_write_as(task).await;
        WriteLockGuard::new(self.clone(), task, count)
    }

    /// Exclusive acquisition; same as [`write_lock`](Self::write_lock)
    pub async fn lock(&self) -> WriteLockGuard {
        self.write_lock().await
    }

    // ========== Bracketed Acquisition ==========

    /// Run `body` while holding a read lock.
    ///
    /// The lock is released however `body` ends, including when the returned
    /// future is dropped midway.
    pub async fn with_read_lock<F>(&self, body: F) -> F::Output
    where
        F: Future,
    {
        self.with_read_lock_as(TaskId::current(), body).await
    }

    /// Run `body` while `task` holds a read lock
    pub async fn with_read_lock_as<F>(&self, task: TaskId, body: F) -> F::Output
    where
        F: Future,
    {
        let guard = self.read_lock_as(task).await;
        let output = body.await;
        guard.release();
        output
    }

    /// Run `body` while holding the write lock.
    ///
    /// The lock is released however `body` ends, including when the returned
    /// future is dropped midway.
    ///
    /// Two `with_write_lock` calls joined inside one tokio task share the
    /// task's identity and run their bodies at the same time. Use
    /// [`with_write_lock_as`](Self::with_write_lock_as) with distinct
    /// [`TaskId::fresh`] identities when they must be serialized.
    pub async fn with_write_lock<F>(&self, body: F) -> F::Output
    where
        F: Future,
    {
        self.with_write_lock_as(TaskId::current(), body).await
    }

    /// Run `body` while `task` holds the write lock
    pub async fn with_write_lock_as<F>(&self, task: TaskId, body: F) -> F::Output
    where
        F: Future,
    {
        let guard = self.write_lock_as(task).await;
        let output = body.await;
        guard.release();
        output
    }

    /// Same as [`with_write_lock`](Self::with_write_lock)
    pub async fn with_lock<F>(&self, body: F) -> F::Output
    where
        F: Future,
    {
        self.with_write_lock(body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::locking::LockState;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[tokio::test]
    async fn test_read_guard_releases_on_drop() {
        let lock = TReentrantLock::new();
        let task = TaskId::fresh();

        {
            let guard = lock.read_lock_as(task).await;
            assert_eq!(guard.count(), 1);
            assert_eq!(guard.task(), task);
            assert_eq!(lock.task_read_locks(task), 1);
        }

        assert!(!lock.locked());
    }

    #[tokio::test]
    async fn test_explicit_release_happens_once() {
        let lock = TReentrantLock::new();
        let task = TaskId::fresh();

        let outer = lock.write_lock_as(task).await;
        let inner = lock.write_lock_as(task).await;
        assert_eq!(inner.count(), 2);

        inner.release();
        assert_eq!(lock.task_write_locks(task), 1);

        outer.release();
        assert_eq!(lock.snapshot(), LockState::empty_shared());
    }

    #[tokio::test]
    async fn test_guards_nest_across_modes() {
        let lock = TReentrantLock::new();
        let task = TaskId::fresh();

        let read = lock.read_lock_as(task).await;
        let write = lock.write_lock_as(task).await;
        assert_eq!(lock.snapshot().owner(), Some(task));
        assert_eq!(lock.task_read_locks(task), 1);

        drop(read);
        assert_eq!(lock.task_read_locks(task), 0);
        assert!(lock.write_locked());

        drop(write);
        assert!(!lock.locked());
    }

    #[tokio::test]
    async fn test_lock_is_write_lock() {
        let lock = TReentrantLock::new();
        let guard = lock.lock().await;

        assert!(lock.write_locked());
        assert_eq!(lock.task_write_locks(TaskId::current()), 1);
        assert_eq!(guard.task(), TaskId::current());
        assert!(guard.lock().ptr_eq(&lock));
    }

    #[tokio::test]
    async fn test_with_read_lock_returns_body_output() {
        let lock = TReentrantLock::new();

        let seen = lock
            .with_read_lock(async { lock.task_read_locks(TaskId::current()) })
            .await;

        assert_eq!(seen, 1);
        assert!(!lock.locked());
    }

    #[tokio::test]
    async fn test_with_write_lock_releases_on_error() {
        let lock = TReentrantLock::new();

        let result: Result<(), String> = lock
            .with_write_lock(async {
                assert!(lock.write_locked());
                Err("body failed".to_string())
            })
            .await;

        assert!(result.is_err());
        assert!(!lock.locked());
    }

    #[tokio::test]
    async fn test_with_lock_nests_reads_inside_write() {
        let lock = TReentrantLock::new();

        let (reads, writes) = lock
            .with_lock(async {
                lock.with_read_lock(async {
                    let me = TaskId::current();
                    (lock.task_read_locks(me), lock.task_write_locks(me))
                })
                .await
            })
            .await;

        assert_eq!((reads, writes), (1, 1));
        assert!(!lock.locked());
    }

    #[tokio::test]
    async fn test_write_guard_dropped_while_unwinding_does_not_abort() {
        let lock = TReentrantLock::new();
        let task = TaskId::fresh();
        let guard = lock.write_lock_as(task).await;
        // unbalanced: the hold is given back behind the guard's back
        lock.release_write_as(task).await;

        let fail = true;
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _guard = guard;
            if fail {
                panic!("body failed");
            }
        }));

        let payload = result.expect_err("body panicked");
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"body failed"));
        assert_eq!(lock.snapshot(), LockState::empty_shared());
    }

    #[tokio::test]
    async fn test_read_guards_dropped_while_unwinding() {
        let lock = TReentrantLock::new();
        let task = TaskId::fresh();
        let first = lock.read_lock_as(task).await;
        let stale = lock.read_lock_as(task).await;
        lock.release_read_as(task).await;
        lock.release_read_as(task).await;
        let other = lock.read_lock_as(TaskId::fresh()).await;

        let fail = true;
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _guards = (first, stale, other);
            if fail {
                panic!("body failed");
            }
        }));

        assert!(result.is_err());
        // only `other` was still balanced, and it released its read
        assert!(!lock.locked());
    }

    #[tokio::test]
    async fn test_with_write_lock_as_uses_given_task() {
        let lock = TReentrantLock::new();
        let task = TaskId::fresh();

        let writes = lock
            .with_write_lock_as(task, async { lock.task_write_locks(task) })
            .await;

        assert_eq!(writes, 1);
        assert_eq!(lock.task_write_locks(TaskId::current()), 0);
        assert!(!lock.locked());
    }

    #[tokio::test]
    async fn test_guard_display() {
        let lock = TReentrantLock::new();
        let task = TaskId::fresh();
        let guard = lock.read_lock_as(task).await;

        assert_eq!(guard.to_string(), format!("ReadLock[{} x1]", task));
    }
}
