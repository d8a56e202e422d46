//! Per-attempt transaction context

use super::task::TaskId;

/// Signal that a transaction cannot proceed against the value it observed.
///
/// Returning it from a transaction aborts the attempt; the engine re-runs
/// the transaction once the cell has changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry;

/// Result of evaluating a transaction body
pub type StmResult<A> = std::result::Result<A, Retry>;

/// Abort the current attempt and block until the observed value changes.
pub fn retry<A>() -> StmResult<A> {
    Err(Retry)
}

/// The view a transaction body gets of the cell it runs against.
///
/// Reads see the snapshot taken when the attempt started, or the value most
/// recently written by this attempt. Writes stay local until the engine
/// commits them.
#[derive(Debug)]
pub struct Journal<'a, T> {
    task: TaskId,
    read: &'a T,
    write: Option<T>,
}

impl<'a, T> Journal<'a, T> {
    pub(crate) fn new(task: TaskId, read: &'a T) -> Self {
        Self {
            task,
            read,
            write: None,
        }
    }

    /// The task this transaction runs on behalf of
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// Current value as seen by this attempt
    pub fn get(&self) -> &T {
        self.write.as_ref().unwrap_or(self.read)
    }

    /// Replace the value; visible to later `get` calls in the same attempt
    pub fn set(&mut self, value: T) {
        self.write = Some(value);
    }

    pub(crate) fn into_write(self) -> Option<T> {
        self.write
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_see_own_writes() {
        let base = 1u32;
        let mut journal = Journal::new(TaskId::fresh(), &base);
        assert_eq!(*journal.get(), 1);

        journal.set(5);
        assert_eq!(*journal.get(), 5);
        assert_eq!(journal.into_write(), Some(5));
    }

    #[test]
    fn test_retry_is_err() {
        let result: StmResult<u8> = retry();
        assert_eq!(result, Err(Retry));
    }
}
