//! Lock state model
//!
//! The whole disposition of a lock is one [`LockState`] value. Everything in
//! this module is pure: functions build new states and never block.

use crate::error::LockDefect;
use crate::stm::TaskId;
use std::collections::HashMap;
use std::fmt;

/// Who holds what
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    /// Zero or more tasks hold read locks, nobody holds the write lock
    Shared(SharedState),
    /// One task holds the write lock, possibly with nested reads
    Exclusive(ExclusiveState),
}

/// Read holders and how many reads each has taken.
///
/// A task with no reads is absent from the map; a count of zero is never
/// stored. The empty map means the lock is free.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedState {
    readers: HashMap<TaskId, usize>,
}

/// The write holder with its nested write and read counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExclusiveState {
    pub(crate) read_count: usize,
    pub(crate) write_count: usize,
    pub(crate) owner: TaskId,
}

impl LockState {
    /// The unlocked state. An empty map does not allocate, so this is as
    /// cheap as sharing a single instance.
    pub fn empty_shared() -> Self {
        Self::Shared(SharedState::default())
    }

    /// Shared state where `task` holds `count` reads; unlocked if `count`
    /// is zero
    pub fn shared_for(task: TaskId, count: usize) -> Self {
        if count == 0 {
            return Self::empty_shared();
        }
        Self::Shared(SharedState {
            readers: HashMap::from([(task, count)]),
        })
    }

    /// Exclusive state owned by `owner`
    pub(crate) fn exclusive(read_count: usize, write_count: usize, owner: TaskId) -> Self {
        debug_assert!(write_count > 0, "exclusive state needs a write hold");
        Self::Exclusive(ExclusiveState {
            read_count,
            write_count,
            owner,
        })
    }

    /// Reads held by `task`
    pub fn reads_held_by(&self, task: TaskId) -> usize {
        match self {
            Self::Shared(shared) => shared.reads_held_by(task),
            Self::Exclusive(exclusive) if exclusive.owner == task => exclusive.read_count,
            Self::Exclusive(_) => 0,
        }
    }

    /// Writes held by `task`
    pub fn writes_held_by(&self, task: TaskId) -> usize {
        match self {
            Self::Exclusive(exclusive) if exclusive.owner == task => exclusive.write_count,
            _ => 0,
        }
    }

    /// Total read locks across all tasks
    pub fn read_locks(&self) -> usize {
        match self {
            Self::Shared(shared) => shared.total_reads(),
            Self::Exclusive(exclusive) => exclusive.read_count,
        }
    }

    /// Total write locks
    pub fn write_locks(&self) -> usize {
        match self {
            Self::Shared(_) => 0,
            Self::Exclusive(exclusive) => exclusive.write_count,
        }
    }

    /// Whether nobody holds anything
    pub fn is_unlocked(&self) -> bool {
        matches!(self, Self::Shared(shared) if shared.is_empty())
    }

    /// Whether a write lock is held
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Exclusive(_))
    }

    /// The write lock holder, if any
    pub fn owner(&self) -> Option<TaskId> {
        match self {
            Self::Shared(_) => None,
            Self::Exclusive(exclusive) => Some(exclusive.owner),
        }
    }
}

impl Default for LockState {
    fn default() -> Self {
        Self::empty_shared()
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared(shared) => write!(
                f,
                "shared(readers: {}, reads: {})",
                shared.readers.len(),
                shared.total_reads()
            ),
            Self::Exclusive(exclusive) => write!(
                f,
                "exclusive(owner: {}, writes: {}, reads: {})",
                exclusive.owner, exclusive.write_count, exclusive.read_count
            ),
        }
    }
}

impl SharedState {
    /// Reads held by `task`, zero if absent
    pub fn reads_held_by(&self, task: TaskId) -> usize {
        self.readers.get(&task).copied().unwrap_or(0)
    }

    /// Sum of all reader counts
    pub fn total_reads(&self) -> usize {
        self.readers.values().sum()
    }

    /// Whether no task holds a read
    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    /// Iterate over `(task, reads)` pairs
    pub fn readers(&self) -> impl Iterator<Item = (TaskId, usize)> + '_ {
        self.readers.iter().map(|(task, count)| (*task, *count))
    }

    /// Whether `task` could take the write lock from this state, i.e. it is
    /// the only reader or there are none.
    pub fn has_no_other_reader(&self, task: TaskId) -> bool {
        self.readers.is_empty() || (self.readers.len() == 1 && self.readers.contains_key(&task))
    }

    /// Shift the read count of `task` by `delta`.
    ///
    /// Raises [`LockDefect::ReleaseReadNotHeld`] if the count would go below
    /// zero.
    pub fn adjust_reader(&self, task: TaskId, delta: isize) -> SharedState {
        let held = self.reads_held_by(task);
        let Some(next) = held.checked_add_signed(delta) else {
            LockDefect::ReleaseReadNotHeld { task, held }.raise()
        };

        let mut readers = self.readers.clone();
        if next == 0 {
            readers.remove(&task);
        } else {
            readers.insert(task, next);
        }
        SharedState { readers }
    }
}

impl ExclusiveState {
    /// The write lock holder
    pub fn owner(&self) -> TaskId {
        self.owner
    }

    /// Nested writes held by the owner
    pub fn write_count(&self) -> usize {
        self.write_count
    }

    /// Reads the owner took while (or before) holding the write lock
    pub fn read_count(&self) -> usize {
        self.read_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared(entries: &[(TaskId, usize)]) -> SharedState {
        SharedState {
            readers: entries.iter().copied().collect(),
        }
    }

    #[test]
    fn test_shared_for_zero_is_unlocked() {
        let task = TaskId::fresh();
        assert_eq!(LockState::shared_for(task, 0), LockState::empty_shared());
        assert!(LockState::shared_for(task, 0).is_unlocked());

        let state = LockState::shared_for(task, 3);
        assert_eq!(state.reads_held_by(task), 3);
        assert_eq!(state.read_locks(), 3);
        assert!(!state.is_unlocked());
    }

    #[test]
    fn test_held_counts_in_shared_state() {
        let (a, b, c) = (TaskId::fresh(), TaskId::fresh(), TaskId::fresh());
        let state = LockState::Shared(shared(&[(a, 2), (b, 1)]));

        assert_eq!(state.reads_held_by(a), 2);
        assert_eq!(state.reads_held_by(b), 1);
        assert_eq!(state.reads_held_by(c), 0);
        assert_eq!(state.writes_held_by(a), 0);
        assert_eq!(state.read_locks(), 3);
        assert_eq!(state.write_locks(), 0);
        assert_eq!(state.owner(), None);
    }

    #[test]
    fn test_held_counts_in_exclusive_state() {
        let (owner, other) = (TaskId::fresh(), TaskId::fresh());
        let state = LockState::exclusive(4, 2, owner);

        assert_eq!(state.reads_held_by(owner), 4);
        assert_eq!(state.writes_held_by(owner), 2);
        assert_eq!(state.reads_held_by(other), 0);
        assert_eq!(state.writes_held_by(other), 0);
        assert_eq!(state.read_locks(), 4);
        assert_eq!(state.write_locks(), 2);
        assert_eq!(state.owner(), Some(owner));
        assert!(state.is_exclusive());
    }

    #[test]
    fn test_has_no_other_reader() {
        let (a, b) = (TaskId::fresh(), TaskId::fresh());

        assert!(shared(&[]).has_no_other_reader(a));
        assert!(shared(&[(a, 5)]).has_no_other_reader(a));
        assert!(!shared(&[(b, 1)]).has_no_other_reader(a));
        assert!(!shared(&[(a, 1), (b, 1)]).has_no_other_reader(a));
    }

    #[test]
    fn test_adjust_reader_never_stores_zero() {
        let (a, b) = (TaskId::fresh(), TaskId::fresh());
        let state = shared(&[(a, 1), (b, 2)]);

        let released = state.adjust_reader(a, -1);
        assert_eq!(released.reads_held_by(a), 0);
        assert_eq!(released.readers().count(), 1);
        assert!(released.readers().all(|(_, count)| count > 0));

        let added = released.adjust_reader(b, 1);
        assert_eq!(added.reads_held_by(b), 3);
        // the input state is untouched
        assert_eq!(state.reads_held_by(a), 1);
    }

    #[test]
    fn test_adjust_reader_below_zero_is_defect() {
        let task = TaskId::fresh();
        let state = shared(&[]);

        let result = std::panic::catch_unwind(|| state.adjust_reader(task, -1));
        let payload = result.expect_err("over-release must raise");
        assert_eq!(
            payload.downcast_ref::<LockDefect>(),
            Some(&LockDefect::ReleaseReadNotHeld { task, held: 0 })
        );
    }

    #[test]
    fn test_display() {
        let owner = TaskId::fresh();
        let state = LockState::exclusive(1, 2, owner);
        assert_eq!(
            state.to_string(),
            format!("exclusive(owner: {}, writes: 2, reads: 1)", owner)
        );
        assert_eq!(
            LockState::empty_shared().to_string(),
            "shared(readers: 0, reads: 0)"
        );
    }
}
