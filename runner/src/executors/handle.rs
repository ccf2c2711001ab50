use super::{Failure, RunOutcome};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Write-once storage shared between a handle and the worker producing its outcome
#[derive(Debug, Default)]
struct Slot {
    outcome: Mutex<Option<RunOutcome>>,
    ready: Condvar,
}

impl Slot {
    /// first write wins, later writes are ignored
    fn set(&self, outcome: RunOutcome) {
        let mut slot = self.outcome.lock();

        if slot.is_none() {
            *slot = Some(outcome);
            self.ready.notify_all();
        }
    }
}

/// Reference to the eventual outcome of one submitted calculation
///
/// `index` is the position of the calculation in the batch it was submitted with. Clones share
/// the same outcome, so any number of readers can wait on it.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    index: usize,
    slot: Arc<Slot>,
}

impl TaskHandle {
    /// create an unresolved handle and the completer the worker resolves it with
    pub(crate) fn pair(index: usize) -> (Self, Completer) {
        let slot = Arc::new(Slot::default());

        (
            Self {
                index,
                slot: slot.clone(),
            },
            Completer { slot: Some(slot) },
        )
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_finished(&self) -> bool {
        self.slot.outcome.lock().is_some()
    }

    /// outcome if already available, never blocks
    pub fn try_outcome(&self) -> Option<RunOutcome> {
        self.slot.outcome.lock().clone()
    }

    /// block the calling thread until the outcome is available
    pub fn wait(&self) -> RunOutcome {
        let mut outcome = self.slot.outcome.lock();

        loop {
            if let Some(outcome) = outcome.as_ref() {
                return outcome.clone();
            }

            self.slot.ready.wait(&mut outcome);
        }
    }
}

/// Producer side of a `TaskHandle`
///
/// Dropping a completer without calling `complete` resolves the handle with an
/// `InternalError`, so a task lost by the pool can never leave a waiter hanging.
#[derive(Debug)]
pub(crate) struct Completer {
    slot: Option<Arc<Slot>>,
}

impl Completer {
    pub(crate) fn complete(mut self, outcome: RunOutcome) {
        if let Some(slot) = self.slot.take() {
            slot.set(outcome);
        }
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.set(Failure::internal("task was dropped before producing an outcome").into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::FailureKind;
    use std::{thread, time::Duration};

    #[test]
    fn wait_blocks_until_completed() {
        let (handle, completer) = TaskHandle::pair(3);
        assert!(!handle.is_finished());
        assert_eq!(handle.try_outcome(), None);

        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            completer.complete(RunOutcome::Success);
        });

        assert_eq!(handle.wait(), RunOutcome::Success);
        assert_eq!(handle.index(), 3);
        worker.join().unwrap();
    }

    #[test]
    fn outcome_is_write_once_and_read_many() {
        let (handle, completer) = TaskHandle::pair(0);
        let reader = handle.clone();

        completer.complete(Failure::execution("exit 1", Some(1)).into());

        // a second producer for the same slot cannot overwrite the stored outcome
        handle.slot.set(RunOutcome::Success);

        assert_eq!(handle.wait().exit_code(), Some(1));
        assert_eq!(reader.wait().exit_code(), Some(1));
        assert!(reader.is_finished());
    }

    #[test]
    fn dropped_completer_resolves_as_internal_error() {
        let (handle, completer) = TaskHandle::pair(1);
        drop(completer);

        assert_eq!(handle.wait().kind(), Some(FailureKind::InternalError));
    }
}
