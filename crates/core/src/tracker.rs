use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Synchronized accessor handed to every component handler.
///
/// Pairs the read-only workflow config with the shared result store. The
/// result is only reachable through [`get_data`](Self::get_data),
/// [`read`](Self::read), [`update`](Self::update) and
/// [`try_update`](Self::try_update); each holds the lock for exactly the
/// duration of the call.
pub struct DataTracker<C, D> {
    config: Arc<C>,
    data: Arc<Mutex<D>>,
}

impl<C, D> Clone for DataTracker<C, D> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            data: self.data.clone(),
        }
    }
}

impl<C, D> DataTracker<C, D> {
    pub fn new(config: C, data: D) -> Self {
        Self {
            config: Arc::new(config),
            data: Arc::new(Mutex::new(data)),
        }
    }

    /// The immutable workflow config.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Run `f` against the current result without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&D) -> R) -> R {
        let guard = self.lock();
        f(&guard)
    }

    /// Apply `mutator` with exclusive access to the result.
    ///
    /// Concurrent updates serialize. The lock is released on return and
    /// while unwinding if `mutator` panics.
    pub fn update<R>(&self, mutator: impl FnOnce(&mut D) -> R) -> R {
        let mut guard = self.lock();
        mutator(&mut guard)
    }

    /// Fallible variant of [`update`](Self::update).
    ///
    /// Any changes `mutator` made before returning `Err` are kept.
    pub fn try_update<T, E>(&self, mutator: impl FnOnce(&mut D) -> Result<T, E>) -> Result<T, E> {
        let mut guard = self.lock();
        mutator(&mut guard)
    }

    // A mutator that panicked must not wedge every later caller.
    fn lock(&self) -> MutexGuard<'_, D> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C, D: Clone> DataTracker<C, D> {
    /// Snapshot of the current result.
    pub fn get_data(&self) -> D {
        self.lock().clone()
    }

    /// Take the result out of the tracker.
    ///
    /// Moves the value when this is the last handle; handlers that kept a
    /// clone alive (for example in a detached task) force a snapshot instead.
    pub fn into_data(self) -> D {
        match Arc::try_unwrap(self.data) {
            Ok(mutex) => mutex.into_inner().unwrap_or_else(PoisonError::into_inner),
            Err(shared) => shared.lock().unwrap_or_else(PoisonError::into_inner).clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Store {
        total: u64,
        entries: Vec<String>,
    }

    #[test]
    fn test_update_and_snapshot() {
        let tracker = DataTracker::new("cfg".to_string(), Store::default());

        tracker.update(|d| d.entries.push("a".to_string()));
        let len = tracker.update(|d| {
            d.entries.push("b".to_string());
            d.entries.len()
        });

        assert_eq!(len, 2);
        assert_eq!(tracker.config(), "cfg");
        assert_eq!(tracker.get_data().entries, vec!["a", "b"]);
        assert_eq!(tracker.read(|d| d.entries.len()), 2);
    }

    #[test]
    fn test_try_update_releases_lock_on_error() {
        let tracker = DataTracker::new((), Store::default());

        let result: Result<(), &str> = tracker.try_update(|d| {
            d.total = 7;
            Err("rejected")
        });
        assert_eq!(result, Err("rejected"));

        tracker.update(|d| d.total += 1);
        assert_eq!(tracker.get_data().total, 8);
    }

    #[test]
    fn test_panicking_mutator_does_not_leak_lock() {
        let tracker = DataTracker::new((), Store::default());

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            tracker.update(|_| panic!("mutator blew up"));
        }));
        assert!(outcome.is_err());

        tracker.update(|d| d.total = 3);
        assert_eq!(tracker.get_data().total, 3);
    }

    #[test]
    fn test_concurrent_updates_compose() {
        let tracker = DataTracker::new((), Store::default());

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let tracker = tracker.clone();
                scope.spawn(move || {
                    for _ in 0..1000 {
                        tracker.update(|d| d.total += 1);
                    }
                });
            }
        });

        assert_eq!(tracker.get_data().total, 8000);
    }

    #[test]
    fn test_into_data_moves_or_snapshots() {
        let tracker = DataTracker::new((), Store::default());
        tracker.update(|d| d.total = 5);
        assert_eq!(tracker.into_data().total, 5);

        let tracker = DataTracker::new((), Store::default());
        let lingering = tracker.clone();
        tracker.update(|d| d.total = 9);
        assert_eq!(tracker.into_data().total, 9);
        assert_eq!(lingering.get_data().total, 9);
    }
}
