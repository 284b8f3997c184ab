//! In-memory, mutex-guarded view of state shared across workers.
//!
//! Workers mutate only their own `(Kind, Name)` slot, but all mutations go
//! through the one mutex. A dirty flag tracks whether anything changed since
//! the last flush; `flush()` persists through the store only when dirty, and
//! the engine calls it at every layer boundary so a crash loses at most one
//! layer of progress.

use super::{State, StateEntry, StateStore};
use crate::core::TomeiError;
use crate::resource::ResourceId;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct StateCache {
    inner: Arc<Mutex<Inner>>,
    store: Arc<StateStore>,
}

struct Inner {
    state: State,
    dirty: bool,
}

impl StateCache {
    pub fn new(state: State, store: Arc<StateStore>) -> Self {
        Self { inner: Arc::new(Mutex::new(Inner { state, dirty: false })), store }
    }

    /// Runs a closure against a read snapshot of the state.
    pub fn read<T>(&self, f: impl FnOnce(&State) -> T) -> T {
        let inner = self.inner.lock().expect("state cache poisoned");
        f(&inner.state)
    }

    /// Runs a mutating closure and marks the cache dirty.
    pub fn mutate<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut inner = self.inner.lock().expect("state cache poisoned");
        inner.dirty = true;
        f(&mut inner.state)
    }

    pub fn insert(&self, entry: StateEntry) {
        self.mutate(|state| state.insert(entry));
    }

    pub fn remove(&self, id: &ResourceId) {
        self.mutate(|state| {
            state.remove(id);
        });
    }

    /// A point-in-time clone of the whole document.
    pub fn snapshot(&self) -> State {
        self.read(State::clone)
    }

    /// Persists if anything changed since the last flush.
    pub fn flush(&self) -> Result<(), TomeiError> {
        let snapshot = {
            let mut inner = self.inner.lock().expect("state cache poisoned");
            if !inner.dirty {
                return Ok(());
            }
            inner.dirty = false;
            inner.state.clone()
        };
        self.store.save(&snapshot)
    }
}
