//! Record of libraries already loaded into the process.

use std::sync::{Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use tracing::debug;

use crate::linker::{LibraryOrigin, LinkedLibrary};

/// Loaded libraries keyed by logical name, plus the lock serializing loads.
///
/// Lookups never take the load lock, so a caller asking about a library that
/// is already loaded is not blocked by another thread's slow extraction.
/// Entries are never removed: once a name is loaded it stays loaded.
#[derive(Debug, Default)]
pub struct LoadRegistry {
    loaded: DashMap<String, LinkedLibrary>,
    load_lock: Mutex<()>,
}

impl LoadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains_key(name)
    }

    /// Where `name` was loaded from, if it has been.
    pub fn origin(&self, name: &str) -> Option<LibraryOrigin> {
        self.loaded.get(name).map(|entry| entry.origin().clone())
    }

    /// Records `library` under `name`.
    ///
    /// The first record wins; returns `false` if the name was already
    /// present, in which case `library` is dropped.
    pub fn mark_loaded(&self, name: &str, library: LinkedLibrary) -> bool {
        match self.loaded.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(name = %name, origin = %library.origin(), "Recording loaded library");
                slot.insert(library);
                true
            }
        }
    }

    /// Logical names loaded so far, sorted.
    pub fn loaded_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.loaded.iter().map(|entry| entry.key().clone()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    /// Takes the load lock.
    ///
    /// A panic in another loader does not leave the registry inconsistent,
    /// so a poisoned lock is simply recovered.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.load_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
