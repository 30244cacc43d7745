//! Best-effort removal of extracted files when the process exits.
//!
//! Extracted libraries stay mapped until the process ends, so they cannot be
//! deleted eagerly. Instead each extractor registers what it created here and
//! the list is drained from an `atexit` hook, newest entry first, so files go
//! before the directories holding them.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, Once, PoisonError},
};

use tracing::debug;

/// A filesystem object scheduled for removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupEntry {
    /// A single file.
    File(PathBuf),
    /// A directory, removed only if it is empty by then.
    EmptyDir(PathBuf),
    /// A directory and everything below it.
    Tree(PathBuf),
}

impl CleanupEntry {
    pub fn path(&self) -> &Path {
        match self {
            Self::File(path) | Self::EmptyDir(path) | Self::Tree(path) => path,
        }
    }

    fn remove(&self) -> io::Result<()> {
        match self {
            Self::File(path) => fs::remove_file(path),
            Self::EmptyDir(path) => fs::remove_dir(path),
            Self::Tree(path) => fs::remove_dir_all(path),
        }
    }
}

/// An ordered list of pending removals.
#[derive(Debug, Default)]
pub struct CleanupList {
    entries: Mutex<Vec<CleanupEntry>>,
}

impl CleanupList {
    pub const fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Schedules `entry`; registering the same entry twice is a no-op.
    pub fn push(&self, entry: CleanupEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if !entries.contains(&entry) {
            entries.push(entry);
        }
    }

    /// Unschedules every entry at or below `dir` and returns how many were
    /// dropped. Used once `dir` has already been removed.
    pub fn forget_under(&self, dir: &Path) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|entry| !entry.path().starts_with(dir));
        before - entries.len()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|entry| entry.path() == path)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every scheduled entry in reverse registration order.
    ///
    /// Failures are ignored: a non-empty directory or a file that is still
    /// locked by the OS simply stays behind. Returns how many entries were
    /// removed.
    pub fn run(&self) -> usize {
        let entries = {
            let mut guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        entries
            .iter()
            .rev()
            .filter(|entry| match entry.remove() {
                Ok(()) => true,
                Err(err) => {
                    debug!(
                        path = %entry.path().display(),
                        error = %err,
                        "Leaving extracted file behind"
                    );
                    false
                }
            })
            .count()
    }
}

static EXIT_CLEANUP: CleanupList = CleanupList::new();
static INSTALL_HOOK: Once = Once::new();

extern "C" fn run_exit_cleanup() {
    EXIT_CLEANUP.run();
}

/// Schedules `entry` for removal when the process exits normally.
pub fn delete_on_exit(entry: CleanupEntry) {
    INSTALL_HOOK.call_once(|| {
        // SAFETY: `run_exit_cleanup` is a plain `extern "C"` function with no
        // captured state; it only touches a static that outlives `main`.
        let status = unsafe { libc::atexit(run_exit_cleanup) };
        if status != 0 {
            debug!(status, "Could not register exit cleanup hook");
        }
    });
    EXIT_CLEANUP.push(entry);
}

/// Drops the exit-time removals scheduled at or below `dir`.
pub(crate) fn forget_on_exit(dir: &Path) -> usize {
    EXIT_CLEANUP.forget_under(dir)
}

#[cfg(test)]
pub(crate) fn is_scheduled_on_exit(path: &Path) -> bool {
    EXIT_CLEANUP.contains(path)
}
