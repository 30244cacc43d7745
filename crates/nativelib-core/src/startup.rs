//! Process lifecycle flag deciding how failures are reported.

use std::{
    sync::{
        OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    time::SystemTime,
};

use tracing::info;

/// Lifecycle phase of the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Libraries are essential; failures abort initialization.
    Startup,
    /// Libraries are optional; failures degrade the feature that needs them.
    Running,
}

/// One-way `Startup -> Running` switch.
#[derive(Debug, Default)]
pub struct StartupState {
    completed: AtomicBool,
    completed_at: OnceLock<SystemTime>,
}

impl StartupState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_startup_phase(&self) -> bool {
        !self.completed.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> Phase {
        if self.is_startup_phase() {
            Phase::Startup
        } else {
            Phase::Running
        }
    }

    /// Ends the startup phase. Later calls have no effect.
    pub fn mark_completed(&self) {
        let now = *self.completed_at.get_or_init(SystemTime::now);
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(
            completed_at = ?now,
            "Startup completed; native library failures are no longer fatal"
        );
    }

    /// When startup was marked complete.
    pub fn completed_at(&self) -> Option<SystemTime> {
        self.completed_at.get().copied()
    }
}
