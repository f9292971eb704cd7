//! Process-wide run/shutdown flag and the active-sync-task counter it waits on.
//!
//! Mirrors the supervisor's `kill()` contract from spec.md §4.7 / §5:
//! `initiate_shutdown` flips the shared flag, then waits for every
//! in-flight historical or realtime sync task to notice and return, up to
//! a bounded timeout, rather than aborting tasks mid-transaction.

use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use once_cell::sync::Lazy;
use tokio::time::Instant;
use tracing::{info, warn};

static IS_RUNNING: Lazy<AtomicBool> = Lazy::new(|| AtomicBool::new(true));
static ACTIVE_SYNC_TASKS: Lazy<AtomicUsize> = Lazy::new(|| AtomicUsize::new(0));

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// RAII guard held by every historical/realtime sync task for its lifetime.
///
/// Holding one of these is how `initiate_shutdown` knows a task is still
/// mid-flight; dropping it (on return, panic, or early-exit) decrements the
/// counter unconditionally.
pub struct SyncTaskGuard;

impl SyncTaskGuard {
    pub fn acquire() -> Self {
        ACTIVE_SYNC_TASKS.fetch_add(1, Ordering::SeqCst);
        SyncTaskGuard
    }
}

impl Drop for SyncTaskGuard {
    fn drop(&mut self) {
        ACTIVE_SYNC_TASKS.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn active_sync_task_count() -> usize {
    ACTIVE_SYNC_TASKS.load(Ordering::SeqCst)
}

pub fn is_running() -> bool {
    IS_RUNNING.load(Ordering::SeqCst)
}

/// Sets the shared shutdown flag and blocks until every active sync task has
/// finished, or `SHUTDOWN_TIMEOUT` elapses, whichever comes first.
pub async fn initiate_shutdown() {
    IS_RUNNING.store(false, Ordering::SeqCst);
    crate::logger::mark_shutdown_started();

    let mut active = active_sync_task_count();
    let start = Instant::now();

    info!("Starting shutdown with {} active sync tasks", active);

    while active > 0 {
        if start.elapsed() > SHUTDOWN_TIMEOUT {
            warn!("Shutdown timeout reached with {} tasks still active - forcing exit", active);
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        active = active_sync_task_count();
    }

    info!("Shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_tracks_active_count() {
        assert_eq!(active_sync_task_count(), 0);
        let guard = SyncTaskGuard::acquire();
        assert_eq!(active_sync_task_count(), 1);
        drop(guard);
        assert_eq!(active_sync_task_count(), 0);
    }
}
