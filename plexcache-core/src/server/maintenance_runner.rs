//! `MaintenanceRunner`: the singleton for one-off housekeeping actions
//! (backup-sidecar repair, plexcached restore/delete, orphan sync).
//! Mutually exclusive with [`OperationRunner`](super::operation_runner::OperationRunner) —
//! a caching run and a maintenance action never run at the same time,
//! mirroring the single global `WORKER_TASK_LIST` lock generalized to
//! two cooperating slots instead of one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Error};
use chrono::{DateTime, Utc};
use log::{error, info};
use once_cell::sync::Lazy;

use plexcache_types::RunOutcome;

use super::operation_runner::OperationRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceAction {
    /// Creates missing `.plexcached` sidecars for already-excluded files.
    BackupProtect,
    /// Restores array files whose only surviving copy is a `.plexcached` sidecar.
    RestorePlexcached,
    /// Deletes `.plexcached` sidecars whose original still exists on the array.
    DeletePlexcached,
    /// Moves a cached file back to the array when its exclude entry was lost.
    SyncOrphansToArray,
    /// Repairs a cache file whose array-side original is missing by restoring from its sidecar.
    FixWithBackup,
}

#[derive(Debug, Clone)]
pub enum MaintenanceStatus {
    Idle,
    Running { action: MaintenanceAction, started_at: DateTime<Utc> },
    Finished { action: MaintenanceAction, outcome: RunOutcome, finished_at: DateTime<Utc> },
}

enum Slot {
    Idle,
    Running { action: MaintenanceAction, stop: Arc<AtomicBool>, started_at: DateTime<Utc> },
    Finished { action: MaintenanceAction, outcome: RunOutcome, finished_at: DateTime<Utc> },
}

pub struct MaintenanceRunner {
    slot: Mutex<Slot>,
}

static MAINTENANCE_RUNNER: Lazy<MaintenanceRunner> =
    Lazy::new(|| MaintenanceRunner { slot: Mutex::new(Slot::Idle) });

impl MaintenanceRunner {
    pub fn global() -> &'static MaintenanceRunner {
        &MAINTENANCE_RUNNER
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.slot.lock().unwrap(), Slot::Running { .. })
    }

    pub fn status(&self) -> MaintenanceStatus {
        match &*self.slot.lock().unwrap() {
            Slot::Idle => MaintenanceStatus::Idle,
            Slot::Running { action, started_at, .. } => {
                MaintenanceStatus::Running { action: *action, started_at: *started_at }
            }
            Slot::Finished { action, outcome, finished_at } => MaintenanceStatus::Finished {
                action: *action,
                outcome: outcome.clone(),
                finished_at: *finished_at,
            },
        }
    }

    pub fn request_stop(&self) -> bool {
        if let Slot::Running { stop, .. } = &*self.slot.lock().unwrap() {
            stop.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    pub fn start<F>(&self, action: MaintenanceAction, work: F) -> Result<(), Error>
    where
        F: FnOnce(Arc<AtomicBool>) -> RunOutcome + Send + 'static,
    {
        if OperationRunner::global().is_running() {
            bail!("cannot start a maintenance action while a caching run is in progress");
        }

        let mut slot = self.slot.lock().unwrap();
        if matches!(*slot, Slot::Running { .. }) {
            bail!("a maintenance action is already in progress");
        }

        let stop = Arc::new(AtomicBool::new(false));
        let started_at = Utc::now();
        *slot = Slot::Running { action, stop: Arc::clone(&stop), started_at };
        drop(slot);

        std::thread::Builder::new()
            .name(format!("plexcache-maint-{action:?}"))
            .spawn(move || {
                let outcome = work(stop);
                match &outcome {
                    RunOutcome::Completed { stopped_early } => {
                        info!("maintenance action {action:?} completed (stopped_early={stopped_early})")
                    }
                    RunOutcome::Failed { reason } => {
                        error!("maintenance action {action:?} failed: {reason}")
                    }
                }
                *MaintenanceRunner::global().slot.lock().unwrap() =
                    Slot::Finished { action, outcome, finished_at: Utc::now() };
            })
            .expect("failed to spawn maintenance runner thread");

        Ok(())
    }
}
