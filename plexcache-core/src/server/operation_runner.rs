//! `OperationRunner`: the in-process singleton driving at most one
//! caching run at a time. Generalizes the `WorkerTask`
//! registry/abort-flag pattern (`src/server/worker_task.rs`) from a
//! tokio-async, id-keyed task table to a single native-thread job slot,
//! per `spec.md` §5 ("parallel native threads, not cooperative tasks")
//! and §4.8 (one caching run at a time).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Error};
use chrono::{DateTime, Utc};
use log::{error, info};
use once_cell::sync::Lazy;

use plexcache_datastore::RunProgress;
use plexcache_types::{RunOutcome, RunPhase};

use super::maintenance_runner::MaintenanceRunner;

/// Handed to the run closure so it can report phase/progress and
/// observe a stop request without reaching back into global state.
pub struct RunHandle {
    stop: Arc<AtomicBool>,
    phase: Arc<Mutex<RunPhase>>,
    progress: Arc<Mutex<RunProgress>>,
}

impl RunHandle {
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn set_phase(&self, phase: RunPhase) {
        *self.phase.lock().unwrap() = phase;
    }

    pub fn add_file_completed(&self) {
        self.progress.lock().unwrap().add_file_completed();
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.progress.lock().unwrap().add_bytes(bytes);
    }

    pub fn on_bytes_callback(&self) -> Arc<dyn Fn(u64) + Send + Sync> {
        let progress = Arc::clone(&self.progress);
        Arc::new(move |n| progress.lock().unwrap().add_bytes(n))
    }

    pub fn on_file_done_callback(&self) -> Arc<dyn Fn() + Send + Sync> {
        let progress = Arc::clone(&self.progress);
        Arc::new(move || progress.lock().unwrap().add_file_completed())
    }

    /// Builds a handle for running a `ControlLoop` pass synchronously,
    /// bypassing the `OperationRunner` thread/slot machinery — used by
    /// the CLI's one-shot invocation and by tests.
    pub fn standalone(stop: Arc<AtomicBool>) -> RunHandle {
        RunHandle {
            stop,
            phase: Arc::new(Mutex::new(RunPhase::Starting)),
            progress: Arc::new(Mutex::new(RunProgress::new(0, 0))),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RunnerStatus {
    Idle,
    Running { phase: RunPhase, progress: RunProgress, started_at: DateTime<Utc> },
    Finished { outcome: RunOutcome, progress: RunProgress, finished_at: DateTime<Utc> },
}

enum Slot {
    Idle,
    Running {
        phase: Arc<Mutex<RunPhase>>,
        progress: Arc<Mutex<RunProgress>>,
        stop: Arc<AtomicBool>,
        started_at: DateTime<Utc>,
    },
    Finished {
        outcome: RunOutcome,
        progress: RunProgress,
        finished_at: DateTime<Utc>,
    },
}

pub struct OperationRunner {
    slot: Mutex<Slot>,
}

static OPERATION_RUNNER: Lazy<OperationRunner> = Lazy::new(|| OperationRunner {
    slot: Mutex::new(Slot::Idle),
});

impl OperationRunner {
    pub fn global() -> &'static OperationRunner {
        &OPERATION_RUNNER
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.slot.lock().unwrap(), Slot::Running { .. })
    }

    pub fn status(&self) -> RunnerStatus {
        match &*self.slot.lock().unwrap() {
            Slot::Idle => RunnerStatus::Idle,
            Slot::Running { phase, progress, started_at, .. } => RunnerStatus::Running {
                phase: *phase.lock().unwrap(),
                progress: *progress.lock().unwrap(),
                started_at: *started_at,
            },
            Slot::Finished { outcome, progress, finished_at } => RunnerStatus::Finished {
                outcome: outcome.clone(),
                progress: *progress,
                finished_at: *finished_at,
            },
        }
    }

    /// `false` if no run was in progress to stop.
    pub fn request_stop(&self) -> bool {
        if let Slot::Running { stop, .. } = &*self.slot.lock().unwrap() {
            stop.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Starts `work` on a dedicated thread. Refuses if a caching run is
    /// already in progress, or if a maintenance action currently holds
    /// the mutual-exclusion lock (`spec.md` §4.9).
    pub fn start<F>(&self, files_total: u64, bytes_total: u64, work: F) -> Result<(), Error>
    where
        F: FnOnce(RunHandle) -> RunOutcome + Send + 'static,
    {
        if MaintenanceRunner::global().is_running() {
            bail!("cannot start a caching run while a maintenance action is in progress");
        }

        let mut slot = self.slot.lock().unwrap();
        if matches!(*slot, Slot::Running { .. }) {
            bail!("a caching run is already in progress");
        }

        let stop = Arc::new(AtomicBool::new(false));
        let phase = Arc::new(Mutex::new(RunPhase::Starting));
        let progress = Arc::new(Mutex::new(RunProgress::new(files_total, bytes_total)));
        let progress_for_finish = Arc::clone(&progress);
        let started_at = Utc::now();

        *slot = Slot::Running {
            phase: Arc::clone(&phase),
            progress: Arc::clone(&progress),
            stop: Arc::clone(&stop),
            started_at,
        };
        drop(slot);

        let run_handle = RunHandle { stop, phase, progress };

        std::thread::Builder::new()
            .name("plexcache-operation".to_string())
            .spawn(move || {
                let outcome = work(run_handle);
                match &outcome {
                    RunOutcome::Completed { stopped_early } => {
                        info!("caching run completed (stopped_early={stopped_early})")
                    }
                    RunOutcome::Failed { reason } => error!("caching run failed: {reason}"),
                }
                let final_progress = *progress_for_finish.lock().unwrap();
                *OperationRunner::global().slot.lock().unwrap() = Slot::Finished {
                    outcome,
                    progress: final_progress,
                    finished_at: Utc::now(),
                };
            })
            .expect("failed to spawn operation runner thread");

        Ok(())
    }
}
