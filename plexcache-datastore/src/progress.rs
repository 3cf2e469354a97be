//! Progress tracker for one caching run, modelled on
//! `pbs-datastore::store_progress::StoreProgress`'s interpolated
//! percentage, generalized to the two orthogonal counters `spec.md`
//! §4.8 requires: file-level and byte-level.

use chrono::{DateTime, Utc};

#[derive(Debug, Default, Clone, Copy)]
pub struct RunProgress {
    pub files_done: u64,
    pub files_total: u64,
    pub bytes_done: u64,
    pub bytes_total: u64,
}

impl RunProgress {
    pub fn new(files_total: u64, bytes_total: u64) -> Self {
        RunProgress {
            files_total,
            bytes_total,
            ..Default::default()
        }
    }

    pub fn add_file_completed(&mut self) {
        self.files_done += 1;
    }

    pub fn add_bytes(&mut self, bytes: u64) {
        self.bytes_done = self.bytes_done.saturating_add(bytes);
    }

    /// The byte counter drives the primary percentage whenever there is
    /// byte-level data to report — it updates smoothly during large
    /// copies, per `spec.md` §4.8. Falls back to the file counter
    /// otherwise.
    pub fn percentage(&self) -> f64 {
        if self.bytes_total > 0 {
            (self.bytes_done as f64 / self.bytes_total as f64).min(1.0)
        } else if self.files_total > 0 {
            (self.files_done as f64 / self.files_total as f64).min(1.0)
        } else {
            0.0
        }
    }

    /// Extrapolates remaining time from the observed byte rate since
    /// `batch_started_at`.
    pub fn eta_seconds(&self, batch_started_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<f64> {
        if self.bytes_total == 0 || self.bytes_done == 0 {
            return None;
        }
        let elapsed = now.signed_duration_since(batch_started_at).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 {
            return None;
        }
        let rate = self.bytes_done as f64 / elapsed;
        if rate <= 0.0 {
            return None;
        }
        let remaining_bytes = self.bytes_total.saturating_sub(self.bytes_done) as f64;
        Some(remaining_bytes / rate)
    }
}

impl std::fmt::Display for RunProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.2}% ({}/{} files)",
            self.percentage() * 100.0,
            self.files_done,
            self.files_total,
        )
    }
}
