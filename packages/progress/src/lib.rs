#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Synchronized progress tracking for node cleanup jobs.
//!
//! A node runs at most one cleanup job at a time. The [`ProgressTracker`]
//! owns the progress of that job and hands out two disjoint capabilities:
//!
//! * [`ProgressTracker::start`] returns the single [`JobHandle`], which is
//!   the only way to mutate progress. The job worker holds it for the
//!   lifetime of the job; dropping it tears the progress down.
//! * [`ProgressTracker::snapshot`] / [`ProgressTracker::status`] may be
//!   called by any number of pollers at any time and always observe a
//!   whole state, never a half-applied mutation.

mod state;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use keysweep_progress_models::{ProgressStatus, Snapshot, TableId};

use crate::state::ProgressState;

pub use crate::state::SegmentOutcome;

/// A mutator was called in a state the table lifecycle does not allow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidTransition {
    /// `begin_table` while another table is still in progress.
    #[error("cannot begin table {requested} while table {current} is in progress")]
    TableInProgress {
        /// Table the caller tried to begin.
        requested: TableId,
        /// Table still in progress.
        current: TableId,
    },

    /// `complete_segment` with no table in progress.
    #[error("cannot complete a segment while no table is in progress")]
    NoTableInProgress,

    /// `finish` before every target table was completed.
    #[error("cannot finish job with {remaining} table(s) remaining")]
    Unfinished {
        /// Number of target tables not yet completed.
        remaining: usize,
    },
}

/// Errors returned by the [`JobHandle`] mutators.
///
/// Every variant means the job runner and the tracker disagree about the
/// table lifecycle. The failing call is never partially applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgressError {
    /// The call violates the table lifecycle.
    #[error("Invalid transition: {0}")]
    InvalidTransition(#[from] InvalidTransition),

    /// `begin_table` named a table outside the job or one already done.
    #[error("Unknown table {table}: {reason}")]
    UnknownTable {
        /// Table the caller tried to begin.
        table: TableId,
        /// Why the table cannot be started.
        reason: UnknownTableReason,
    },

    /// The handle's job is no longer the one the tracker holds.
    #[error("Cleanup job {job} is no longer tracked")]
    JobNotTracked {
        /// Job the handle belongs to.
        job: u64,
    },
}

/// Why [`ProgressError::UnknownTable`] was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownTableReason {
    /// The table is not one of the job's targets.
    NotATarget,
    /// The table was already completed by this job.
    AlreadyCompleted,
}

impl std::fmt::Display for UnknownTableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NotATarget => "not a target of this job",
            Self::AlreadyCompleted => "already completed",
        })
    }
}

/// A start request arrived while another job is still tracked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("A cleanup job is already running ({tables_remaining} table(s) remaining)")]
pub struct JobAlreadyRunning {
    /// Tables the running job has not completed yet.
    pub tables_remaining: usize,
}

/// Node-wide owner of the progress of the single running cleanup job.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    state: Mutex<Option<ProgressState>>,
    next_job: AtomicU64,
}

impl ProgressTracker {
    /// Creates a tracker with no job.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins tracking a new job over `targets`.
    ///
    /// Duplicate ids are collapsed; the first occurrence fixes the order in
    /// which tables are rendered.
    ///
    /// # Errors
    ///
    /// Returns [`JobAlreadyRunning`] if a job is already tracked.
    pub fn start(
        self: &Arc<Self>,
        targets: impl IntoIterator<Item = TableId>,
    ) -> Result<JobHandle, JobAlreadyRunning> {
        let mut state = self.lock();
        if let Some(running) = state.as_ref() {
            return Err(JobAlreadyRunning {
                tables_remaining: running.tables_remaining(),
            });
        }

        let job = self.next_job.fetch_add(1, Ordering::Relaxed);
        let progress = ProgressState::new(job, targets);
        log::info!(
            "Cleanup job {job} started for {} table(s)",
            progress.target_count()
        );
        *state = Some(progress);

        Ok(JobHandle {
            tracker: Arc::clone(self),
            job,
            released: false,
        })
    }

    /// Returns the progress of the running job, or `None` when no job is
    /// tracked (never started, or already torn down).
    #[must_use]
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.lock().as_ref().map(ProgressState::snapshot)
    }

    /// Same as [`Self::snapshot`], as a typed status outcome.
    #[must_use]
    pub fn status(&self) -> ProgressStatus {
        self.snapshot().into()
    }

    /// Whether a job is currently tracked.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    // Mutators validate before writing, so a poisoned lock still guards a
    // consistent state.
    fn lock(&self) -> MutexGuard<'_, Option<ProgressState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_job<T>(
        &self,
        job: u64,
        f: impl FnOnce(&mut ProgressState) -> Result<T, ProgressError>,
    ) -> Result<T, ProgressError> {
        let mut state = self.lock();
        match state.as_mut() {
            Some(progress) if progress.job() == job => f(progress),
            _ => Err(ProgressError::JobNotTracked { job }),
        }
    }

    fn release(&self, job: u64) -> Option<Snapshot> {
        let mut state = self.lock();
        if state.as_ref().is_some_and(|progress| progress.job() == job) {
            state.take().map(|progress| progress.snapshot())
        } else {
            None
        }
    }
}

/// Exclusive mutator capability for the running job.
///
/// Returned by [`ProgressTracker::start`]. The progress stays visible to
/// pollers until the handle is finished, aborted, or dropped.
#[derive(Debug)]
pub struct JobHandle {
    tracker: Arc<ProgressTracker>,
    job: u64,
    released: bool,
}

impl JobHandle {
    /// Starts tracking `table` with `segments` segments to rewrite.
    ///
    /// A table with no segments is recorded as completed straight away.
    ///
    /// # Errors
    ///
    /// * [`ProgressError::InvalidTransition`] if another table is still in
    ///   progress.
    /// * [`ProgressError::UnknownTable`] if `table` is not a target of this
    ///   job or has already been completed.
    pub fn begin_table(&self, table: TableId, segments: u64) -> Result<(), ProgressError> {
        self.tracker
            .with_job(self.job, |progress| progress.begin_table(table, segments))?;
        log::debug!(
            "Cleanup job {}: table {table} started with {segments} segment(s)",
            self.job
        );
        Ok(())
    }

    /// Records that one segment of the current table was rewritten.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::InvalidTransition`] if no table is in
    /// progress.
    pub fn complete_segment(&self) -> Result<SegmentOutcome, ProgressError> {
        let outcome = self
            .tracker
            .with_job(self.job, ProgressState::complete_segment)?;
        if let SegmentOutcome::TableCompleted(table) = outcome {
            log::debug!("Cleanup job {}: table {table} completed", self.job);
        }
        Ok(outcome)
    }

    /// Current progress of this job.
    #[must_use]
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.tracker.snapshot()
    }

    /// Identifier of this job within its tracker.
    #[must_use]
    pub const fn job_id(&self) -> u64 {
        self.job
    }

    /// Ends a job whose every target table was completed and tears its
    /// progress down, returning the final snapshot.
    ///
    /// # Errors
    ///
    /// * [`ProgressError::InvalidTransition`] if tables remain. The
    ///   progress is torn down either way.
    /// * [`ProgressError::JobNotTracked`] if the job was already torn down.
    pub fn finish(mut self) -> Result<Snapshot, ProgressError> {
        let remaining = self
            .tracker
            .with_job(self.job, |progress| Ok(progress.tables_remaining()))?;
        let snapshot = self.release();
        if remaining > 0 {
            log::warn!(
                "Cleanup job {} finished with {remaining} table(s) remaining",
                self.job
            );
            return Err(InvalidTransition::Unfinished { remaining }.into());
        }
        log::info!("Cleanup job {} finished", self.job);
        snapshot.ok_or(ProgressError::JobNotTracked { job: self.job })
    }

    /// Ends a failed job and tears its progress down.
    pub fn abort(mut self, reason: &str) {
        log::warn!("Cleanup job {} aborted: {reason}", self.job);
        self.release();
    }

    fn release(&mut self) -> Option<Snapshot> {
        self.released = true;
        self.tracker.release(self.job)
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        if !self.released {
            log::warn!(
                "Cleanup job {} dropped before finishing, discarding its progress",
                self.job
            );
            self.release();
        }
    }
}
