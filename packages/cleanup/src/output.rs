//! Output sink for a running cleanup job.
//!
//! Defines a [`CleanupOutput`] trait that decouples job output from any
//! specific rendering backend (e.g., `indicatif` progress bars, log-only
//! reporting, or silence). Implementations are provided upstream in crates
//! that choose a rendering strategy.

use std::sync::Arc;

use keysweep_progress_models::TableRef;

use crate::CleanupSummary;

/// Receives progress events from a running cleanup job.
///
/// Implementations must be `Send + Sync` so a job can be run on a spawned
/// tokio task while its output is shared through an `Arc`.
pub trait CleanupOutput: Send + Sync {
    /// The job accepted `tables` tables of `keyspace`.
    fn job_started(&self, keyspace: &str, tables: usize);

    /// Rewriting of `table` begins; it has `segments` segments.
    fn table_started(&self, table: &TableRef, segments: u64);

    /// One more segment of `table` was rewritten.
    fn segment_completed(&self, table: &TableRef, completed: u64, total: u64);

    /// Every segment of `table` was rewritten.
    fn table_completed(&self, table: &TableRef);

    /// The job ended successfully.
    fn finished(&self, summary: &CleanupSummary);
}

/// A no-op implementation of [`CleanupOutput`].
pub struct NullOutput;

impl CleanupOutput for NullOutput {
    fn job_started(&self, _keyspace: &str, _tables: usize) {}
    fn table_started(&self, _table: &TableRef, _segments: u64) {}
    fn segment_completed(&self, _table: &TableRef, _completed: u64, _total: u64) {}
    fn table_completed(&self, _table: &TableRef) {}
    fn finished(&self, _summary: &CleanupSummary) {}
}

/// Returns a shared [`NullOutput`] instance for convenient use.
#[must_use]
pub fn null_output() -> Arc<dyn CleanupOutput> {
    Arc::new(NullOutput)
}

/// A [`CleanupOutput`] that writes one log line per table.
///
/// Used by the management server, where nobody watches a terminal.
pub struct LogOutput;

impl CleanupOutput for LogOutput {
    fn job_started(&self, keyspace: &str, tables: usize) {
        log::info!("Cleaning up {tables} table(s) of keyspace {keyspace}");
    }

    fn table_started(&self, table: &TableRef, segments: u64) {
        log::info!("Cleaning up {table} ({segments} sstable(s))");
    }

    fn segment_completed(&self, table: &TableRef, completed: u64, total: u64) {
        log::trace!("{table}: {completed}/{total} sstable(s) cleaned up");
    }

    fn table_completed(&self, table: &TableRef) {
        log::info!("Finished cleaning up {table}");
    }

    fn finished(&self, summary: &CleanupSummary) {
        log::info!("{summary}");
    }
}
