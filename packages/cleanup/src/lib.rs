#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Cleanup job runner.
//!
//! A cleanup job rewrites every segment (sstable) of a set of tables,
//! dropping data the node no longer owns. The rewrite itself is done by a
//! [`SegmentRewriter`]; the [`JobRunner`] walks the tables one at a time,
//! feeds the rewriter, and reports each step to the job's
//! [`keysweep_progress::JobHandle`] and to a [`CleanupOutput`].

pub mod output;
mod runner;

use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use keysweep_progress::ProgressError;
use keysweep_progress_models::TableRef;

pub use output::{CleanupOutput, LogOutput, NullOutput, null_output};
pub use runner::JobRunner;

/// Errors reported by a [`SegmentRewriter`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// I/O error while reading or writing a segment.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The table has no data directory on this node.
    #[error("Table {table} is not present on this node")]
    MissingTable {
        /// Table that was asked for.
        table: String,
    },

    /// A segment could not be rewritten.
    #[error("Failed to rewrite sstable {segment} of {table}: {message}")]
    Rewrite {
        /// Table the segment belongs to.
        table: String,
        /// Segment that failed.
        segment: Segment,
        /// Description of what went wrong.
        message: String,
    },
}

/// Errors that end a cleanup job.
#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    /// The rewrite engine failed.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// The runner and the progress tracker disagree about the table
    /// lifecycle.
    #[error("Progress error: {0}")]
    Progress(#[from] ProgressError),
}

/// One immutable on-disk segment (sstable) of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Segment {
    /// Generation number, unique within the table.
    pub generation: u64,
    /// Size of the segment on disk, in bytes.
    pub size_bytes: u64,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.generation)
    }
}

/// Engine that rewrites segments, keeping only data the node still owns.
#[async_trait]
pub trait SegmentRewriter: Send + Sync {
    /// Lists the live segments of `table`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the table's segments cannot be listed.
    async fn segments(&self, table: &TableRef) -> Result<Vec<Segment>, EngineError>;

    /// Rewrites a single segment of `table`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the rewrite fails.
    async fn rewrite(&self, table: &TableRef, segment: Segment) -> Result<(), EngineError>;
}

/// Outcome of a successful cleanup job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupSummary {
    /// Keyspace that was cleaned up.
    pub keyspace: String,
    /// Number of tables processed.
    pub tables: usize,
    /// Number of segments rewritten across all tables.
    pub segments: u64,
    /// Wall-clock duration of the job.
    pub elapsed: Duration,
}

impl fmt::Display for CleanupSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cleanup of keyspace {} complete: {} table(s), {} sstable(s) in {:.1}s",
            self.keyspace,
            self.tables,
            self.segments,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Resolves the `--jobs` concurrency hint: `0` means one job per available
/// CPU.
#[must_use]
pub fn effective_jobs(jobs: usize) -> usize {
    if jobs == 0 {
        std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
    } else {
        jobs
    }
}
