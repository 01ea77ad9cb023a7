//! The mutable progress record behind a [`crate::ProgressTracker`].

use keysweep_progress_models::{Snapshot, TableId};

use crate::{InvalidTransition, ProgressError, UnknownTableReason};

/// Result of recording one rewritten segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOutcome {
    /// The current table still has segments left.
    Pending {
        /// Segments rewritten so far.
        completed: u64,
        /// Segments the table has in total.
        total: u64,
    },
    /// That was the last segment; the table moved to the completed list.
    TableCompleted(TableId),
}

/// A table whose segments are being rewritten. Only exists while
/// `completed < total`, so an idle job has no counters at all.
#[derive(Debug, Clone, Copy)]
struct CurrentTable {
    id: TableId,
    total: u64,
    completed: u64,
}

#[derive(Debug)]
pub struct ProgressState {
    job: u64,
    targets: Vec<TableId>,
    completed: Vec<TableId>,
    current: Option<CurrentTable>,
}

impl ProgressState {
    pub fn new(job: u64, targets: impl IntoIterator<Item = TableId>) -> Self {
        let mut unique = Vec::new();
        for id in targets {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        Self {
            job,
            targets: unique,
            completed: Vec::new(),
            current: None,
        }
    }

    pub const fn job(&self) -> u64 {
        self.job
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn tables_remaining(&self) -> usize {
        self.targets.len() - self.completed.len()
    }

    pub fn begin_table(&mut self, table: TableId, segments: u64) -> Result<(), ProgressError> {
        if let Some(current) = self.current {
            return Err(InvalidTransition::TableInProgress {
                requested: table,
                current: current.id,
            }
            .into());
        }
        if self.completed.contains(&table) {
            return Err(ProgressError::UnknownTable {
                table,
                reason: UnknownTableReason::AlreadyCompleted,
            });
        }
        if !self.targets.contains(&table) {
            return Err(ProgressError::UnknownTable {
                table,
                reason: UnknownTableReason::NotATarget,
            });
        }

        if segments == 0 {
            self.completed.push(table);
        } else {
            self.current = Some(CurrentTable {
                id: table,
                total: segments,
                completed: 0,
            });
        }
        Ok(())
    }

    pub fn complete_segment(&mut self) -> Result<SegmentOutcome, ProgressError> {
        let Some(mut current) = self.current else {
            return Err(InvalidTransition::NoTableInProgress.into());
        };

        current.completed += 1;
        if current.completed == current.total {
            self.completed.push(current.id);
            self.current = None;
            Ok(SegmentOutcome::TableCompleted(current.id))
        } else {
            self.current = Some(current);
            Ok(SegmentOutcome::Pending {
                completed: current.completed,
                total: current.total,
            })
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            tables_to_clean_up: self.targets.clone(),
            tables_completed: self.completed.clone(),
            sstables_to_clean_up: self.current.map_or(0, |current| current.total),
            sstables_completed: self.current.map_or(0, |current| current.completed),
            current_table: self.current.map(|current| current.id),
        }
    }
}
