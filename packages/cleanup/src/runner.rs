//! Sequential per-table cleanup with bounded per-segment concurrency.

use std::sync::Arc;
use std::time::Instant;

use futures::{StreamExt as _, stream};
use keysweep_progress::JobHandle;
use keysweep_progress_models::TableRef;

use crate::{CleanupError, CleanupOutput, CleanupSummary, SegmentRewriter, effective_jobs};

/// Drives a cleanup job from start to finish.
///
/// Tables are processed strictly one after another. Within a table up to
/// `jobs` segments are rewritten concurrently, but every completion is
/// recorded from this task, so the tracker only ever sees one writer.
#[derive(Clone)]
pub struct JobRunner {
    rewriter: Arc<dyn SegmentRewriter>,
}

impl JobRunner {
    /// Creates a runner backed by `rewriter`.
    #[must_use]
    pub fn new(rewriter: Arc<dyn SegmentRewriter>) -> Self {
        Self { rewriter }
    }

    /// Runs the job owned by `job` over `tables` of `keyspace`.
    ///
    /// The job's progress is torn down when this returns, whether it
    /// succeeded or not.
    ///
    /// # Errors
    ///
    /// Returns [`CleanupError`] on the first engine failure or progress
    /// protocol violation. The remaining tables are not processed.
    pub async fn run(
        &self,
        job: JobHandle,
        keyspace: &str,
        tables: &[TableRef],
        jobs: usize,
        output: &dyn CleanupOutput,
    ) -> Result<CleanupSummary, CleanupError> {
        let started = Instant::now();
        let concurrency = effective_jobs(jobs);
        log::info!(
            "Cleanup job {} on keyspace {keyspace}: {} table(s), {concurrency} concurrent sstable(s)",
            job.job_id(),
            tables.len()
        );
        output.job_started(keyspace, tables.len());

        match self.clean_tables(&job, tables, concurrency, output).await {
            Ok(segments) => {
                job.finish()?;
                let summary = CleanupSummary {
                    keyspace: keyspace.to_string(),
                    tables: tables.len(),
                    segments,
                    elapsed: started.elapsed(),
                };
                output.finished(&summary);
                Ok(summary)
            }
            Err(e) => {
                job.abort(&e.to_string());
                Err(e)
            }
        }
    }

    async fn clean_tables(
        &self,
        job: &JobHandle,
        tables: &[TableRef],
        concurrency: usize,
        output: &dyn CleanupOutput,
    ) -> Result<u64, CleanupError> {
        let mut rewritten = 0;

        for table in tables {
            let segments = self.rewriter.segments(table).await?;
            let total = segments.len() as u64;
            job.begin_table(table.id, total)?;
            output.table_started(table, total);

            let mut rewrites = stream::iter(segments)
                .map(|segment| self.rewriter.rewrite(table, segment))
                .buffer_unordered(concurrency);

            let mut completed = 0;
            while let Some(result) = rewrites.next().await {
                result?;
                job.complete_segment()?;
                completed += 1;
                output.segment_completed(table, completed, total);
            }

            rewritten += completed;
            output.table_completed(table);
        }

        Ok(rewritten)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use keysweep_progress::{ProgressError, ProgressTracker};
    use keysweep_progress_models::{Snapshot, TableId};
    use uuid::Uuid;

    use super::*;
    use crate::{EngineError, NullOutput, Segment};

    fn table(n: u128, name: &str) -> TableRef {
        TableRef {
            keyspace: "shop".to_string(),
            name: name.to_string(),
            id: TableId::new(Uuid::from_u128(n)),
        }
    }

    /// Rewriter with fixed segment counts that records what pollers would
    /// have seen while each segment was being rewritten.
    struct FakeRewriter {
        tracker: Arc<ProgressTracker>,
        segments: HashMap<String, u64>,
        fail_on: Option<(String, u64)>,
        seen: Mutex<Vec<Snapshot>>,
    }

    impl FakeRewriter {
        fn new(tracker: &Arc<ProgressTracker>, segments: &[(&str, u64)]) -> Self {
            Self {
                tracker: Arc::clone(tracker),
                segments: segments
                    .iter()
                    .map(|(name, count)| ((*name).to_string(), *count))
                    .collect(),
                fail_on: None,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SegmentRewriter for FakeRewriter {
        async fn segments(&self, table: &TableRef) -> Result<Vec<Segment>, EngineError> {
            let count = self
                .segments
                .get(&table.name)
                .ok_or_else(|| EngineError::MissingTable {
                    table: table.to_string(),
                })?;
            Ok((0..*count)
                .map(|generation| Segment {
                    generation,
                    size_bytes: 1024,
                })
                .collect())
        }

        async fn rewrite(&self, table: &TableRef, segment: Segment) -> Result<(), EngineError> {
            if let Some(snapshot) = self.tracker.snapshot() {
                self.seen.lock().unwrap().push(snapshot);
            }
            if self.fail_on.as_ref() == Some(&(table.name.clone(), segment.generation)) {
                return Err(EngineError::Rewrite {
                    table: table.to_string(),
                    segment,
                    message: "disk full".to_string(),
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingOutput {
        events: Mutex<Vec<String>>,
    }

    impl CleanupOutput for RecordingOutput {
        fn job_started(&self, keyspace: &str, tables: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("job {keyspace} {tables}"));
        }

        fn table_started(&self, table: &TableRef, segments: u64) {
            self.events
                .lock()
                .unwrap()
                .push(format!("start {} {segments}", table.name));
        }

        fn segment_completed(&self, table: &TableRef, completed: u64, total: u64) {
            self.events
                .lock()
                .unwrap()
                .push(format!("segment {} {completed}/{total}", table.name));
        }

        fn table_completed(&self, table: &TableRef) {
            self.events
                .lock()
                .unwrap()
                .push(format!("done {}", table.name));
        }

        fn finished(&self, summary: &CleanupSummary) {
            self.events
                .lock()
                .unwrap()
                .push(format!("finished {}", summary.segments));
        }
    }

    #[tokio::test]
    async fn cleans_every_table_in_order() {
        let tracker = Arc::new(ProgressTracker::new());
        let rewriter = Arc::new(FakeRewriter::new(&tracker, &[("orders", 2), ("carts", 1)]));
        let runner = JobRunner::new(rewriter.clone());
        let tables = [table(1, "orders"), table(2, "carts")];
        let job = tracker.start(tables.iter().map(|t| t.id)).unwrap();
        let output = RecordingOutput::default();

        let summary = runner.run(job, "shop", &tables, 1, &output).await.unwrap();

        assert_eq!(summary.tables, 2);
        assert_eq!(summary.segments, 3);
        assert_eq!(
            *output.events.lock().unwrap(),
            vec![
                "job shop 2",
                "start orders 2",
                "segment orders 1/2",
                "segment orders 2/2",
                "done orders",
                "start carts 1",
                "segment carts 1/1",
                "done carts",
                "finished 3",
            ]
        );
        assert_eq!(tracker.snapshot(), None);
    }

    #[tokio::test]
    async fn pollers_see_the_table_being_rewritten() {
        let tracker = Arc::new(ProgressTracker::new());
        let rewriter = Arc::new(FakeRewriter::new(&tracker, &[("orders", 3), ("carts", 2)]));
        let runner = JobRunner::new(rewriter.clone());
        let tables = [table(1, "orders"), table(2, "carts")];
        let job = tracker.start(tables.iter().map(|t| t.id)).unwrap();

        runner
            .run(job, "shop", &tables, 1, &NullOutput)
            .await
            .unwrap();

        let seen = rewriter.seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[0].current_table, Some(tables[0].id));
        assert_eq!(seen[0].sstables_to_clean_up, 3);
        assert_eq!(seen[2].sstables_completed, 2);
        assert_eq!(seen[3].current_table, Some(tables[1].id));
        assert_eq!(seen[3].tables_completed, vec![tables[0].id]);
        assert_eq!(seen[3].sstables_completed, 0);
    }

    #[tokio::test]
    async fn concurrent_segments_are_all_recorded() {
        let tracker = Arc::new(ProgressTracker::new());
        let rewriter = Arc::new(FakeRewriter::new(&tracker, &[("orders", 17)]));
        let runner = JobRunner::new(rewriter);
        let tables = [table(1, "orders")];
        let job = tracker.start([tables[0].id]).unwrap();

        let summary = runner
            .run(job, "shop", &tables, 0, &NullOutput)
            .await
            .unwrap();
        assert_eq!(summary.segments, 17);
    }

    #[tokio::test]
    async fn empty_table_is_completed_without_rewrites() {
        let tracker = Arc::new(ProgressTracker::new());
        let rewriter = Arc::new(FakeRewriter::new(&tracker, &[("orders", 0)]));
        let runner = JobRunner::new(rewriter);
        let tables = [table(1, "orders")];
        let job = tracker.start([tables[0].id]).unwrap();
        let output = RecordingOutput::default();

        runner.run(job, "shop", &tables, 2, &output).await.unwrap();
        assert!(
            output
                .events
                .lock()
                .unwrap()
                .contains(&"done orders".to_string())
        );
    }

    #[tokio::test]
    async fn engine_failure_aborts_and_tears_down() {
        let tracker = Arc::new(ProgressTracker::new());
        let mut rewriter = FakeRewriter::new(&tracker, &[("orders", 2), ("carts", 2)]);
        rewriter.fail_on = Some(("carts".to_string(), 1));
        let runner = JobRunner::new(Arc::new(rewriter));
        let tables = [table(1, "orders"), table(2, "carts")];
        let job = tracker.start(tables.iter().map(|t| t.id)).unwrap();

        let err = runner
            .run(job, "shop", &tables, 1, &NullOutput)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CleanupError::Engine(EngineError::Rewrite { .. })
        ));
        assert_eq!(tracker.snapshot(), None);
    }

    #[tokio::test]
    async fn table_outside_the_job_is_a_progress_error() {
        let tracker = Arc::new(ProgressTracker::new());
        let rewriter = Arc::new(FakeRewriter::new(&tracker, &[("orders", 1), ("carts", 1)]));
        let runner = JobRunner::new(rewriter);
        let job = tracker.start([table(1, "orders").id]).unwrap();
        let tables = [table(1, "orders"), table(2, "carts")];

        let err = runner
            .run(job, "shop", &tables, 1, &NullOutput)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CleanupError::Progress(ProgressError::UnknownTable { .. })
        ));
        assert!(!tracker.is_running());
    }
}
