//! In-process node: schema, progress tracker and cleanup engine.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use keysweep_cleanup::{CleanupOutput, CleanupSummary, JobRunner, SegmentRewriter};
use keysweep_node_models::{
    ApiJobOutcome, ApiJobResult, KeyspaceSet, ReplicationStrategy, is_local_system_keyspace,
};
use keysweep_progress::{JobHandle, ProgressTracker};
use keysweep_progress_models::{ProgressStatus, StatusMap, TableRef};

use crate::{
    ManagementClient, NodeError, Schema, SchemaError, SimulatedRewriter, TransportError,
    schema_path_from_env, segment_delay_from_env,
};

/// A job that has been registered with the tracker but not run yet.
///
/// Pollers already see it as running. Dropping it without
/// [`LocalNode::run_job`] discards the job.
#[derive(Debug)]
pub struct PendingJob {
    handle: JobHandle,
    keyspace: String,
    tables: Vec<TableRef>,
}

impl PendingJob {
    /// Identifier the tracker assigned to the job.
    #[must_use]
    pub const fn job_id(&self) -> u64 {
        self.handle.job_id()
    }

    /// Keyspace being cleaned up.
    #[must_use]
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    /// Tables the job will process, in order.
    #[must_use]
    pub fn tables(&self) -> &[TableRef] {
        &self.tables
    }
}

/// A node hosting one cleanup job at a time.
///
/// Cloning is cheap and every clone shares the same tracker, so the
/// management server can hand a clone to a background task while request
/// handlers keep polling.
#[derive(Clone)]
pub struct LocalNode {
    schema: Arc<Schema>,
    tracker: Arc<ProgressTracker>,
    runner: JobRunner,
    last_outcome: Arc<Mutex<Option<ApiJobOutcome>>>,
}

impl LocalNode {
    /// Creates a node storing `schema` and cleaning it up with `rewriter`.
    #[must_use]
    pub fn new(schema: Schema, rewriter: Arc<dyn SegmentRewriter>) -> Self {
        Self {
            schema: Arc::new(schema),
            tracker: Arc::new(ProgressTracker::new()),
            runner: JobRunner::new(rewriter),
            last_outcome: Arc::new(Mutex::new(None)),
        }
    }

    /// Creates a node backed by a [`SimulatedRewriter`].
    #[must_use]
    pub fn simulated(schema: Schema, delay: Duration) -> Self {
        let rewriter = Arc::new(SimulatedRewriter::new(&schema, delay));
        Self::new(schema, rewriter)
    }

    /// Creates a simulated node from the `KEYSWEEP_SCHEMA` and
    /// `KEYSWEEP_SEGMENT_DELAY_MS` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the schema file cannot be loaded.
    pub fn from_env() -> Result<Self, SchemaError> {
        let schema = Schema::load(&schema_path_from_env())?;
        Ok(Self::simulated(schema, segment_delay_from_env()))
    }

    /// The node's schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Progress of the running job.
    #[must_use]
    pub fn status(&self) -> ProgressStatus {
        self.tracker.status()
    }

    /// Outcome of the most recently ended job.
    #[must_use]
    pub fn last_outcome(&self) -> Option<ApiJobOutcome> {
        self.last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Registers a cleanup of `tables` of `keyspace` (every table when
    /// empty) with the tracker.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError`] if the keyspace or a table is unknown, the
    /// keyspace only holds node-local data, or a job is already running.
    pub fn begin_job(&self, keyspace: &str, tables: &[String]) -> Result<PendingJob, NodeError> {
        let resolved = self.schema.resolve_tables(keyspace, tables)?;
        if is_local_system_keyspace(keyspace)
            || self
                .schema
                .keyspace(keyspace)
                .is_some_and(|ks| ks.replication == ReplicationStrategy::Local)
        {
            return Err(NodeError::LocalKeyspace(keyspace.to_string()));
        }

        let tables: Vec<TableRef> = resolved.into_iter().map(|t| t.table.clone()).collect();
        let handle = self.tracker.start(tables.iter().map(|t| t.id))?;
        Ok(PendingJob {
            handle,
            keyspace: keyspace.to_string(),
            tables,
        })
    }

    /// Runs a job registered with [`Self::begin_job`] to completion and
    /// records its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Cleanup`] if the job was aborted.
    pub async fn run_job(
        &self,
        job: PendingJob,
        jobs: usize,
        output: &dyn CleanupOutput,
    ) -> Result<CleanupSummary, NodeError> {
        let PendingJob {
            handle,
            keyspace,
            tables,
        } = job;
        let job_id = handle.job_id();

        let result = self
            .runner
            .run(handle, &keyspace, &tables, jobs, output)
            .await;

        let outcome = match &result {
            Ok(summary) => ApiJobResult::Succeeded {
                tables: summary.tables,
                segments: summary.segments,
                elapsed_ms: u64::try_from(summary.elapsed.as_millis()).unwrap_or(u64::MAX),
            },
            Err(e) => {
                log::error!("Cleanup of keyspace {keyspace} failed: {e}");
                ApiJobResult::Failed {
                    error: e.to_string(),
                }
            }
        };
        *self
            .last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(ApiJobOutcome {
            job_id,
            keyspace,
            result: outcome,
        });

        result.map_err(NodeError::from)
    }
}

#[async_trait]
impl ManagementClient for LocalNode {
    async fn keyspaces(&self, set: KeyspaceSet) -> Result<Vec<String>, TransportError> {
        Ok(self.schema.keyspace_names(set))
    }

    async fn get_progress(&self, keyspace: &str) -> Result<Option<StatusMap>, TransportError> {
        if self.schema.keyspace(keyspace).is_none() {
            return Err(NodeError::UnknownKeyspace(keyspace.to_string()).into());
        }
        Ok(self.tracker.snapshot().map(|snapshot| snapshot.to_status_map()))
    }

    async fn start_job(
        &self,
        output: Arc<dyn CleanupOutput>,
        jobs: usize,
        keyspace: &str,
        tables: &[String],
    ) -> Result<(), TransportError> {
        let job = self.begin_job(keyspace, tables)?;
        self.run_job(job, jobs, output.as_ref()).await?;
        Ok(())
    }
}
