#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Node management interface for cleanup jobs.
//!
//! [`ManagementClient`] is what the operator tool talks to. It is
//! implemented by [`LocalNode`], which owns the node's schema, its single
//! [`keysweep_progress::ProgressTracker`] and a cleanup engine, and by
//! [`HttpNode`], which reaches a `LocalNode` hosted by the management
//! server.

pub mod http;
pub mod local;
pub mod schema;
pub mod simulated;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keysweep_cleanup::{CleanupError, CleanupOutput};
use keysweep_node_models::KeyspaceSet;
use keysweep_progress::JobAlreadyRunning;
use keysweep_progress_models::{StatusMap, StatusMapError};

pub use http::HttpNode;
pub use local::LocalNode;
pub use schema::{Schema, SchemaError};
pub use simulated::SimulatedRewriter;

/// Environment variable naming the schema file.
pub const SCHEMA_ENV: &str = "KEYSWEEP_SCHEMA";
/// Schema file used when [`SCHEMA_ENV`] is unset.
pub const DEFAULT_SCHEMA_PATH: &str = "keysweep.toml";
/// Environment variable with the simulated per-segment rewrite time.
pub const SEGMENT_DELAY_ENV: &str = "KEYSWEEP_SEGMENT_DELAY_MS";
/// Simulated per-segment rewrite time when [`SEGMENT_DELAY_ENV`] is unset.
pub const DEFAULT_SEGMENT_DELAY: Duration = Duration::from_millis(50);

/// Errors raised by a node while serving a management request.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The keyspace is not in the node's schema.
    #[error("Keyspace {0} does not exist")]
    UnknownKeyspace(String),

    /// The table is not in the keyspace.
    #[error("Table {table} does not exist in keyspace {keyspace}")]
    UnknownTable {
        /// Keyspace that was searched.
        keyspace: String,
        /// Table that was asked for.
        table: String,
    },

    /// The keyspace only holds node-local data.
    #[error("Keyspace {0} is local to this node; cleanup is not needed")]
    LocalKeyspace(String),

    /// Another cleanup job is still tracked.
    #[error(transparent)]
    AlreadyRunning(#[from] JobAlreadyRunning),

    /// The job was aborted.
    #[error("Cleanup failed: {0}")]
    Cleanup(#[from] CleanupError),
}

/// Errors raised while talking to a node.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The node refused or failed the request.
    #[error(transparent)]
    Node(#[from] NodeError),

    /// The HTTP request could not be completed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The node answered with an error status.
    #[error("Node rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Error message reported by the node.
        message: String,
    },

    /// The node returned a status map that could not be read.
    #[error("Malformed progress from node: {0}")]
    Status(#[from] StatusMapError),

    /// A job started over HTTP was reported as failed by the node.
    #[error("Cleanup of keyspace {keyspace} failed on the node: {message}")]
    JobFailed {
        /// Keyspace of the failed job.
        keyspace: String,
        /// Failure reported by the node.
        message: String,
    },
}

/// Management operations the `cleanup` command needs from a node.
#[async_trait]
pub trait ManagementClient: Send + Sync {
    /// Lists the node's keyspaces in `set`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the node cannot be reached.
    async fn keyspaces(&self, set: KeyspaceSet) -> Result<Vec<String>, TransportError>;

    /// Returns the progress of the node's cleanup job, or `None` when no
    /// job is running. Progress is node-wide: the job is reported
    /// whichever keyspace it belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the node cannot be reached or does not
    /// know `keyspace`.
    async fn get_progress(&self, keyspace: &str) -> Result<Option<StatusMap>, TransportError>;

    /// Starts a cleanup of `tables` of `keyspace` (every table when empty)
    /// and streams its progress to `output` until it ends.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the job cannot be started or fails.
    async fn start_job(
        &self,
        output: Arc<dyn CleanupOutput>,
        jobs: usize,
        keyspace: &str,
        tables: &[String],
    ) -> Result<(), TransportError>;
}

/// Schema file path from [`SCHEMA_ENV`], or [`DEFAULT_SCHEMA_PATH`].
#[must_use]
pub fn schema_path_from_env() -> PathBuf {
    std::env::var_os(SCHEMA_ENV).map_or_else(|| PathBuf::from(DEFAULT_SCHEMA_PATH), PathBuf::from)
}

/// Simulated per-segment rewrite time from [`SEGMENT_DELAY_ENV`], or
/// [`DEFAULT_SEGMENT_DELAY`].
#[must_use]
pub fn segment_delay_from_env() -> Duration {
    std::env::var(SEGMENT_DELAY_ENV)
        .ok()
        .and_then(|ms| ms.parse().ok())
        .map_or(DEFAULT_SEGMENT_DELAY, Duration::from_millis)
}
