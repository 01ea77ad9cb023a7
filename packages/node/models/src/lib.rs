#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Node schema and management API types.
//!
//! The schema describes the keyspaces and tables a node stores. It is read
//! from a TOML file and also drives which keyspaces the `cleanup` command
//! visits. The `Api*` types are the JSON contract of the management server.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use keysweep_progress_models::TableRef;

/// Keyspaces that only ever hold node-local data. Cleanup never touches
/// them.
pub const LOCAL_SYSTEM_KEYSPACES: [&str; 4] = [
    "system",
    "system_schema",
    "system_views",
    "system_virtual_schema",
];

/// Whether `keyspace` is one of the [`LOCAL_SYSTEM_KEYSPACES`].
#[must_use]
pub fn is_local_system_keyspace(keyspace: &str) -> bool {
    LOCAL_SYSTEM_KEYSPACES
        .iter()
        .any(|name| name.eq_ignore_ascii_case(keyspace))
}

/// How a keyspace's data is placed across the cluster.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReplicationStrategy {
    /// Data stays on the node that wrote it.
    Local,
    /// Replicas placed on consecutive nodes of the ring.
    Simple,
    /// Replicas placed per datacenter.
    #[default]
    NetworkTopology,
}

/// Which keyspaces a listing should return.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum KeyspaceSet {
    /// Every keyspace.
    All,
    /// Every keyspace not using [`ReplicationStrategy::Local`].
    #[default]
    NonLocal,
}

impl KeyspaceSet {
    /// Whether a keyspace with `replication` belongs to this set.
    #[must_use]
    pub fn includes(self, replication: ReplicationStrategy) -> bool {
        match self {
            Self::All => true,
            Self::NonLocal => replication != ReplicationStrategy::Local,
        }
    }
}

/// A table as declared in the schema file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    /// Table name, unique within its keyspace.
    pub name: String,
    /// Schema id; generated at load time when omitted.
    #[serde(default)]
    pub id: Option<Uuid>,
    /// Number of segments the simulated engine reports for this table.
    #[serde(default)]
    pub segments: u64,
}

/// A keyspace as declared in the schema file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyspaceDef {
    /// Keyspace name, unique on the node.
    pub name: String,
    /// Replication strategy of the keyspace.
    #[serde(default)]
    pub replication: ReplicationStrategy,
    /// Tables of the keyspace.
    #[serde(default)]
    pub tables: Vec<TableDef>,
}

/// The full schema file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDef {
    /// Keyspaces stored on the node.
    #[serde(default)]
    pub keyspaces: Vec<KeyspaceDef>,
}

/// `GET /api/health` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiHealth {
    /// Whether the server is healthy.
    pub healthy: bool,
    /// Server version.
    pub version: String,
}

/// Query parameters for `GET /api/keyspaces`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyspacesQueryParams {
    /// Which keyspaces to list.
    #[serde(default)]
    pub set: KeyspaceSet,
}

/// Query parameters for `GET /api/cleanup/progress`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressQueryParams {
    /// Keyspace the operator asked about.
    pub keyspace: Option<String>,
}

/// `POST /api/cleanup` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiStartCleanup {
    /// Keyspace to clean up.
    pub keyspace: String,
    /// Tables to clean up; empty means every table of the keyspace.
    #[serde(default)]
    pub tables: Vec<String>,
    /// Concurrency hint; `0` means one per available CPU.
    #[serde(default)]
    pub jobs: usize,
}

/// `POST /api/cleanup` response body when the job was accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCleanupAccepted {
    /// Identifier of the accepted job, matched against [`ApiJobOutcome`].
    pub job_id: u64,
    /// Tables the job will process, in processing order.
    pub tables: Vec<TableRef>,
}

/// How a finished job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiJobResult {
    /// Every table was cleaned up.
    #[serde(rename_all = "camelCase")]
    Succeeded {
        /// Number of tables processed.
        tables: usize,
        /// Number of segments rewritten.
        segments: u64,
        /// Wall-clock duration of the job in milliseconds.
        elapsed_ms: u64,
    },
    /// The job was aborted.
    Failed {
        /// Description of the failure.
        error: String,
    },
}

/// `GET /api/cleanup/last` response: the outcome of the most recent job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiJobOutcome {
    /// Identifier of the job.
    pub job_id: u64,
    /// Keyspace the job cleaned up.
    pub keyspace: String,
    /// How it ended.
    #[serde(flatten)]
    pub result: ApiJobResult,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Human-readable description.
    pub error: String,
}
