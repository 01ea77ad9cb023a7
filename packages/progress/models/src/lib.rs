#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Cleanup progress snapshot and status types.
//!
//! A [`Snapshot`] is the immutable, point-in-time projection of a running
//! cleanup job. It is what crosses the boundary to pollers, either directly
//! or rendered as a [`StatusMap`] of fixed string keys.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status map key for the full list of target tables.
pub const TABLES_TO_CLEAN_UP: &str = "tablesToCleanUp";
/// Status map key for the tables finished so far, in completion order.
pub const TABLES_COMPLETED: &str = "tablesCompleted";
/// Status map key for the segment count of the current table.
pub const SSTABLES_TO_CLEAN_UP: &str = "sstablesToCleanUp";
/// Status map key for the segments of the current table already rewritten.
pub const SSTABLES_COMPLETED: &str = "sstablesCompleted";
/// Status map key for the table currently being processed.
pub const CURRENT_TABLE_ID: &str = "currentTableId";

/// Rendered value of [`CURRENT_TABLE_ID`] when no table is in progress.
pub const NO_CURRENT_TABLE: &str = "";

/// Every key a [`StatusMap`] carries, in display order.
pub const STATUS_KEYS: [&str; 5] = [
    TABLES_TO_CLEAN_UP,
    TABLES_COMPLETED,
    SSTABLES_TO_CLEAN_UP,
    SSTABLES_COMPLETED,
    CURRENT_TABLE_ID,
];

/// String rendering of a [`Snapshot`], keyed by the `*_CLEAN_UP` /
/// `*_COMPLETED` / [`CURRENT_TABLE_ID`] constants.
pub type StatusMap = BTreeMap<String, String>;

/// Identifier of a table within the node's schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(Uuid);

impl TableId {
    /// Wraps an existing UUID.
    #[must_use]
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generates a fresh random table id.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for TableId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TableId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A table named by its keyspace, name and schema id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    /// Keyspace the table belongs to.
    pub keyspace: String,
    /// Table name within the keyspace.
    pub name: String,
    /// Schema id of the table.
    pub id: TableId,
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.keyspace, self.name)
    }
}

/// Errors raised when reading a [`Snapshot`] back out of a [`StatusMap`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusMapError {
    /// A required key was absent.
    #[error("Status map is missing key '{0}'")]
    MissingKey(&'static str),

    /// A value could not be parsed.
    #[error("Status map key '{key}' has invalid value '{value}'")]
    InvalidValue {
        /// Key whose value was malformed.
        key: &'static str,
        /// The offending value.
        value: String,
    },
}

/// Immutable projection of a cleanup job's progress.
///
/// Two snapshots are equal iff every field is equal, which is what pollers
/// use to detect "no change since the last poll".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Every table the job must process, in the order the job was given them.
    pub tables_to_clean_up: Vec<TableId>,
    /// Tables already finished, in completion order.
    pub tables_completed: Vec<TableId>,
    /// Segment count of the current table; `0` when no table is in progress.
    pub sstables_to_clean_up: u64,
    /// Segments of the current table already rewritten.
    pub sstables_completed: u64,
    /// Table currently being processed.
    pub current_table: Option<TableId>,
}

impl Snapshot {
    /// Whether every target table has been completed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.current_table.is_none() && self.tables_completed.len() == self.tables_to_clean_up.len()
    }

    /// Target tables not yet completed, current table included.
    #[must_use]
    pub fn tables_remaining(&self) -> usize {
        self.tables_to_clean_up
            .len()
            .saturating_sub(self.tables_completed.len())
    }

    /// Renders the snapshot with the fixed status keys.
    #[must_use]
    pub fn to_status_map(&self) -> StatusMap {
        let mut map = StatusMap::new();
        map.insert(
            TABLES_TO_CLEAN_UP.to_string(),
            join_ids(&self.tables_to_clean_up),
        );
        map.insert(TABLES_COMPLETED.to_string(), join_ids(&self.tables_completed));
        map.insert(
            SSTABLES_TO_CLEAN_UP.to_string(),
            self.sstables_to_clean_up.to_string(),
        );
        map.insert(
            SSTABLES_COMPLETED.to_string(),
            self.sstables_completed.to_string(),
        );
        map.insert(
            CURRENT_TABLE_ID.to_string(),
            self.current_table
                .map_or_else(|| NO_CURRENT_TABLE.to_string(), |id| id.to_string()),
        );
        map
    }

    /// Parses a snapshot previously rendered with [`Self::to_status_map`].
    ///
    /// # Errors
    ///
    /// Returns [`StatusMapError`] if a key is missing or a value is malformed.
    pub fn from_status_map(map: &StatusMap) -> Result<Self, StatusMapError> {
        let current = lookup(map, CURRENT_TABLE_ID)?;
        let current_table = if current == NO_CURRENT_TABLE {
            None
        } else {
            Some(parse_id(CURRENT_TABLE_ID, current)?)
        };

        Ok(Self {
            tables_to_clean_up: split_ids(TABLES_TO_CLEAN_UP, lookup(map, TABLES_TO_CLEAN_UP)?)?,
            tables_completed: split_ids(TABLES_COMPLETED, lookup(map, TABLES_COMPLETED)?)?,
            sstables_to_clean_up: parse_count(
                SSTABLES_TO_CLEAN_UP,
                lookup(map, SSTABLES_TO_CLEAN_UP)?,
            )?,
            sstables_completed: parse_count(SSTABLES_COMPLETED, lookup(map, SSTABLES_COMPLETED)?)?,
            current_table,
        })
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map = self.to_status_map();
        for (i, key) in STATUS_KEYS.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{key}={}", map.get(*key).map_or("", String::as_str))?;
        }
        Ok(())
    }
}

/// Outcome of a status request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "progress", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressStatus {
    /// A job is tracked; here is its current progress.
    Running(Snapshot),
    /// No job is tracked on the node.
    NotRunning,
}

impl ProgressStatus {
    /// Returns the snapshot if a job is running.
    #[must_use]
    pub const fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            Self::Running(snapshot) => Some(snapshot),
            Self::NotRunning => None,
        }
    }
}

impl From<Option<Snapshot>> for ProgressStatus {
    fn from(snapshot: Option<Snapshot>) -> Self {
        snapshot.map_or(Self::NotRunning, Self::Running)
    }
}

fn join_ids(ids: &[TableId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn lookup<'a>(map: &'a StatusMap, key: &'static str) -> Result<&'a str, StatusMapError> {
    map.get(key)
        .map(String::as_str)
        .ok_or(StatusMapError::MissingKey(key))
}

fn parse_id(key: &'static str, value: &str) -> Result<TableId, StatusMapError> {
    value.trim().parse().map_err(|_| StatusMapError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn split_ids(key: &'static str, value: &str) -> Result<Vec<TableId>, StatusMapError> {
    if value.is_empty() {
        return Ok(Vec::new());
    }
    value.split(',').map(|id| parse_id(key, id)).collect()
}

fn parse_count(key: &'static str, value: &str) -> Result<u64, StatusMapError> {
    value.parse().map_err(|_| StatusMapError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u128) -> TableId {
        TableId::new(Uuid::from_u128(n))
    }

    fn in_progress() -> Snapshot {
        Snapshot {
            tables_to_clean_up: vec![id(2), id(1), id(3)],
            tables_completed: vec![id(2)],
            sstables_to_clean_up: 7,
            sstables_completed: 4,
            current_table: Some(id(1)),
        }
    }

    #[test]
    fn status_map_has_every_key() {
        let map = in_progress().to_status_map();
        for key in STATUS_KEYS {
            assert!(map.contains_key(key), "missing {key}");
        }
        assert_eq!(map.len(), STATUS_KEYS.len());
    }

    #[test]
    fn status_map_keeps_insertion_order_of_tables() {
        let map = in_progress().to_status_map();
        assert_eq!(
            map[TABLES_TO_CLEAN_UP],
            format!("{},{},{}", id(2), id(1), id(3))
        );
        assert_eq!(map[TABLES_COMPLETED], id(2).to_string());
        assert_eq!(map[SSTABLES_TO_CLEAN_UP], "7");
        assert_eq!(map[SSTABLES_COMPLETED], "4");
        assert_eq!(map[CURRENT_TABLE_ID], id(1).to_string());
    }

    #[test]
    fn idle_snapshot_renders_empty_current_table() {
        let snapshot = Snapshot {
            tables_to_clean_up: vec![id(1)],
            tables_completed: Vec::new(),
            sstables_to_clean_up: 0,
            sstables_completed: 0,
            current_table: None,
        };
        let map = snapshot.to_status_map();
        assert_eq!(map[CURRENT_TABLE_ID], NO_CURRENT_TABLE);
        assert_eq!(map[TABLES_COMPLETED], "");
        assert!(!snapshot.is_finished());
        assert_eq!(snapshot.tables_remaining(), 1);
    }

    #[test]
    fn parses_rendered_status_map() {
        let snapshot = in_progress();
        let parsed = Snapshot::from_status_map(&snapshot.to_status_map()).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn rejects_malformed_status_map() {
        let mut map = in_progress().to_status_map();
        map.insert(SSTABLES_COMPLETED.to_string(), "many".to_string());
        assert_eq!(
            Snapshot::from_status_map(&map),
            Err(StatusMapError::InvalidValue {
                key: SSTABLES_COMPLETED,
                value: "many".to_string(),
            })
        );

        map.remove(CURRENT_TABLE_ID);
        assert_eq!(
            Snapshot::from_status_map(&map),
            Err(StatusMapError::MissingKey(CURRENT_TABLE_ID))
        );
    }

    #[test]
    fn display_lists_keys_in_fixed_order() {
        let rendered = in_progress().to_string();
        let keys: Vec<&str> = rendered
            .lines()
            .map(|line| line.split('=').next().unwrap())
            .collect();
        assert_eq!(keys, STATUS_KEYS);
    }

    #[test]
    fn status_serializes_with_state_tag() {
        let json = serde_json::to_value(ProgressStatus::NotRunning).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "NOT_RUNNING" }));

        let running = ProgressStatus::from(Some(in_progress()));
        assert_eq!(running.snapshot(), Some(&in_progress()));
    }
}
