//! Validated node schema loaded from a TOML file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use keysweep_node_models::{KeyspaceSet, ReplicationStrategy, SchemaDef};
use keysweep_progress_models::{TableId, TableRef};

use crate::NodeError;

/// Errors that can occur while loading a schema file.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The schema file could not be read.
    #[error("Failed to read schema {}: {source}", .path.display())]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The schema file is not valid TOML for a [`SchemaDef`].
    #[error("Failed to parse schema: {0}")]
    Parse(#[from] toml::de::Error),

    /// Two keyspaces share a name.
    #[error("Keyspace {0} is declared more than once")]
    DuplicateKeyspace(String),

    /// Two tables of one keyspace share a name or two tables share an id.
    #[error("Table {table} of keyspace {keyspace} is declared more than once")]
    DuplicateTable {
        /// Keyspace of the duplicate.
        keyspace: String,
        /// Name of the duplicate table.
        table: String,
    },
}

/// A table of the schema with its resolved id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    /// Keyspace, name and id of the table.
    pub table: TableRef,
    /// Segment count reported by the simulated engine.
    pub segments: u64,
}

/// A keyspace of the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    /// Keyspace name.
    pub name: String,
    /// Replication strategy.
    pub replication: ReplicationStrategy,
    /// Tables in declaration order.
    pub tables: Vec<Table>,
}

/// The keyspaces and tables stored on a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    keyspaces: Vec<Keyspace>,
}

impl Schema {
    /// Reads and validates the schema file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the file cannot be read, parsed, or
    /// declares a keyspace or table twice.
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let contents = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let schema = Self::from_toml(&contents)?;
        log::debug!(
            "Loaded schema {} with {} keyspace(s)",
            path.display(),
            schema.keyspaces.len()
        );
        Ok(schema)
    }

    /// Parses and validates a schema from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the text is not a valid schema.
    pub fn from_toml(contents: &str) -> Result<Self, SchemaError> {
        Self::try_from(toml::from_str::<SchemaDef>(contents)?)
    }

    /// Every keyspace, in declaration order.
    #[must_use]
    pub fn all_keyspaces(&self) -> &[Keyspace] {
        &self.keyspaces
    }

    /// Names of the keyspaces in `set`, in declaration order.
    #[must_use]
    pub fn keyspace_names(&self, set: KeyspaceSet) -> Vec<String> {
        self.keyspaces
            .iter()
            .filter(|keyspace| set.includes(keyspace.replication))
            .map(|keyspace| keyspace.name.clone())
            .collect()
    }

    /// Looks up a keyspace by name.
    #[must_use]
    pub fn keyspace(&self, name: &str) -> Option<&Keyspace> {
        self.keyspaces.iter().find(|keyspace| keyspace.name == name)
    }

    /// Resolves table names of `keyspace` to tables. An empty `names`
    /// selects every table; repeated names are kept once.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::UnknownKeyspace`] or [`NodeError::UnknownTable`]
    /// if a name does not exist in the schema.
    pub fn resolve_tables(&self, keyspace: &str, names: &[String]) -> Result<Vec<&Table>, NodeError> {
        let keyspace = self
            .keyspace(keyspace)
            .ok_or_else(|| NodeError::UnknownKeyspace(keyspace.to_string()))?;

        if names.is_empty() {
            return Ok(keyspace.tables.iter().collect());
        }

        let mut resolved: Vec<&Table> = Vec::with_capacity(names.len());
        for name in names {
            let table = keyspace
                .tables
                .iter()
                .find(|table| table.table.name == *name)
                .ok_or_else(|| NodeError::UnknownTable {
                    keyspace: keyspace.name.clone(),
                    table: name.clone(),
                })?;
            if !resolved.iter().any(|seen| seen.table.id == table.table.id) {
                resolved.push(table);
            }
        }
        Ok(resolved)
    }
}

impl TryFrom<SchemaDef> for Schema {
    type Error = SchemaError;

    fn try_from(def: SchemaDef) -> Result<Self, Self::Error> {
        let mut keyspace_names = HashSet::new();
        let mut table_ids = HashSet::new();
        let mut keyspaces = Vec::with_capacity(def.keyspaces.len());

        for keyspace in def.keyspaces {
            if !keyspace_names.insert(keyspace.name.clone()) {
                return Err(SchemaError::DuplicateKeyspace(keyspace.name));
            }

            let mut table_names = HashSet::new();
            let mut tables = Vec::with_capacity(keyspace.tables.len());
            for table in keyspace.tables {
                let id = table.id.map_or_else(TableId::random, TableId::new);
                if !table_names.insert(table.name.clone()) || !table_ids.insert(id) {
                    return Err(SchemaError::DuplicateTable {
                        keyspace: keyspace.name,
                        table: table.name,
                    });
                }
                tables.push(Table {
                    table: TableRef {
                        keyspace: keyspace.name.clone(),
                        name: table.name,
                        id,
                    },
                    segments: table.segments,
                });
            }

            keyspaces.push(Keyspace {
                name: keyspace.name,
                replication: keyspace.replication,
                tables,
            });
        }

        Ok(Self { keyspaces })
    }
}
