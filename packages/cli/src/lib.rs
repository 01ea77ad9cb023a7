#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! The `cleanup` operator command.
//!
//! Triggers the cleanup of keys no longer belonging to a node, or with
//! `--status` reports the progress of the cleanup already running. The
//! command talks to the node only through [`ManagementClient`], so the
//! same logic drives an in-process node and a remote management server.

use std::io::Write;
use std::ops::ControlFlow;
use std::sync::Arc;

use keysweep_cleanup::CleanupOutput;
use keysweep_node::{ManagementClient, TransportError};
use keysweep_node_models::{KeyspaceSet, is_local_system_keyspace};
use keysweep_progress_models::Snapshot;

/// Printed on stderr when a status request finds no running job.
pub const NOT_RUNNING_MESSAGE: &str =
    "Cleanup process not running, must be running to fetch status";

/// Errors that terminate the `cleanup` command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The node's keyspaces could not be listed.
    #[error("Failed to list keyspaces: {0}")]
    Keyspaces(#[source] TransportError),

    /// Starting or polling the cleanup of a keyspace failed.
    #[error("Error occurred during cleanup of keyspace {keyspace}: {source}")]
    Keyspace {
        /// Keyspace being processed.
        keyspace: String,
        /// Underlying failure.
        #[source]
        source: TransportError,
    },

    /// Writing to the terminal failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Parsed arguments of the `cleanup` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupCommand {
    /// Segments to rewrite concurrently; `0` uses every available worker.
    pub jobs: usize,
    /// Poll the running job instead of starting one.
    pub status: bool,
    /// Keyspace to process; every non-local keyspace when `None`.
    pub keyspace: Option<String>,
    /// Tables of the keyspace; every table when empty.
    pub tables: Vec<String>,
}

impl Default for CleanupCommand {
    fn default() -> Self {
        Self {
            jobs: 2,
            status: false,
            keyspace: None,
            tables: Vec::new(),
        }
    }
}

/// Runs the `cleanup` command against `client`.
///
/// Status maps go to `out`; notices go to `err`. In status mode, a
/// keyspace with no running job stops the iteration without failing the
/// command.
///
/// # Errors
///
/// Returns [`CommandError`] on the first keyspace that cannot be started
/// or polled.
pub async fn run_cleanup<W: Write, E: Write>(
    client: &dyn ManagementClient,
    command: &CleanupCommand,
    output: Arc<dyn CleanupOutput>,
    out: &mut W,
    err: &mut E,
) -> Result<(), CommandError> {
    let keyspaces = match &command.keyspace {
        Some(keyspace) => vec![keyspace.clone()],
        None => client
            .keyspaces(KeyspaceSet::NonLocal)
            .await
            .map_err(CommandError::Keyspaces)?,
    };

    for keyspace in keyspaces {
        if is_local_system_keyspace(&keyspace) {
            log::debug!("Skipping local system keyspace {keyspace}");
            continue;
        }

        let flow = if command.status {
            poll_keyspace(client, &keyspace, out, err).await
        } else {
            writeln!(
                err,
                "Cleanup process running without status flag, starting keyspace cleanup..."
            )?;
            client
                .start_job(output.clone(), command.jobs, &keyspace, &command.tables)
                .await
                .map(|()| ControlFlow::Continue(()))
                .map_err(PollError::Transport)
        };

        match flow {
            Ok(ControlFlow::Continue(())) => {}
            Ok(ControlFlow::Break(())) => break,
            Err(PollError::Io(e)) => return Err(e.into()),
            Err(PollError::Transport(source)) => {
                return Err(CommandError::Keyspace { keyspace, source });
            }
        }
    }

    Ok(())
}

enum PollError {
    Io(std::io::Error),
    Transport(TransportError),
}

async fn poll_keyspace<W: Write, E: Write>(
    client: &dyn ManagementClient,
    keyspace: &str,
    out: &mut W,
    err: &mut E,
) -> Result<ControlFlow<()>, PollError> {
    let Some(map) = client
        .get_progress(keyspace)
        .await
        .map_err(PollError::Transport)?
    else {
        writeln!(err, "{NOT_RUNNING_MESSAGE}").map_err(PollError::Io)?;
        return Ok(ControlFlow::Break(()));
    };

    let snapshot = Snapshot::from_status_map(&map)
        .map_err(|e| PollError::Transport(TransportError::Status(e)))?;
    writeln!(
        err,
        "Cleanup process running with status flag, fetching progress..."
    )
    .map_err(PollError::Io)?;
    writeln!(out, "{snapshot}").map_err(PollError::Io)?;
    Ok(ControlFlow::Continue(()))
}
