#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Operator command line for keysweep nodes.
//!
//! Uses `indicatif-log-bridge` (via [`keysweep_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and progress bars never fight for the terminal.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use keysweep_cli::{CleanupCommand, run_cleanup};
use keysweep_cli_utils::IndicatifOutput;
use keysweep_node::{
    HttpNode, LocalNode, ManagementClient, Schema, schema_path_from_env, segment_delay_from_env,
};

#[derive(Parser)]
#[command(name = "keysweep", about = "Operator tool for keysweep nodes")]
struct Cli {
    /// Management server to talk to (e.g. `http://127.0.0.1:7199`). When
    /// unset, an in-process node is built from the schema file.
    #[arg(long, env = "KEYSWEEP_NODE", global = true)]
    node: Option<String>,
    /// Schema file for the in-process node
    #[arg(long, env = "KEYSWEEP_SCHEMA", global = true)]
    schema: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Triggers the immediate cleanup of keys no longer belonging to a node.
    /// By default, clean all keyspaces
    Cleanup {
        /// Number of sstables to clean up simultaneously, set to 0 to use all
        /// available workers
        #[arg(short, long, default_value_t = 2)]
        jobs: usize,
        /// If a cleanup is taking place, show the current amount of sstables
        /// cleaned up
        #[arg(short, long)]
        status: bool,
        /// The keyspace to clean up
        keyspace: Option<String>,
        /// Tables of the keyspace
        tables: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = keysweep_cli_utils::init_logger();
    let cli = Cli::parse();

    let client: Box<dyn ManagementClient> = if let Some(url) = cli.node {
        log::debug!("Using management server at {url}");
        Box::new(HttpNode::new(&url))
    } else {
        let path = cli.schema.unwrap_or_else(schema_path_from_env);
        Box::new(LocalNode::simulated(
            Schema::load(&path)?,
            segment_delay_from_env(),
        ))
    };

    match cli.command {
        Commands::Cleanup {
            jobs,
            status,
            keyspace,
            tables,
        } => {
            let command = CleanupCommand {
                jobs,
                status,
                keyspace,
                tables,
            };
            run_cleanup(
                client.as_ref(),
                &command,
                IndicatifOutput::new(&multi),
                &mut std::io::stdout(),
                &mut std::io::stderr(),
            )
            .await?;
        }
    }

    Ok(())
}
