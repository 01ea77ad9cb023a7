#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared CLI utilities for keysweep.
//!
//! Provides `indicatif`-backed rendering of cleanup jobs behind the
//! [`CleanupOutput`] trait, plus [`init_logger`] which sets up
//! `indicatif-log-bridge` so that `log::info!` and friends are suspended
//! while progress bars redraw.
//!
//! Any binary that calls [`init_logger()`] at startup gets full progress bar
//! support for free.

use std::sync::{Arc, Mutex, PoisonError};

use indicatif::{ProgressBar, ProgressStyle};
use keysweep_cleanup::{CleanupOutput, CleanupSummary};
use keysweep_progress_models::TableRef;

pub use indicatif::MultiProgress;

/// Renders a cleanup job as `indicatif` progress bars: one bar counting
/// tables for the whole job and one bar counting segments for the table
/// being cleaned up.
pub struct IndicatifOutput {
    multi: MultiProgress,
    tables: Mutex<Option<ProgressBar>>,
    segments: Mutex<Option<ProgressBar>>,
}

impl IndicatifOutput {
    /// Creates an output adding its bars to `multi`.
    #[must_use]
    pub fn new(multi: &MultiProgress) -> Arc<dyn CleanupOutput> {
        Arc::new(Self {
            multi: multi.clone(),
            tables: Mutex::new(None),
            segments: Mutex::new(None),
        })
    }

    fn tables_bar(multi: &MultiProgress, keyspace: &str, total: u64) -> ProgressBar {
        let bar = multi.add(ProgressBar::new(total));
        bar.set_style(
            ProgressStyle::with_template(
                "{msg} {wide_bar:.green/dim} {pos}/{len} tables [{elapsed_precise}]",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
        );
        bar.set_message(format!("Cleaning up {keyspace}"));
        bar
    }

    fn segments_bar(multi: &MultiProgress, table: &TableRef, total: u64) -> ProgressBar {
        let bar = multi.add(ProgressBar::new(total));
        bar.set_style(
            ProgressStyle::with_template(
                "  {msg} {wide_bar:.cyan/dim} {pos}/{len} sstables {percent}% [{eta}]",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
        );
        bar.set_message(table.to_string());
        bar
    }
}

fn slot(bar: &Mutex<Option<ProgressBar>>) -> std::sync::MutexGuard<'_, Option<ProgressBar>> {
    bar.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CleanupOutput for IndicatifOutput {
    fn job_started(&self, keyspace: &str, tables: usize) {
        let bar = Self::tables_bar(&self.multi, keyspace, tables as u64);
        if let Some(previous) = slot(&self.tables).replace(bar) {
            previous.finish_and_clear();
        }
    }

    fn table_started(&self, table: &TableRef, segments: u64) {
        let bar = Self::segments_bar(&self.multi, table, segments);
        if let Some(previous) = slot(&self.segments).replace(bar) {
            previous.finish_and_clear();
        }
    }

    fn segment_completed(&self, _table: &TableRef, completed: u64, _total: u64) {
        if let Some(bar) = slot(&self.segments).as_ref() {
            bar.set_position(completed);
        }
    }

    fn table_completed(&self, table: &TableRef) {
        if let Some(bar) = slot(&self.segments).take() {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
        if let Some(bar) = slot(&self.tables).as_ref() {
            bar.inc(1);
            bar.set_message(format!("Cleaned up {table}"));
        }
    }

    fn finished(&self, summary: &CleanupSummary) {
        if let Some(bar) = slot(&self.tables).take() {
            bar.finish_with_message(summary.to_string());
        }
    }
}

/// Initializes the global logger wrapped in `indicatif-log-bridge` so that
/// `log::info!` and friends are suspended while progress bars redraw.
///
/// Returns the [`MultiProgress`] that all progress bars must be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok(); // already set in tests

    log::set_max_level(level);

    multi
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use indicatif::ProgressDrawTarget;
    use keysweep_progress_models::TableId;

    use super::*;

    fn table(name: &str) -> TableRef {
        TableRef {
            keyspace: "shop".to_string(),
            name: name.to_string(),
            id: TableId::random(),
        }
    }

    fn output() -> IndicatifOutput {
        IndicatifOutput {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
            tables: Mutex::new(None),
            segments: Mutex::new(None),
        }
    }

    #[test]
    fn bars_follow_the_job() {
        let output = output();
        let orders = table("orders");

        output.job_started("shop", 2);
        output.table_started(&orders, 4);
        output.segment_completed(&orders, 3, 4);
        assert_eq!(slot(&output.segments).as_ref().unwrap().position(), 3);

        output.table_completed(&orders);
        assert!(slot(&output.segments).is_none());
        assert_eq!(slot(&output.tables).as_ref().unwrap().position(), 1);

        output.finished(&CleanupSummary {
            keyspace: "shop".to_string(),
            tables: 2,
            segments: 4,
            elapsed: Duration::from_secs(1),
        });
        assert!(slot(&output.tables).is_none());
    }

    #[test]
    fn events_before_job_start_are_ignored() {
        let output = output();
        let orders = table("orders");
        output.segment_completed(&orders, 1, 1);
        output.table_completed(&orders);
        assert!(slot(&output.tables).is_none());
    }
}
