//! Cleanup engine that pretends to rewrite segments.
//!
//! Segment counts come from the schema file; each rewrite just sleeps. It
//! lets the whole management path (job start, progress polling, output
//! rendering) run without a storage engine behind it.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use keysweep_cleanup::{EngineError, Segment, SegmentRewriter};
use keysweep_progress_models::{TableId, TableRef};

use crate::Schema;

/// Size reported for every simulated segment.
const SEGMENT_SIZE_BYTES: u64 = 160 * 1024 * 1024;

/// [`SegmentRewriter`] backed by the segment counts of a [`Schema`].
#[derive(Debug, Clone)]
pub struct SimulatedRewriter {
    segments: HashMap<TableId, u64>,
    delay: Duration,
}

impl SimulatedRewriter {
    /// Creates a rewriter reporting the schema's segment counts and taking
    /// `delay` per segment.
    #[must_use]
    pub fn new(schema: &Schema, delay: Duration) -> Self {
        let segments = schema
            .all_keyspaces()
            .iter()
            .flat_map(|keyspace| &keyspace.tables)
            .map(|table| (table.table.id, table.segments))
            .collect();
        Self { segments, delay }
    }
}

#[async_trait]
impl SegmentRewriter for SimulatedRewriter {
    async fn segments(&self, table: &TableRef) -> Result<Vec<Segment>, EngineError> {
        let count = self
            .segments
            .get(&table.id)
            .ok_or_else(|| EngineError::MissingTable {
                table: table.to_string(),
            })?;
        Ok((1..=*count)
            .map(|generation| Segment {
                generation,
                size_bytes: SEGMENT_SIZE_BYTES,
            })
            .collect())
    }

    async fn rewrite(&self, table: &TableRef, segment: Segment) -> Result<(), EngineError> {
        log::trace!("Rewriting {segment} of {table}");
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_schema_segment_counts() {
        let schema = Schema::from_toml(
            r#"
            [[keyspaces]]
            name = "shop"
            [[keyspaces.tables]]
            name = "orders"
            segments = 4
            "#,
        )
        .unwrap();
        let rewriter = SimulatedRewriter::new(&schema, Duration::ZERO);
        let orders = &schema.keyspace("shop").unwrap().tables[0].table;

        let segments = rewriter.segments(orders).await.unwrap();
        assert_eq!(
            segments.iter().map(|s| s.generation).collect::<Vec<_>>(),
            [1, 2, 3, 4]
        );
        rewriter.rewrite(orders, segments[0]).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_table_is_missing() {
        let rewriter = SimulatedRewriter::new(&Schema::default(), Duration::ZERO);
        let table = TableRef {
            keyspace: "shop".to_string(),
            name: "ghost".to_string(),
            id: TableId::random(),
        };
        assert!(matches!(
            rewriter.segments(&table).await,
            Err(EngineError::MissingTable { .. })
        ));
    }
}
