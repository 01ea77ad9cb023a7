//! [`ManagementClient`] for a node hosted by the management server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use keysweep_cleanup::{CleanupOutput, CleanupSummary};
use keysweep_node_models::{
    ApiCleanupAccepted, ApiError, ApiJobOutcome, ApiJobResult, ApiStartCleanup, KeyspaceSet,
};
use keysweep_progress_models::{Snapshot, StatusMap, TableId, TableRef};
use reqwest::StatusCode;

use crate::{ManagementClient, TransportError};

/// How often [`HttpNode::start_job`] polls for progress by default.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Client for the management server's JSON API.
#[derive(Debug, Clone)]
pub struct HttpNode {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
}

impl HttpNode {
    /// Creates a client for the server at `base_url` (e.g.
    /// `http://127.0.0.1:7199`).
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets how often a started job is polled for progress.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn last_outcome(&self) -> Result<Option<ApiJobOutcome>, TransportError> {
        let response = self.client.get(self.url("/api/cleanup/last")).send().await?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            _ => Err(rejected(response).await),
        }
    }
}

#[async_trait]
impl ManagementClient for HttpNode {
    async fn keyspaces(&self, set: KeyspaceSet) -> Result<Vec<String>, TransportError> {
        let response = self
            .client
            .get(self.url("/api/keyspaces"))
            .query(&[("set", set.to_string())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        Ok(response.json().await?)
    }

    async fn get_progress(&self, keyspace: &str) -> Result<Option<StatusMap>, TransportError> {
        let response = self
            .client
            .get(self.url("/api/cleanup/progress"))
            .query(&[("keyspace", keyspace)])
            .send()
            .await?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            _ => Err(rejected(response).await),
        }
    }

    async fn start_job(
        &self,
        output: Arc<dyn CleanupOutput>,
        jobs: usize,
        keyspace: &str,
        tables: &[String],
    ) -> Result<(), TransportError> {
        let started = Instant::now();
        let response = self
            .client
            .post(self.url("/api/cleanup"))
            .json(&ApiStartCleanup {
                keyspace: keyspace.to_string(),
                tables: tables.to_vec(),
                jobs,
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        let accepted: ApiCleanupAccepted = response.json().await?;
        log::debug!(
            "Node accepted cleanup job {} for keyspace {keyspace}",
            accepted.job_id
        );

        output.job_started(keyspace, accepted.tables.len());
        let mut follower = ProgressFollower::new(&accepted.tables);

        let mut lost_polls = 0;
        loop {
            let last = self.last_outcome().await?;
            match last {
                Some(outcome) if outcome.job_id == accepted.job_id => {
                    return match outcome.result {
                        ApiJobResult::Succeeded {
                            tables, segments, ..
                        } => {
                            follower.complete_all(output.as_ref());
                            output.finished(&CleanupSummary {
                                keyspace: outcome.keyspace,
                                tables,
                                segments,
                                elapsed: started.elapsed(),
                            });
                            Ok(())
                        }
                        ApiJobResult::Failed { error } => Err(TransportError::JobFailed {
                            keyspace: outcome.keyspace,
                            message: error,
                        }),
                    };
                }
                Some(outcome) if outcome.job_id > accepted.job_id => {
                    return Err(job_lost(
                        keyspace,
                        accepted.job_id,
                        &format!("job {} ended after it", outcome.job_id),
                    ));
                }
                _ => {}
            }

            match self.get_progress(keyspace).await? {
                Some(map) => {
                    lost_polls = 0;
                    follower.observe(&Snapshot::from_status_map(&map)?, output.as_ref());
                }
                None => {
                    // The job may end between the two requests, so only a
                    // repeated miss counts.
                    lost_polls += 1;
                    if lost_polls >= LOST_POLL_LIMIT {
                        return Err(job_lost(
                            keyspace,
                            accepted.job_id,
                            "node reports neither progress nor an outcome",
                        ));
                    }
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Consecutive polls without progress or an outcome before a started job
/// is given up on.
const LOST_POLL_LIMIT: u32 = 2;

fn job_lost(keyspace: &str, job_id: u64, reason: &str) -> TransportError {
    log::warn!("Lost track of cleanup job {job_id} for keyspace {keyspace}: {reason}");
    TransportError::JobFailed {
        keyspace: keyspace.to_string(),
        message: format!("job {job_id} lost: {reason}"),
    }
}

async fn rejected(response: reqwest::Response) -> TransportError {
    let status = response.status().as_u16();
    let message = match response.json::<ApiError>().await {
        Ok(body) => body.error,
        Err(_) => format!("unexpected HTTP status {status}"),
    };
    TransportError::Rejected { status, message }
}

/// Turns successive snapshots of a remote job into [`CleanupOutput`]
/// events, so a polled job renders like a local one.
struct ProgressFollower {
    tables: HashMap<TableId, TableRef>,
    order: Vec<TableId>,
    started: Vec<TableId>,
    completed: Vec<TableId>,
    current: Option<(TableId, u64, u64)>,
}

impl ProgressFollower {
    fn new(tables: &[TableRef]) -> Self {
        Self {
            tables: tables.iter().map(|t| (t.id, t.clone())).collect(),
            order: tables.iter().map(|t| t.id).collect(),
            started: Vec::new(),
            completed: Vec::new(),
            current: None,
        }
    }

    fn observe(&mut self, snapshot: &Snapshot, output: &dyn CleanupOutput) {
        if snapshot.tables_to_clean_up != self.order {
            log::trace!("Ignoring progress of a job with different target tables");
            return;
        }

        for id in &snapshot.tables_completed {
            self.complete(*id, output);
        }

        if let Some(id) = snapshot.current_table {
            let Some(table) = self.tables.get(&id) else {
                return;
            };
            let total = snapshot.sstables_to_clean_up;
            if !self.started.contains(&id) {
                self.started.push(id);
                output.table_started(table, total);
            }
            let seen = self
                .current
                .filter(|(current, ..)| *current == id)
                .map_or(0, |(.., done)| done);
            for completed in (seen + 1)..=snapshot.sstables_completed {
                output.segment_completed(table, completed, total);
            }
            self.current = Some((id, total, snapshot.sstables_completed.max(seen)));
        }
    }

    fn complete_all(&mut self, output: &dyn CleanupOutput) {
        for id in self.order.clone() {
            self.complete(id, output);
        }
    }

    fn complete(&mut self, id: TableId, output: &dyn CleanupOutput) {
        if self.completed.contains(&id) {
            return;
        }
        let Some(table) = self.tables.get(&id) else {
            return;
        };

        if self.started.contains(&id) {
            if let Some((current, total, done)) =
                self.current.filter(|(current, ..)| *current == id)
            {
                for completed in (done + 1)..=total {
                    output.segment_completed(table, completed, total);
                }
                log::trace!("Table {current} finished between polls");
                self.current = None;
            }
        } else {
            self.started.push(id);
            output.table_started(table, 0);
        }

        self.completed.push(id);
        output.table_completed(table);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use actix_web::{App, HttpResponse, HttpServer, web};
    use keysweep_cleanup::null_output;
    use uuid::Uuid;

    use super::*;

    fn table(n: u128, name: &str) -> TableRef {
        TableRef {
            keyspace: "shop".to_string(),
            name: name.to_string(),
            id: TableId::new(Uuid::from_u128(n)),
        }
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    impl CleanupOutput for Events {
        fn job_started(&self, _keyspace: &str, _tables: usize) {}

        fn table_started(&self, table: &TableRef, segments: u64) {
            self.0
                .lock()
                .unwrap()
                .push(format!("start {} {segments}", table.name));
        }

        fn segment_completed(&self, table: &TableRef, completed: u64, total: u64) {
            self.0
                .lock()
                .unwrap()
                .push(format!("segment {} {completed}/{total}", table.name));
        }

        fn table_completed(&self, table: &TableRef) {
            self.0.lock().unwrap().push(format!("done {}", table.name));
        }

        fn finished(&self, _summary: &CleanupSummary) {}
    }

    #[test]
    fn follower_fills_in_progress_missed_between_polls() {
        let orders = table(1, "orders");
        let carts = table(2, "carts");
        let mut follower = ProgressFollower::new(&[orders.clone(), carts.clone()]);
        let events = Events::default();

        follower.observe(
            &Snapshot {
                tables_to_clean_up: vec![orders.id, carts.id],
                tables_completed: Vec::new(),
                sstables_to_clean_up: 3,
                sstables_completed: 1,
                current_table: Some(orders.id),
            },
            &events,
        );
        follower.observe(
            &Snapshot {
                tables_to_clean_up: vec![orders.id, carts.id],
                tables_completed: vec![orders.id],
                sstables_to_clean_up: 0,
                sstables_completed: 0,
                current_table: None,
            },
            &events,
        );
        follower.complete_all(&events);

        assert_eq!(
            *events.0.lock().unwrap(),
            vec![
                "start orders 3",
                "segment orders 1/3",
                "segment orders 2/3",
                "segment orders 3/3",
                "done orders",
                "start carts 0",
                "done carts",
            ]
        );
    }

    #[test]
    fn follower_ignores_tables_of_other_jobs() {
        let orders = table(1, "orders");
        let mut follower = ProgressFollower::new(std::slice::from_ref(&orders));
        let events = Events::default();

        follower.observe(
            &Snapshot {
                tables_to_clean_up: vec![table(9, "other").id],
                tables_completed: vec![table(9, "other").id],
                sstables_to_clean_up: 0,
                sstables_completed: 0,
                current_table: None,
            },
            &events,
        );
        assert!(events.0.lock().unwrap().is_empty());
    }

    #[test]
    fn follower_ignores_overlapping_job_with_other_targets() {
        let orders = table(1, "orders");
        let carts = table(2, "carts");
        let mut follower = ProgressFollower::new(&[orders.clone(), carts.clone()]);
        let events = Events::default();

        follower.observe(
            &Snapshot {
                tables_to_clean_up: vec![orders.id],
                tables_completed: vec![orders.id],
                sstables_to_clean_up: 0,
                sstables_completed: 0,
                current_table: None,
            },
            &events,
        );
        follower.observe(
            &Snapshot {
                tables_to_clean_up: vec![carts.id, table(9, "other").id],
                tables_completed: Vec::new(),
                sstables_to_clean_up: 4,
                sstables_completed: 2,
                current_table: Some(carts.id),
            },
            &events,
        );
        assert!(events.0.lock().unwrap().is_empty());
    }

    /// Serves a node that accepts job 7 but never reports its progress,
    /// answering `/api/cleanup/last` with `last`.
    fn unresponsive_node(last: Option<ApiJobOutcome>) -> HttpNode {
        let server = HttpServer::new(move || {
            let last = last.clone();
            App::new()
                .route(
                    "/api/cleanup",
                    web::post().to(|| async {
                        HttpResponse::Accepted().json(ApiCleanupAccepted {
                            job_id: 7,
                            tables: vec![table(1, "orders")],
                        })
                    }),
                )
                .route(
                    "/api/cleanup/progress",
                    web::get().to(|| async { HttpResponse::NoContent().finish() }),
                )
                .route(
                    "/api/cleanup/last",
                    web::get().to(move || {
                        let last = last.clone();
                        async move {
                            last.map_or_else(
                                || HttpResponse::NoContent().finish(),
                                |outcome| HttpResponse::Ok().json(outcome),
                            )
                        }
                    }),
                )
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());

        HttpNode::new(&format!("http://{addr}")).with_poll_interval(Duration::from_millis(10))
    }

    async fn start_shop(node: &HttpNode) -> Result<(), TransportError> {
        tokio::time::timeout(
            Duration::from_secs(3),
            node.start_job(null_output(), 1, "shop", &[]),
        )
        .await
        .expect("start_job kept polling a job the node no longer tracks")
    }

    #[actix_web::test]
    async fn job_without_progress_or_outcome_is_lost() {
        let node = unresponsive_node(None);
        let result = start_shop(&node).await;
        assert!(
            matches!(
                &result,
                Err(TransportError::JobFailed { keyspace, message })
                    if keyspace == "shop" && message.contains("job 7 lost")
            ),
            "{result:?}"
        );
    }

    #[actix_web::test]
    async fn newer_job_outcome_means_ours_is_lost() {
        let node = unresponsive_node(Some(ApiJobOutcome {
            job_id: 8,
            keyspace: "audit".to_string(),
            result: ApiJobResult::Succeeded {
                tables: 1,
                segments: 1,
                elapsed_ms: 1,
            },
        }));
        let result = start_shop(&node).await;
        assert!(
            matches!(
                &result,
                Err(TransportError::JobFailed { keyspace, message })
                    if keyspace == "shop" && message.contains("job 8 ended after it")
            ),
            "{result:?}"
        );
    }

    #[test]
    fn base_url_is_normalized() {
        let node = HttpNode::new("http://127.0.0.1:7199/");
        assert_eq!(node.url("/api/health"), "http://127.0.0.1:7199/api/health");
    }
}
