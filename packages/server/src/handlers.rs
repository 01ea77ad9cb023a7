//! HTTP handler functions for the management API.

use actix_web::{HttpResponse, web};
use keysweep_cleanup::LogOutput;
use keysweep_node::NodeError;
use keysweep_node_models::{
    ApiCleanupAccepted, ApiError, ApiHealth, ApiStartCleanup, KeyspacesQueryParams,
    ProgressQueryParams,
};
use keysweep_progress_models::ProgressStatus;

use crate::AppState;

/// `GET /api/health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `GET /api/keyspaces`
///
/// Lists the node's keyspaces, by default only those with a non-local
/// replication strategy.
pub async fn keyspaces(
    state: web::Data<AppState>,
    params: web::Query<KeyspacesQueryParams>,
) -> HttpResponse {
    HttpResponse::Ok().json(state.node.schema().keyspace_names(params.set))
}

/// `GET /api/cleanup/progress`
///
/// Returns the status map of the running job, or `204 No Content` when no
/// job is running. The job is reported whichever keyspace was asked for.
pub async fn progress(
    state: web::Data<AppState>,
    params: web::Query<ProgressQueryParams>,
) -> HttpResponse {
    if let Some(keyspace) = params.keyspace.as_deref()
        && state.node.schema().keyspace(keyspace).is_none()
    {
        return error_response(&NodeError::UnknownKeyspace(keyspace.to_string()));
    }

    match state.node.status() {
        ProgressStatus::Running(snapshot) => HttpResponse::Ok().json(snapshot.to_status_map()),
        ProgressStatus::NotRunning => HttpResponse::NoContent().finish(),
    }
}

/// `POST /api/cleanup`
///
/// Registers a cleanup job and runs it on a background task. Pollers see
/// the job as soon as this returns `202 Accepted`.
pub async fn start_cleanup(
    state: web::Data<AppState>,
    body: web::Json<ApiStartCleanup>,
) -> HttpResponse {
    let request = body.into_inner();
    let job = match state.node.begin_job(&request.keyspace, &request.tables) {
        Ok(job) => job,
        Err(e) => {
            log::warn!("Rejected cleanup of keyspace {}: {e}", request.keyspace);
            return error_response(&e);
        }
    };

    let accepted = ApiCleanupAccepted {
        job_id: job.job_id(),
        tables: job.tables().to_vec(),
    };
    log::info!(
        "Accepted cleanup job {} for keyspace {}",
        accepted.job_id,
        request.keyspace
    );

    let node = state.node.clone();
    actix_web::rt::spawn(async move {
        let job_id = job.job_id();
        if let Err(e) = node.run_job(job, request.jobs, &LogOutput).await {
            log::debug!("Cleanup job {job_id} ended with error: {e}");
        }
    });

    HttpResponse::Accepted().json(accepted)
}

/// `GET /api/cleanup/last`
///
/// Returns how the most recently ended job finished, or `204 No Content`
/// if no job has ended yet.
pub async fn last_outcome(state: web::Data<AppState>) -> HttpResponse {
    state.node.last_outcome().map_or_else(
        || HttpResponse::NoContent().finish(),
        |outcome| HttpResponse::Ok().json(outcome),
    )
}

fn error_response(e: &NodeError) -> HttpResponse {
    let body = ApiError {
        error: e.to_string(),
    };
    match e {
        NodeError::UnknownKeyspace(_) | NodeError::UnknownTable { .. } => {
            HttpResponse::NotFound().json(body)
        }
        NodeError::LocalKeyspace(_) => HttpResponse::BadRequest().json(body),
        NodeError::AlreadyRunning(_) => HttpResponse::Conflict().json(body),
        NodeError::Cleanup(_) => HttpResponse::InternalServerError().json(body),
    }
}
