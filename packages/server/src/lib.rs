#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web management server for a keysweep node.
//!
//! Hosts a [`LocalNode`] and exposes its keyspaces, cleanup progress and
//! job control as a JSON API under `/api`. Jobs started through the API
//! run on a background task; clients follow them by polling
//! `/api/cleanup/progress` and `/api/cleanup/last`.

mod handlers;

use actix_web::{App, HttpServer, middleware, web};
use keysweep_node::LocalNode;

/// Port the server listens on when `PORT` is unset.
pub const DEFAULT_PORT: u16 = 7199;

/// Shared application state.
pub struct AppState {
    /// The node whose cleanup jobs are managed.
    pub node: LocalNode,
}

/// Registers the `/api` routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/keyspaces", web::get().to(handlers::keyspaces))
            .route("/cleanup", web::post().to(handlers::start_cleanup))
            .route("/cleanup/progress", web::get().to(handlers::progress))
            .route("/cleanup/last", web::get().to(handlers::last_outcome)),
    );
}

/// Starts the management server.
///
/// Loads the node schema from `KEYSWEEP_SCHEMA` and binds to
/// `BIND_ADDR`:`PORT`. The caller provides the async runtime (e.g. via
/// `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the schema cannot be loaded, or
/// the HTTP server fails to bind or encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    log::info!("Loading node schema...");
    let node = LocalNode::from_env().map_err(std::io::Error::other)?;
    log::info!(
        "Hosting {} keyspace(s)",
        node.schema().all_keyspaces().len()
    );

    let state = web::Data::new(AppState { node });

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
