//! HTTP surface of the ember node.
//!
//! A thin axum dispatcher over the store and overlay subsystems: every
//! endpoint takes a short lock, mutates or snapshots state, and answers
//! JSON. CORS is permissive so browser frontends can read `/status` and
//! `/inventory` directly.

use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use tower_http::cors::CorsLayer;
use tracing::info;

use ember_net::{Identity, NetClient, PropagatorHandle, SharedInventory, SharedOverlay};

mod error;
mod routes;
mod types;

pub use error::ApiError;
pub use types::{
    BalancesResponse, ConsensusResponse, GetBlocksQuery, StatusResponse, SubmitTransaction,
};

/// Shared context handed to every handler.
#[derive(Clone)]
pub struct ApiContext {
    pub identity: Identity,
    pub inventory: SharedInventory,
    pub overlay: SharedOverlay,
    pub propagator: PropagatorHandle,
    pub client: NetClient,
}

/// Build the node's router with all endpoints and permissive CORS.
pub fn router(ctx: ApiContext) -> Router {
    Router::new()
        .route("/status", get(routes::network::status))
        .route("/peers", get(routes::network::peers))
        .route("/ping", get(routes::network::ping))
        .route("/register", post(routes::network::register))
        .route("/sync", post(routes::network::sync))
        .route("/inventory", get(routes::chain::inventory))
        .route("/getblocks", get(routes::chain::get_blocks))
        .route("/balance", get(routes::chain::balances))
        .route("/consensus", get(routes::chain::consensus))
        .route("/inv", post(routes::chain::submit_transaction))
        .route("/block", post(routes::chain::submit_block))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Bind the listening port and serve until `shutdown` resolves.
/// In-flight requests are drained before returning.
pub async fn serve(
    ctx: ApiContext,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let port = ctx.identity.port;
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "http server listening");
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown)
        .await
}
