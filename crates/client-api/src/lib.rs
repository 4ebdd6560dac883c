//! The axum HTTP/WebSocket surface. Owns route tables, extractors, and
//! upgrade plumbing; every handler here delegates its actual decision-making
//! to `roomsync_core::AuthFront` and never touches a `RoomCore` actor directly
//! except to route already-admitted traffic to it.

pub mod admin;
pub mod metrics;
pub mod state;
pub mod ws;

use axum::middleware;
use axum::routing::get;
use axum::Router;

pub use state::AppState;

/// Assembles the full router: `/connect`, the admin surface (behind
/// [`admin::require_api_key`]), and `/metrics`.
pub fn router(state: AppState) -> Router {
    let admin = admin::router().route_layer(middleware::from_fn_with_state(state.clone(), admin::require_api_key));

    Router::new()
        .route("/connect", get(ws::connect))
        .merge(admin)
        .route("/metrics", get(metrics::metrics))
        .with_state(state)
}
