use std::sync::Arc;

use roomsync_core::metrics::Metrics;
use roomsync_core::{AuthFront, RoomLookup};

/// Everything a request handler needs, cloned cheaply per-request the way
/// axum's `State` extractor expects (every field is an `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub auth_front: Arc<AuthFront>,
    /// Kept alongside `auth_front` (both were built from the same
    /// `Arc<dyn RoomLookup>`) so the WebSocket handler can resolve the room
    /// handle it needs for frame/close traffic after `AuthFront::connect`
    /// accepts the session.
    pub rooms: Arc<dyn RoomLookup>,
    pub metrics: Arc<Metrics>,
    pub admin_api_key: Arc<str>,
}
