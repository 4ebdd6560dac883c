//! `/api/auth/v0/*` and `/api/room/v0/room/:roomID/*`. Every route here runs
//! behind [`require_api_key`], a `FromRequestParts`-style middleware adapted
//! to a static shared secret instead of per-request JWT validation, since
//! there is no per-admin identity to resolve here.

use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use roomsync_lib::{RoomId, UserId};

use crate::state::AppState;

const API_KEY_HEADER: &str = "x-reflect-auth-api-key";

pub async fn require_api_key(State(state): State<AppState>, headers: HeaderMap, request: Request, next: Next) -> Response {
    let presented = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    if presented != Some(state.admin_api_key.as_ref()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    next.run(request).await
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/v0/invalidateForUser", axum::routing::post(invalidate_for_user))
        .route("/api/auth/v0/invalidateForRoom", axum::routing::post(invalidate_for_room))
        .route("/api/auth/v0/invalidateAll", axum::routing::post(invalidate_all))
        .route("/api/room/v0/room/:room_id/create", axum::routing::post(create_room))
        .route("/api/room/v0/room/:room_id/delete", axum::routing::post(delete_room))
        .route("/api/room/v0/room/:room_id/status", axum::routing::get(room_status))
}

#[derive(Deserialize)]
struct InvalidateForUserBody {
    #[serde(rename = "userID")]
    user_id: String,
}

async fn invalidate_for_user(State(state): State<AppState>, Json(body): Json<InvalidateForUserBody>) -> Response {
    match state.auth_front.invalidate_for_user(&UserId::from(body.user_id)).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => (err.http_status(), err.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
struct InvalidateForRoomBody {
    #[serde(rename = "roomID")]
    room_id: String,
}

async fn invalidate_for_room(State(state): State<AppState>, Json(body): Json<InvalidateForRoomBody>) -> Response {
    match state.auth_front.invalidate_for_room(&RoomId::from(body.room_id)).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => (err.http_status(), err.to_string()).into_response(),
    }
}

async fn invalidate_all(State(state): State<AppState>) -> Response {
    match state.auth_front.invalidate_all().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => (err.http_status(), err.to_string()).into_response(),
    }
}

async fn create_room(State(state): State<AppState>, Path(room_id): Path<String>) -> Response {
    match state.auth_front.create_room(&RoomId::from(room_id)) {
        Ok(record) => Json(record).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn delete_room(State(state): State<AppState>, Path(room_id): Path<String>) -> Response {
    match state.auth_front.delete_room(&RoomId::from(room_id)).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => (err.http_status(), err.to_string()).into_response(),
    }
}

#[derive(Serialize)]
struct RoomStatusBody {
    #[serde(rename = "roomID")]
    room_id: String,
    status: &'static str,
}

async fn room_status(State(state): State<AppState>, Path(room_id): Path<String>) -> Response {
    let room_id = RoomId::from(room_id);
    match state.auth_front.room_status(&room_id) {
        Ok(Some(record)) => Json(RoomStatusBody { room_id: room_id.to_string(), status: status_label(record.status) }).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

fn status_label(status: roomsync_core::RoomStatus) -> &'static str {
    match status {
        roomsync_core::RoomStatus::Open => "open",
        roomsync_core::RoomStatus::Closed => "closed",
        roomsync_core::RoomStatus::Deleted => "deleted",
        roomsync_core::RoomStatus::Unknown => "unknown",
    }
}
