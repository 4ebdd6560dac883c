//! `GET /connect`: the WebSocket upgrade endpoint. Parses the connect query
//! string and the bearer token out of
//! `Sec-WebSocket-Protocol`, hands both to [`AuthFront::connect`], then
//! bridges the socket to the room's [`ChannelClientSink`] for the rest of the
//! session's lifetime.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use http::{HeaderMap, StatusCode};
use serde::Deserialize;

use roomsync_core::client::ChannelClientSink;
use roomsync_core::DispatchConnectRequest;
use roomsync_lib::{ClientId, Cookie, RoomId};
use roomsync_protocol::{ClientFrame, ErrorKind, ServerFrame};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    #[serde(rename = "clientID")]
    client_id: String,
    #[serde(rename = "roomID")]
    room_id: String,
    #[serde(rename = "baseCookie", default)]
    base_cookie: String,
    ts: i64,
    lmid: u64,
    wsid: Option<String>,
}

pub async fn connect(State(state): State<AppState>, Query(query): Query<ConnectQuery>, headers: HeaderMap, ws: WebSocketUpgrade) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return (StatusCode::BAD_REQUEST, "missing Sec-WebSocket-Protocol").into_response();
    };
    let base_cookie = match parse_base_cookie(&query.base_cookie) {
        Some(c) => c,
        None => return (StatusCode::BAD_REQUEST, "malformed baseCookie").into_response(),
    };

    let req = DispatchConnectRequest {
        room_id: RoomId::from(query.room_id),
        client_id: ClientId::from(query.client_id),
        token: token.clone(),
        base_cookie,
        timestamp: query.ts,
        lmid: query.lmid,
        wsid: query.wsid,
    };

    // Echo the subprotocol back: the only protocol we ever "support" is
    // whichever token the client sent, since that's how the auth token rides
    // the WebSocket handshake.
    ws.protocols([token]).on_upgrade(move |socket| run_session(state, socket, req))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(http::header::SEC_WEBSOCKET_PROTOCOL)?.to_str().ok()?;
    Some(urlencoding::decode(raw).map(|s| s.into_owned()).unwrap_or_else(|_| raw.to_owned()))
}

fn parse_base_cookie(raw: &str) -> Option<Cookie> {
    if raw.is_empty() {
        return Some(Cookie::GENESIS);
    }
    raw.parse::<u64>().ok().map(|v| Cookie(Some(v)))
}

async fn run_session(state: AppState, socket: WebSocket, req: DispatchConnectRequest) {
    let room_id = req.room_id.clone();
    let client_id = req.client_id.clone();

    let (sink, mut outbound) = ChannelClientSink::new();
    if state.auth_front.connect(req, sink.clone()).await.is_err() {
        // AuthFront already sent an `error` frame and closed the sink; the
        // socket just needs to finish upgrading and then go away.
        let _ = socket.close().await;
        return;
    }

    let Some(room) = state.rooms.existing(&room_id).await else {
        tracing::error!(room_id = %room_id, "room vanished between connect admission and session start");
        return;
    };

    let (mut ws_tx, mut ws_rx) = socket.split();

    let forward = async move {
        while let Some(frame) = outbound.recv().await {
            if ws_tx.send(Message::Text(frame.to_text())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    };

    let inbound = async {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(text) => match ClientFrame::parse(&text) {
                    Ok(frame) => match room.frame(client_id.clone(), frame).await {
                        Ok(Ok(())) => {}
                        Ok(Err(msg_err)) => {
                            let _ = sink.send(ServerFrame::Error(msg_err.error_kind(), msg_err.to_string()));
                            break;
                        }
                        Err(_room_gone) => break,
                    },
                    Err(err) => {
                        let _ = sink.send(ServerFrame::Error(ErrorKind::InvalidMessage, err.to_string()));
                        break;
                    }
                },
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
            }
        }
    };

    tokio::join!(forward, inbound);
    let _ = room.close(client_id).await;
}
