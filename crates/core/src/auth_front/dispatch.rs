//! AuthFront.Dispatch. Authenticates a connect attempt, resolves the target
//! room's record, durably marks the connection as present, and forwards the
//! admitted request into the room's actor.
//!
//! This is the one place in the fabric where the connection record is written
//! before the WebSocket upgrade is known to succeed — see [`super::connection_record_store`]
//! for what that implies if the upgrade then fails.

use std::sync::Arc;

use roomsync_auth::AuthHandler;
use roomsync_lib::{ClientId, Cookie, RoomId};
use roomsync_protocol::ServerFrame;

use crate::client::ClientSink;
use crate::error::{ConnectError, DispatchError};
use crate::model::{RoomStatus, UserData};
use crate::room::{ConnectCommand, ConnectRequest};

use super::AuthFront;

/// Everything the HTTP/WS layer has parsed out of the `GET /connect`
/// request before any business logic runs.
pub struct DispatchConnectRequest {
    pub room_id: RoomId,
    pub client_id: ClientId,
    /// The URL-decoded bearer token carried in `Sec-WebSocket-Protocol`.
    pub token: String,
    pub base_cookie: Cookie,
    pub timestamp: i64,
    pub lmid: u64,
    pub wsid: Option<String>,
}

impl AuthFront {
    /// Runs the full `connect` flow. On any rejection, sends the client its
    /// `error` frame over `sink` and closes it — the caller only needs to have
    /// completed the WebSocket upgrade and handed over the sink; it does not
    /// need to inspect the returned error to react on the wire.
    pub async fn connect(&self, req: DispatchConnectRequest, sink: Arc<dyn ClientSink>) -> Result<(), DispatchError> {
        match self.connect_inner(req, sink.clone()).await {
            Ok((room, cmd)) => match room.connect(cmd).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(connect_err)) => {
                    self.reject(&sink, connect_err.error_kind(), connect_err.to_string());
                    Err(dispatch_error_from_connect(connect_err))
                }
                Err(_room_gone) => {
                    self.reject(&sink, roomsync_protocol::ErrorKind::InternalError, "room actor is no longer running".to_owned());
                    Err(DispatchError::RoomNotFound(String::new()))
                }
            },
            Err(err) => {
                self.reject(&sink, err.error_kind(), err.to_string());
                Err(err)
            }
        }
    }

    fn reject(&self, sink: &Arc<dyn ClientSink>, kind: roomsync_protocol::ErrorKind, detail: String) {
        let _ = sink.send(ServerFrame::Error(kind, detail));
        sink.close();
    }

    /// Everything that can be decided about a connect attempt without
    /// touching a room actor. Returns the room handle plus the connect command
    /// ready to forward, so `connect` only needs one router hop either way.
    async fn connect_inner(&self, req: DispatchConnectRequest, sink: Arc<dyn ClientSink>) -> Result<(crate::room::RoomHandle, ConnectCommand), DispatchError> {
        let _guard = self.lock.read().await;

        let identity = self
            .auth_handler
            .authenticate(&req.token, req.room_id.as_str())
            .await
            .map_err(|_| DispatchError::Unauthorized)?;
        if identity.user_id.as_str().is_empty() {
            return Err(DispatchError::Unauthorized);
        }

        let record = self
            .room_records
            .get(&req.room_id)
            .map_err(DispatchError::Internal)?
            .ok_or_else(|| DispatchError::RoomNotFound(req.room_id.to_string()))?;
        match record.status {
            RoomStatus::Open => {}
            RoomStatus::Closed => return Err(DispatchError::RoomClosed(req.room_id.to_string())),
            RoomStatus::Deleted => return Err(DispatchError::RoomDeleted(req.room_id.to_string())),
            RoomStatus::Unknown => return Err(DispatchError::RoomNotFound(req.room_id.to_string())),
        }

        self.connections
            .put(&identity.user_id, &req.room_id, &req.client_id, self.clock.now_millis())
            .map_err(DispatchError::Internal)?;

        let room = self.rooms.get_or_spawn(&req.room_id).await.map_err(DispatchError::Internal)?;

        let connect_req = ConnectRequest {
            client_id: req.client_id,
            base_cookie: req.base_cookie,
            timestamp: req.timestamp,
            lmid: req.lmid,
            wsid: req.wsid,
            user_data: UserData {
                user_id: identity.user_id,
                extra: identity.extra,
            },
        };
        Ok((room, ConnectCommand { req: connect_req, sink }))
    }
}

fn dispatch_error_from_connect(err: ConnectError) -> DispatchError {
    match err {
        ConnectError::InvalidMessage(m) => DispatchError::InvalidMessage(m),
        ConnectError::RoomNotFound(r) => DispatchError::RoomNotFound(r),
        ConnectError::RoomClosed(r) => DispatchError::RoomClosed(r),
        ConnectError::Unauthorized => DispatchError::Unauthorized,
        ConnectError::UnexpectedBaseCookie { .. } | ConnectError::UnexpectedLmid { .. } => {
            DispatchError::InvalidMessage(err.to_string())
        }
        ConnectError::Internal(e) => DispatchError::Internal(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth_front::{AuthFrontConfig, RoomLookup};
    use crate::client::ChannelClientSink;
    use crate::model::RoomConfig;
    use crate::mutator::MutatorRegistry;
    use crate::room::{self, RoomHandle};
    use crate::storage::fake::MemStorage;
    use crate::storage::Storage;
    use async_trait::async_trait;
    use roomsync_auth::{AuthRejected, ResolvedIdentity};
    use roomsync_lib::{SystemClock, UserId};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct AlwaysAuth;
    #[async_trait]
    impl AuthHandler for AlwaysAuth {
        async fn authenticate(&self, token: &str, _room_id: &str) -> Result<ResolvedIdentity, AuthRejected> {
            if token == "bad" {
                return Err(AuthRejected::IssuerMismatch { got: "x".into(), expected: "y".into() });
            }
            Ok(ResolvedIdentity { user_id: UserId::from("u1"), extra: Default::default() })
        }
    }

    /// Spawns rooms on first lookup and remembers them, backed by one shared
    /// in-memory storage so tests don't need a real filesystem.
    struct TestRoomLookup {
        storage: Arc<MemStorage>,
        rooms: Mutex<HashMap<String, RoomHandle>>,
    }

    #[async_trait]
    impl RoomLookup for TestRoomLookup {
        async fn get_or_spawn(&self, room_id: &RoomId) -> Result<RoomHandle, crate::error::StorageError> {
            let mut rooms = self.rooms.lock().unwrap();
            if let Some(handle) = rooms.get(room_id.as_str()) {
                return Ok(handle.clone());
            }
            let (handle, _join) = room::spawn(
                room_id.clone(),
                self.storage.clone(),
                RoomConfig::default(),
                MutatorRegistry::with_builtins(),
                Arc::new(SystemClock),
                Arc::new(crate::metrics::Metrics::new()),
            );
            rooms.insert(room_id.as_str().to_owned(), handle.clone());
            Ok(handle)
        }

        async fn existing(&self, room_id: &RoomId) -> Option<RoomHandle> {
            self.rooms.lock().unwrap().get(room_id.as_str()).cloned()
        }

        async fn wipe(&self, _room_id: &RoomId) -> Result<(), crate::error::StorageError> {
            let mut batch = crate::storage::WriteBatch::new();
            batch.clear_all();
            self.storage.commit(batch)
        }
    }

    fn auth_front() -> AuthFront {
        let directory = Arc::new(MemStorage::default());
        let rooms = Arc::new(TestRoomLookup {
            storage: Arc::new(MemStorage::default()),
            rooms: Mutex::new(HashMap::new()),
        });
        AuthFront::new(
            directory,
            rooms,
            Arc::new(AlwaysAuth),
            Arc::new(SystemClock),
            AuthFrontConfig::default(),
            Arc::new(crate::metrics::Metrics::new()),
        )
    }

    fn req(room_id: &str, client_id: &str, token: &str) -> DispatchConnectRequest {
        DispatchConnectRequest {
            room_id: RoomId::from(room_id),
            client_id: ClientId::from(client_id),
            token: token.to_owned(),
            base_cookie: Cookie::GENESIS,
            timestamp: 0,
            lmid: 0,
            wsid: None,
        }
    }

    #[tokio::test]
    async fn rejects_connect_to_an_unknown_room() {
        let front = auth_front();
        let (sink, mut rx) = ChannelClientSink::new();
        let err = front.connect(req("ghost", "c1", "good"), sink).await.unwrap_err();
        assert!(matches!(err, DispatchError::RoomNotFound(_)));
        assert!(matches!(rx.recv().await.unwrap(), ServerFrame::Error(roomsync_protocol::ErrorKind::RoomNotFound, _)));
    }

    #[tokio::test]
    async fn rejects_bad_auth_token_before_touching_the_room_directory() {
        let front = auth_front();
        let (sink, mut rx) = ChannelClientSink::new();
        let err = front.connect(req("r1", "c1", "bad"), sink).await.unwrap_err();
        assert!(matches!(err, DispatchError::Unauthorized));
        assert!(matches!(rx.recv().await.unwrap(), ServerFrame::Error(roomsync_protocol::ErrorKind::Unauthorized, _)));
    }

    #[tokio::test]
    async fn accepts_connect_to_an_open_room_and_writes_a_connection_record() {
        let front = auth_front();
        front.room_records.ensure_open(&RoomId::from("r1")).unwrap();
        let (sink, mut rx) = ChannelClientSink::new();
        front.connect(req("r1", "c1", "good"), sink).await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), ServerFrame::Connected { .. }));
        let connections = front.connections.list_for_user(&UserId::from("u1")).unwrap();
        assert_eq!(connections, vec![(RoomId::from("r1"), ClientId::from("c1"))]);
    }

    #[tokio::test]
    async fn rejects_connect_to_a_closed_room() {
        let front = auth_front();
        front.room_records.ensure_open(&RoomId::from("r1")).unwrap();
        front.room_records.set_status(&RoomId::from("r1"), RoomStatus::Closed).unwrap();
        let (sink, mut rx) = ChannelClientSink::new();
        let err = front.connect(req("r1", "c1", "good"), sink).await.unwrap_err();
        assert!(matches!(err, DispatchError::RoomClosed(_)));
        assert!(matches!(rx.recv().await.unwrap(), ServerFrame::Error(roomsync_protocol::ErrorKind::RoomClosed, _)));
    }
}
