//! Durable and in-memory record shapes, independent of any particular storage
//! backend.

use std::time::Duration;

use roomsync_lib::{ClientId, Cookie, RoomId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Resolved identity of a connection, produced by an [`crate::auth_handler::AuthHandler`]
/// and carried through to every mutator invocation made on that client's behalf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserData {
    #[serde(rename = "userID")]
    pub user_id: UserId,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A client-submitted mutation once it has entered the room's C6 MutationBuffer.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub client_id: ClientId,
    pub id: u64,
    pub name: String,
    pub args: Value,
    pub timestamp: i64,
    pub server_received_timestamp: i64,
    pub auth: UserData,
}

/// Durable per-client bookkeeping. Persisted under `client/<clientID>`; survives
/// reconnects and is never deleted except with the room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientRecord {
    #[serde(rename = "baseCookie")]
    pub base_cookie: Cookie,
    #[serde(rename = "lastMutationID")]
    pub last_mutation_id: u64,
    #[serde(rename = "lastMutationIDVersion")]
    pub last_mutation_id_version: Cookie,
    #[serde(rename = "userID")]
    pub user_id: UserId,
}

impl ClientRecord {
    pub fn fresh(user_id: UserId) -> Self {
        ClientRecord {
            base_cookie: Cookie::GENESIS,
            last_mutation_id: 0,
            last_mutation_id_version: Cookie::GENESIS,
            user_id,
        }
    }
}

/// The context a [`crate::mutator::Mutator`] executes under: everything about
/// *who* submitted the mutation and *which* turn it is landing in, but none of
/// the turn-loop machinery itself.
#[derive(Debug, Clone)]
pub struct MutatorCtx {
    pub auth: UserData,
    pub mutation_id: u64,
    pub client_id: ClientId,
    pub version: Cookie,
}

/// Lifecycle status of a [`RoomRecord`] as tracked by AuthFront.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomStatus {
    Unknown,
    Open,
    Closed,
    Deleted,
}

/// AuthFront's durable directory entry for a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRecord {
    #[serde(rename = "roomID")]
    pub room_id: RoomId,
    #[serde(rename = "objectID")]
    pub object_id: String,
    pub status: RoomStatus,
}

/// AuthFront's per `(user, room, client)` presence marker, keyed by
/// `connection/<userID>/<roomID>/<clientID>/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRecord {
    #[serde(rename = "connectTimestamp")]
    pub connect_timestamp: i64,
}

/// Tunables for one room's turn loop + buffer sizer, loaded from the standalone
/// binary's layered config and passed down to `RoomCore::spawn`.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Fixed tick period of the TurnLoop.
    pub turn_duration: Duration,
    pub buffer_min_ms: i64,
    pub buffer_max_ms: i64,
    pub buffer_initial_ms: i64,
    pub buffer_adjust_interval: Duration,
    /// If set, writes may be visible to subsequent mutators in the same turn
    /// before the storage ack.
    pub allow_unconfirmed_writes: bool,
}

impl Default for RoomConfig {
    fn default() -> Self {
        RoomConfig {
            turn_duration: Duration::from_millis(1000 / 15),
            buffer_min_ms: 0,
            buffer_max_ms: 500,
            buffer_initial_ms: 200,
            buffer_adjust_interval: Duration::from_secs(10),
            allow_unconfirmed_writes: false,
        }
    }
}

impl RoomConfig {
    /// `1000/60 ms` ticks when unconfirmed writes are enabled.
    pub fn with_unconfirmed_writes(mut self, allow: bool) -> Self {
        self.allow_unconfirmed_writes = allow;
        if allow {
            self.turn_duration = Duration::from_millis(1000 / 60);
        }
        self
    }
}
