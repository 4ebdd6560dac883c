//! AuthFront: the singleton front door every connect attempt and every
//! admin-triggered invalidation passes through. Unlike RoomCore, which is
//! sharded one actor per room, AuthFront is a single
//! process-wide instance guarding a directory that spans every room, so its
//! concurrency control is a reader/writer lock rather than a turn queue:
//! `connect` takes it for read (many connects may race each other),
//! `invalidate*` takes it for write (an invalidation must not interleave with
//! a connect that could resurrect the exact connection being torn down).

mod connection_record_store;
mod dispatch;
mod invalidate;
mod room_lookup;
mod room_record_store;

pub use connection_record_store::ConnectionRecordStore;
pub use dispatch::DispatchConnectRequest;
pub use room_lookup::RoomLookup;
pub use room_record_store::RoomRecordStore;

use std::sync::Arc;
use std::time::Duration;

use roomsync_auth::AuthHandler;
use roomsync_lib::Clock;

use crate::metrics::Metrics;
use crate::storage::Storage;

/// Tuning knobs for the revalidation schedule. There's no knob for the lock
/// itself: AuthFront's
/// reader/writer lock is always fair FIFO, matching `tokio::sync::RwLock`'s
/// documented ordering.
#[derive(Debug, Clone)]
pub struct AuthFrontConfig {
    /// How often `revalidate_connections` should be scheduled by the embedder.
    /// AuthFront does not spawn its own timer; the standalone binary (C19)
    /// reads this to drive its own interval task.
    pub revalidation_interval: Duration,
}

impl Default for AuthFrontConfig {
    fn default() -> Self {
        AuthFrontConfig { revalidation_interval: Duration::from_secs(30) }
    }
}

/// The directory + dispatch singleton. Generic over nothing: unlike RoomCore,
/// which is parameterized per room by its storage and mutator set, AuthFront
/// owns one fixed `dyn Storage` for its own directory (room records and
/// connection records) and delegates everything room-shaped to `rooms`.
pub struct AuthFront {
    lock: tokio::sync::RwLock<()>,
    room_records: RoomRecordStore<dyn Storage>,
    connections: ConnectionRecordStore<dyn Storage>,
    rooms: Arc<dyn RoomLookup>,
    auth_handler: Arc<dyn AuthHandler>,
    clock: Arc<dyn Clock>,
    config: AuthFrontConfig,
    metrics: Arc<Metrics>,
}

impl AuthFront {
    pub fn new(
        directory: Arc<dyn Storage>,
        rooms: Arc<dyn RoomLookup>,
        auth_handler: Arc<dyn AuthHandler>,
        clock: Arc<dyn Clock>,
        config: AuthFrontConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        AuthFront {
            lock: tokio::sync::RwLock::new(()),
            room_records: RoomRecordStore::new(directory.clone()),
            connections: ConnectionRecordStore::new(directory),
            rooms,
            auth_handler,
            clock,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &AuthFrontConfig {
        &self.config
    }

    /// `createRoom`, exposed directly rather than through `dispatch` since it
    /// never touches a room actor.
    pub fn create_room(&self, room_id: &roomsync_lib::RoomId) -> Result<crate::model::RoomRecord, crate::error::StorageError> {
        self.room_records.ensure_open(room_id)
    }

    pub fn room_status(&self, room_id: &roomsync_lib::RoomId) -> Result<Option<crate::model::RoomRecord>, crate::error::StorageError> {
        self.room_records.get(room_id)
    }

    /// `deleteRoom`: marks the record Deleted so future connects are rejected,
    /// tears down any currently-open connections, and wipes the room's
    /// durable storage tree — Deleted is a tombstone, not just a status flip.
    pub async fn delete_room(&self, room_id: &roomsync_lib::RoomId) -> Result<(), crate::error::DispatchError> {
        let _guard = self.lock.write().await;
        self.room_records
            .set_status(room_id, crate::model::RoomStatus::Deleted)
            .map_err(crate::error::DispatchError::Internal)?;
        if let Some(handle) = self.rooms.existing(room_id).await {
            let _ = handle.invalidate(None).await;
        }
        self.rooms.wipe(room_id).await.map_err(crate::error::DispatchError::Internal)?;
        Ok(())
    }
}
