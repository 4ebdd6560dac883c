//! The seam between AuthFront and however a process actually keeps its
//! RoomCore actors alive. `core` knows how to run one room (`room::spawn`) but
//! deliberately doesn't know how a process multiplexes many of them — that
//! needs a data directory, a mutator registry, and a config per room, all of
//! which are the embedder's call. `RoomLookup` is that seam.

use async_trait::async_trait;

use roomsync_lib::RoomId;

use crate::error::StorageError;
use crate::room::RoomHandle;

/// Looks up or spawns the [`RoomHandle`] for a roomID. `get_or_spawn` is used by
/// `connect` (a room must exist to accept a session); `existing` is used by
/// invalidation and revalidation, which should never spin up a room that has no
/// live connections just to tell it nobody's there.
#[async_trait]
pub trait RoomLookup: Send + Sync {
    async fn get_or_spawn(&self, room_id: &RoomId) -> Result<RoomHandle, StorageError>;
    async fn existing(&self, room_id: &RoomId) -> Option<RoomHandle>;

    /// Wipes the room's durable storage tree entirely, independent of whether
    /// a live actor exists for it. Used by `deleteRoom`'s Deleted tombstone
    /// transition, which must leave no durable KV behind it.
    async fn wipe(&self, room_id: &RoomId) -> Result<(), StorageError>;
}
