//! Internal (non-user-facing) storage keys and the per-room state a RoomCore
//! actor owns exclusively.

use std::collections::HashSet;
use std::sync::Arc;

use roomsync_lib::{ClientId, Cookie, RoomId};
use roomsync_lib::Clock;

use crate::buffer_sizer::BufferSizer;
use crate::client::ClientRegistry;
use crate::error::StorageError;
use crate::metrics::Metrics;
use crate::model::{ClientRecord, RoomConfig};
use crate::mutation_buffer::MutationBuffer;
use crate::mutator::MutatorRegistry;
use crate::storage::{to_json, Storage, WriteBatch};

pub(crate) const VERSION_KEY: &str = "version";

pub(crate) fn client_key(client_id: &ClientId) -> String {
    format!("client/{client_id}")
}

pub(crate) fn connected_key(client_id: &ClientId) -> String {
    format!("connected/{client_id}")
}

pub fn load_version(storage: &dyn Storage) -> Result<Cookie, StorageError> {
    Ok(storage.get_typed::<Cookie>(VERSION_KEY)?.unwrap_or(Cookie::GENESIS))
}

pub fn load_client_record(storage: &dyn Storage, client_id: &ClientId) -> Result<Option<ClientRecord>, StorageError> {
    storage.get_typed(&client_key(client_id))
}

/// The durable `connected/<clientID>` set: clients the last committed turn
/// believed were connected. Diffed against the live [`ClientRegistry`] each
/// tick to find disconnect work.
pub fn list_connected(storage: &dyn Storage) -> Result<HashSet<ClientId>, StorageError> {
    Ok(storage
        .list_prefix("connected/")
        .map_err(StorageError::from)?
        .into_iter()
        .filter_map(|(key, _)| key.strip_prefix("connected/").map(ClientId::from))
        .collect())
}

/// Everything a RoomCore actor holds for the lifetime of one room. Owned
/// exclusively by the single task running that room's command loop; no
/// `Arc<Mutex<..>>` needed beyond what's already behind `Arc` (storage, config).
pub struct RoomState {
    pub room_id: RoomId,
    pub storage: Arc<dyn Storage>,
    pub config: RoomConfig,
    pub clients: ClientRegistry,
    pub buffer: MutationBuffer,
    pub buffer_sizer: BufferSizer,
    pub mutators: MutatorRegistry,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<Metrics>,
    /// Set by the admin `deleteRoom`/invalidate path; once true the room
    /// rejects new connects and the actor shuts down after the in-flight
    /// command drains.
    pub closing: bool,
}

impl RoomState {
    pub fn new(
        room_id: RoomId,
        storage: Arc<dyn Storage>,
        config: RoomConfig,
        mutators: MutatorRegistry,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let buffer_sizer = BufferSizer::new(&config);
        RoomState {
            room_id,
            storage,
            config,
            clients: ClientRegistry::default(),
            buffer: MutationBuffer::default(),
            buffer_sizer,
            mutators,
            clock,
            metrics,
            closing: false,
        }
    }

    pub fn current_version(&self) -> Result<Cookie, StorageError> {
        load_version(self.storage.as_ref())
    }

    pub fn client_record(&self, client_id: &ClientId) -> Result<Option<ClientRecord>, StorageError> {
        load_client_record(self.storage.as_ref(), client_id)
    }

    pub fn connected_set(&self) -> Result<HashSet<ClientId>, StorageError> {
        list_connected(self.storage.as_ref())
    }

    /// Stages `client_record` and the `connected/<id>` marker into `batch`; used
    /// by both ConnectHandler (on accept) and the turn loop (on commit).
    pub fn stage_client_record(batch: &mut WriteBatch, client_id: &ClientId, record: &ClientRecord) {
        batch.put(client_key(client_id), to_json(record));
        batch.put(connected_key(client_id), serde_json::json!({}));
    }
}
