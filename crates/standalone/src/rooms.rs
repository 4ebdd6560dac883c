//! The embedder-owned `RoomLookup` this binary plugs into `AuthFront`:
//! multiplexes many `RoomCore` actors over one shared `sled::Db`, each room
//! getting its own named tree.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use roomsync_core::error::StorageError;
use roomsync_core::metrics::Metrics;
use roomsync_core::mutator::MutatorRegistry;
use roomsync_core::room::{self, RoomHandle};
use roomsync_core::storage::SledStorage;
use roomsync_core::{AuthFront, RoomConfig, RoomLookup};
use roomsync_lib::{Clock, RoomId};

pub struct StandaloneRoomLookup {
    db: sled::Db,
    config: RoomConfig,
    mutators: MutatorRegistry,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    rooms: Mutex<HashMap<String, RoomHandle>>,
}

impl StandaloneRoomLookup {
    pub fn new(db: sled::Db, config: RoomConfig, mutators: MutatorRegistry, clock: Arc<dyn Clock>, metrics: Arc<Metrics>) -> Self {
        StandaloneRoomLookup {
            db,
            config,
            mutators,
            clock,
            metrics,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    fn spawn(&self, room_id: &RoomId) -> Result<RoomHandle, StorageError> {
        let tree = self.db.open_tree(format!("room/{}", room_id.as_str()))?;
        let storage: Arc<dyn roomsync_core::storage::Storage> = Arc::new(SledStorage::from_tree(tree));
        let (handle, _join) = room::spawn(
            room_id.clone(),
            storage,
            self.config.clone(),
            self.mutators.clone(),
            self.clock.clone(),
            self.metrics.clone(),
        );
        Ok(handle)
    }
}

#[async_trait]
impl RoomLookup for StandaloneRoomLookup {
    async fn get_or_spawn(&self, room_id: &RoomId) -> Result<RoomHandle, StorageError> {
        let mut rooms = self.rooms.lock().expect("room registry mutex poisoned");
        if let Some(handle) = rooms.get(room_id.as_str()) {
            return Ok(handle.clone());
        }
        let handle = self.spawn(room_id)?;
        rooms.insert(room_id.as_str().to_owned(), handle.clone());
        Ok(handle)
    }

    async fn existing(&self, room_id: &RoomId) -> Option<RoomHandle> {
        self.rooms.lock().expect("room registry mutex poisoned").get(room_id.as_str()).cloned()
    }

    async fn wipe(&self, room_id: &RoomId) -> Result<(), StorageError> {
        let tree = self.db.open_tree(format!("room/{}", room_id.as_str()))?;
        tree.clear()?;
        Ok(())
    }
}

/// Schedules `AuthFront::revalidate_connections` on a fixed interval; the
/// binary owns the timer, `AuthFront` only owns the logic that runs on each
/// tick.
pub async fn run_revalidation_loop(auth_front: Arc<AuthFront>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Err(err) = auth_front.revalidate_connections().await {
            tracing::warn!(error = %err, "revalidate_connections pass failed");
        }
    }
}
