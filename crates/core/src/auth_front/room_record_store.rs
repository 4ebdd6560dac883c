//! AuthFront's durable directory, `roomID → RoomRecord`: one logical tree with
//! typed accessors, backed by the same generic [`Storage`] trait RoomCore uses
//! rather than a dedicated sled tree type, since both sides of this fabric
//! already agree on JSON-valued keys.

use roomsync_lib::RoomId;

use crate::error::StorageError;
use crate::model::{RoomRecord, RoomStatus};
use crate::storage::{to_json, Storage, WriteBatch};

fn room_key(room_id: &RoomId) -> String {
    format!("room/{room_id}")
}

pub struct RoomRecordStore<S: Storage + ?Sized> {
    storage: std::sync::Arc<S>,
}

impl<S: Storage + ?Sized> RoomRecordStore<S> {
    pub fn new(storage: std::sync::Arc<S>) -> Self {
        RoomRecordStore { storage }
    }

    pub fn get(&self, room_id: &RoomId) -> Result<Option<RoomRecord>, StorageError> {
        self.storage.get_typed(&room_key(room_id))
    }

    /// `createRoom`: idempotent. A second call against an existing Open room
    /// is a no-op that returns the existing record unchanged.
    pub fn ensure_open(&self, room_id: &RoomId) -> Result<RoomRecord, StorageError> {
        if let Some(existing) = self.get(room_id)? {
            if existing.status == RoomStatus::Open {
                return Ok(existing);
            }
        }
        let record = RoomRecord {
            room_id: room_id.clone(),
            object_id: room_id.to_string(),
            status: RoomStatus::Open,
        };
        let mut batch = WriteBatch::new();
        batch.put(room_key(room_id), to_json(&record));
        self.storage.commit(batch)?;
        Ok(record)
    }

    pub fn set_status(&self, room_id: &RoomId, status: RoomStatus) -> Result<Option<RoomRecord>, StorageError> {
        let Some(mut record) = self.get(room_id)? else {
            return Ok(None);
        };
        record.status = status;
        let mut batch = WriteBatch::new();
        batch.put(room_key(room_id), to_json(&record));
        self.storage.commit(batch)?;
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fake::MemStorage;
    use std::sync::Arc;

    #[test]
    fn ensure_open_is_idempotent() {
        let store = RoomRecordStore::new(Arc::new(MemStorage::default()));
        let first = store.ensure_open(&RoomId::from("r1")).unwrap();
        let second = store.ensure_open(&RoomId::from("r1")).unwrap();
        assert_eq!(first.object_id, second.object_id);
        assert_eq!(second.status, RoomStatus::Open);
    }

    #[test]
    fn ensure_open_reopens_a_closed_room() {
        let store = RoomRecordStore::new(Arc::new(MemStorage::default()));
        store.ensure_open(&RoomId::from("r1")).unwrap();
        store.set_status(&RoomId::from("r1"), RoomStatus::Closed).unwrap();
        let reopened = store.ensure_open(&RoomId::from("r1")).unwrap();
        assert_eq!(reopened.status, RoomStatus::Open);
    }

    #[test]
    fn missing_room_status_change_is_a_no_op() {
        let store = RoomRecordStore::new(Arc::new(MemStorage::default()));
        assert!(store.set_status(&RoomId::from("ghost"), RoomStatus::Closed).unwrap().is_none());
    }
}
