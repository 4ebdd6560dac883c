//! AuthFront's durable per-`(user,room,client)` presence marker, keyed so both
//! "every room a user is in" (`invalidateForUser`) and "every connection
//! anywhere" (`invalidateAll`, revalidation) are plain prefix scans. The same
//! [`Storage`]-backed, JSON-valued-tree shape as [`super::room_record_store::RoomRecordStore`].

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use roomsync_lib::{ClientId, RoomId, UserId};

use crate::error::StorageError;
use crate::model::ConnectionRecord;
use crate::storage::{to_json, Storage, WriteBatch};

/// Percent-encode path segments so a `/` inside a user/room/client id can never
/// be confused with the key's own delimiters.
const SEGMENT: &AsciiSet = &CONTROLS.add(b'/').add(b'%');

fn enc(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

fn dec(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

const PREFIX: &str = "connection/";

fn user_prefix(user_id: &UserId) -> String {
    format!("{PREFIX}{}/", enc(user_id.as_str()))
}

fn connection_key(user_id: &UserId, room_id: &RoomId, client_id: &ClientId) -> String {
    format!("{}{}/{}/", user_prefix(user_id), enc(room_id.as_str()), enc(client_id.as_str()))
}

/// Parses a `connection/<user>/<room>/<client>/` key back into its three parts.
/// Returns `None` for anything that doesn't match the shape (defensive against a
/// hand-edited or corrupt tree rather than an expected runtime path).
fn parse_key(key: &str) -> Option<(UserId, RoomId, ClientId)> {
    let rest = key.strip_prefix(PREFIX)?;
    let mut parts = rest.split('/');
    let user = parts.next()?;
    let room = parts.next()?;
    let client = parts.next()?;
    if parts.next() != Some("") || parts.next().is_some() {
        return None;
    }
    Some((UserId::from(dec(user)), RoomId::from(dec(room)), ClientId::from(dec(client))))
}

pub struct ConnectionRecordStore<S: Storage + ?Sized> {
    storage: std::sync::Arc<S>,
}

impl<S: Storage + ?Sized> ConnectionRecordStore<S> {
    pub fn new(storage: std::sync::Arc<S>) -> Self {
        ConnectionRecordStore { storage }
    }

    /// Written unconditionally before the upgrade is forwarded — if the
    /// upgrade subsequently fails, the record is reclaimed by revalidation
    /// rather than rolled back inline.
    pub fn put(&self, user_id: &UserId, room_id: &RoomId, client_id: &ClientId, connect_timestamp: i64) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        batch.put(connection_key(user_id, room_id, client_id), to_json(&ConnectionRecord { connect_timestamp }));
        self.storage.commit(batch)
    }

    pub fn delete(&self, user_id: &UserId, room_id: &RoomId, client_id: &ClientId) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        batch.delete(connection_key(user_id, room_id, client_id));
        self.storage.commit(batch)
    }

    /// Every `(roomID, clientID)` pair recorded for `user_id`, for `invalidateForUser`.
    pub fn list_for_user(&self, user_id: &UserId) -> Result<Vec<(RoomId, ClientId)>, StorageError> {
        Ok(self
            .storage
            .list_prefix(&user_prefix(user_id))?
            .into_iter()
            .filter_map(|(key, _)| parse_key(&key).map(|(_, room_id, client_id)| (room_id, client_id)))
            .collect())
    }

    /// Every recorded connection, for `invalidateAll` and revalidation, each of
    /// which needs to group by roomID rather than userID.
    pub fn list_all(&self) -> Result<Vec<(UserId, RoomId, ClientId)>, StorageError> {
        Ok(self
            .storage
            .list_prefix(PREFIX)?
            .into_iter()
            .filter_map(|(key, _)| parse_key(&key))
            .collect())
    }
}
