//! AuthFront's invalidation and revalidation machinery. All three
//! `invalidate*` entry points take the auth lock in exclusive mode to exclude
//! races with `connect` — there is no separate room-record lock on this path,
//! the auth lock's exclusivity is the only guarantee needed.

use std::collections::{HashMap, HashSet};

use roomsync_lib::{ClientId, RoomId, UserId};

use crate::error::DispatchError;

use super::AuthFront;

impl AuthFront {
    /// Closes every live connection for `user_id`, across every room it's
    /// currently recorded in. First error wins for the returned `Result`;
    /// every room's outcome is logged.
    pub async fn invalidate_for_user(&self, user_id: &UserId) -> Result<(), DispatchError> {
        let _guard = self.lock.write().await;
        let room_ids: HashSet<RoomId> = self
            .connections
            .list_for_user(user_id)?
            .into_iter()
            .map(|(room_id, _)| room_id)
            .collect();
        self.fan_out_invalidate("user", room_ids.into_iter(), Some(user_id.clone())).await
    }

    /// Closes every live connection in `room_id`, regardless of user.
    pub async fn invalidate_for_room(&self, room_id: &RoomId) -> Result<(), DispatchError> {
        let _guard = self.lock.write().await;
        self.room_records
            .get(room_id)
            .map_err(DispatchError::Internal)?
            .ok_or_else(|| DispatchError::RoomNotFound(room_id.to_string()))?;
        self.fan_out_invalidate("room", std::iter::once(room_id.clone()), None).await
    }

    /// Closes every live connection in every room.
    pub async fn invalidate_all(&self) -> Result<(), DispatchError> {
        let _guard = self.lock.write().await;
        let room_ids: HashSet<RoomId> = self.connections.list_all()?.into_iter().map(|(_, room_id, _)| room_id).collect();
        self.fan_out_invalidate("all", room_ids.into_iter(), None).await
    }

    /// Fans the invalidate call out across every given room's actor, awaiting
    /// all of them before returning an aggregate result. A room with no live
    /// actor has nothing to invalidate and is skipped rather than treated as
    /// an error.
    async fn fan_out_invalidate(&self, kind: &str, room_ids: impl Iterator<Item = RoomId>, user_id: Option<UserId>) -> Result<(), DispatchError> {
        let _timer = self.metrics.invalidation_fanout_duration.with_label_values(&[kind]).start_timer();
        let handles: Vec<(RoomId, crate::room::RoomHandle)> = {
            let mut resolved = Vec::new();
            for room_id in room_ids {
                if let Some(handle) = self.rooms.existing(&room_id).await {
                    resolved.push((room_id, handle));
                }
            }
            resolved
        };

        let outcomes = futures::future::join_all(handles.into_iter().map(|(room_id, handle)| {
            let user_id = user_id.clone();
            async move {
                let result = handle.invalidate(user_id).await;
                (room_id, result)
            }
        }))
        .await;

        let mut first_error = None;
        for (room_id, result) in outcomes {
            if result.is_err() {
                tracing::warn!(room_id = %room_id, "invalidate failed: room actor is no longer running");
                first_error.get_or_insert(DispatchError::RoomNotFound(room_id.to_string()));
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Scheduled reconciliation: for every room with recorded connections, ask
    /// the room which clients it
    /// actually believes are connected and delete any `ConnectionRecord` the
    /// room no longer reports. A room with no live actor at all is treated as
    /// reporting an empty set — every record for it is stale.
    pub async fn revalidate_connections(&self) -> Result<(), DispatchError> {
        let all = self.connections.list_all()?;
        let mut by_room: HashMap<RoomId, Vec<(UserId, ClientId)>> = HashMap::new();
        for (user_id, room_id, client_id) in all {
            by_room.entry(room_id).or_default().push((user_id, client_id));
        }

        for (room_id, recorded) in by_room {
            let live: HashSet<ClientId> = match self.rooms.existing(&room_id).await {
                Some(handle) => match handle.connected_client_ids().await {
                    Ok(ids) => ids.into_iter().collect(),
                    Err(_) => {
                        tracing::warn!(room_id = %room_id, "revalidate: room actor stopped mid-query, retrying next schedule");
                        continue;
                    }
                },
                None => HashSet::new(),
            };

            for (user_id, client_id) in recorded {
                if !live.contains(&client_id) {
                    if let Err(err) = self.connections.delete(&user_id, &room_id, &client_id) {
                        tracing::warn!(room_id = %room_id, client_id = %client_id, error = %err, "revalidate: failed to delete stale connection record");
                    }
                }
            }
        }
        Ok(())
    }
}
