//! Handles a client socket closing. Deliberately thin — removing a
//! [`crate::client::ClientState`] from the live registry is the entire action;
//! the durable `connected/<id>` marker is left in place and is reconciled away
//! by the next [`super::turn::tick`] as disconnect work, so a client that drops
//! mid-turn still gets its disconnect mutator run exactly once.

use roomsync_lib::{ClientId, UserId};
use roomsync_protocol::{ErrorKind, ServerFrame};

use super::state::RoomState;

/// Drops the client's live session. Returns `true` if a session was actually
/// present (so the caller can decide whether the turn loop needs waking to run
/// the disconnect mutator).
pub fn close(state: &mut RoomState, client_id: &ClientId) -> bool {
    match state.clients.remove(client_id) {
        Some(client) => {
            client.sink.close();
            state.metrics.active_clients.dec();
            true
        }
        None => false,
    }
}

/// AuthFront's `invalidateFor{User,All}`, as seen from inside one room: tell
/// every matching client it has been invalidated and drop its live session.
/// `user_id: None` means invalidate everyone. The
/// durable `connected/<id>` markers are left for the next tick's disconnect
/// reconciliation, same as an ordinary socket close.
///
/// Returns the clients that were closed, so the caller can wake the turn loop
/// if any were.
pub fn invalidate(state: &mut RoomState, user_id: Option<&UserId>) -> Vec<ClientId> {
    let affected: Vec<ClientId> = state
        .clients
        .iter()
        .filter(|(_, client)| match user_id {
            Some(u) => &client.user_data.user_id == u,
            None => true,
        })
        .map(|(id, _)| id.clone())
        .collect();

    for client_id in &affected {
        if let Some(client) = state.clients.get(client_id) {
            let _ = client.sink.send(ServerFrame::Error(ErrorKind::AuthInvalidated, "session invalidated".to_owned()));
        }
        close(state, client_id);
    }
    affected
}
