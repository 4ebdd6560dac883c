//! Connect admission logic against [`RoomState`] — the caller
//! (the room actor) is responsible for the actual socket wiring and the
//! storage commit the admitted record implies, so this stays trivially unit
//! testable against the in-memory storage fake.

use roomsync_lib::{ClientId, Cookie};

use crate::error::ConnectError;
use crate::model::{ClientRecord, UserData};
use crate::storage::WriteBatch;

use super::state::RoomState;

/// Everything parsed out of the `GET /connect?...` query string and the
/// `user-data` header by the HTTP layer.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub client_id: ClientId,
    pub base_cookie: Cookie,
    pub timestamp: i64,
    pub lmid: u64,
    pub wsid: Option<String>,
    pub user_data: UserData,
}

/// The admitted connect's durable side-effect plus everything the caller
/// needs to finish installing the `ClientState`.
pub struct ConnectAdmission {
    pub record: ClientRecord,
    pub batch: WriteBatch,
    pub last_cookie_sent: Cookie,
}

/// Cookie/LMID admission and `ClientRecord` reconciliation, without touching
/// `ClientRegistry` — forcing out a prior session, installing the new one, and
/// sending `connected` are the actor's job since they require the live socket
/// sink.
pub fn admit(state: &RoomState, req: &ConnectRequest) -> Result<ConnectAdmission, ConnectError> {
    let existing = state.client_record(&req.client_id)?;
    let stored_lmid = existing.as_ref().map(|r| r.last_mutation_id).unwrap_or(0);
    let current_version = state.current_version()?;

    if !req.base_cookie.is_admissible_base_for(current_version) {
        return Err(ConnectError::UnexpectedBaseCookie {
            requested: req.base_cookie.value(),
            current: current_version.value(),
        });
    }
    if req.lmid > stored_lmid {
        return Err(ConnectError::UnexpectedLmid {
            requested: req.lmid,
            stored: stored_lmid,
        });
    }

    let record = ClientRecord {
        base_cookie: req.base_cookie,
        last_mutation_id: stored_lmid,
        last_mutation_id_version: existing.map(|r| r.last_mutation_id_version).unwrap_or(Cookie::GENESIS),
        user_id: req.user_data.user_id.clone(),
    };

    let mut batch = WriteBatch::new();
    RoomState::stage_client_record(&mut batch, &req.client_id, &record);

    Ok(ConnectAdmission {
        record,
        batch,
        last_cookie_sent: req.base_cookie,
    })
}
