//! The turn loop's core algorithm: mutation ordering, per-client replay
//! admission, mutator rollback-without-losing-lastMutationID, and the
//! atomic commit that produces one poke per connected client.
//!
//! **Implementation decisions recorded here:**
//! - A turn whose `Due` set resolves to zero effective changes (every mutation a
//!   duplicate, no disconnect work) does not commit: no cookie advance, no poke.
//!   Duplicate squashing is treated as authoritative over always advancing the
//!   cookie, since the former is a concrete, testable scenario.
//! - Disconnect-mutator processing runs whenever a turn proceeds at all (Due
//!   non-empty or disconnect work pending), not gated on whether the mutation
//!   loop itself staged writes — otherwise disconnect-only turns could never
//!   make progress.

use std::collections::HashMap;

use roomsync_lib::{ClientId, Cookie};
use roomsync_protocol::{ErrorKind, PatchOp, Poke};

use crate::error::StorageError;
use crate::kv::{KvTx, TurnTx};
use crate::model::{ClientRecord, MutatorCtx};
use crate::storage::to_json;

use super::state::{client_key, connected_key, RoomState, VERSION_KEY};

/// Outcome of one committed turn, ready for the actor to fan out over sockets.
pub struct TurnOutcome {
    pub cookie: Cookie,
    /// Per-client pokes, already carrying that client's correct `baseCookie`.
    pub pokes: HashMap<ClientId, Poke>,
    /// Clients that must be told a specific mutation failed (gap rejection).
    pub client_errors: Vec<(ClientId, ErrorKind, String)>,
    /// Clients whose sink rejected a send; the actor should close these.
    pub failed_sends: Vec<ClientId>,
}

/// Runs one tick. Returns `Ok(None)` if the room is idle (nothing due, no
/// disconnect work) or the due set resolved to no effective change. The caller
/// is expected to have this run under the room's [`crate::turn_lock::TurnLock`].
pub fn tick(state: &mut RoomState, now_ms: i64) -> Result<Option<TurnOutcome>, StorageError> {
    let due = state.buffer.drain_due(now_ms, state.buffer_sizer.current_ms());
    for m in &due {
        state.buffer_sizer.observe((now_ms - m.server_received_timestamp).max(0));
    }
    state.buffer_sizer.maybe_adjust(now_ms);

    let durable_connected = state.connected_set()?;
    let live: std::collections::HashSet<ClientId> = state.clients.client_ids().into_iter().collect();
    let stale: Vec<ClientId> = durable_connected.difference(&live).cloned().collect();

    if due.is_empty() && stale.is_empty() {
        return Ok(None);
    }

    let room_id = state.room_id.as_str().to_owned();
    let _turn_timer = state.metrics.turn_duration.with_label_values(&[&room_id]).start_timer();

    let current_version = state.current_version()?;
    let next_cookie = current_version.next();

    let mut tx = TurnTx::new(state.storage.as_ref());
    let mut record_cache: HashMap<ClientId, ClientRecord> = HashMap::new();
    let mut changed_records: HashMap<ClientId, ClientRecord> = HashMap::new();
    let mut lmid_changes: HashMap<String, u64> = HashMap::new();
    let mut client_errors = Vec::new();

    for m in &due {
        let rec = match record_cache.get(&m.client_id) {
            Some(r) => r.clone(),
            None => {
                let loaded = state
                    .client_record(&m.client_id)?
                    .unwrap_or_else(|| ClientRecord::fresh(m.auth.user_id.clone()));
                record_cache.insert(m.client_id.clone(), loaded.clone());
                loaded
            }
        };

        if m.id <= rec.last_mutation_id {
            // Idempotent replay: silently dropped, no state change at all.
            state.metrics.mutations_skipped.with_label_values(&[&room_id, "duplicate"]).inc();
            continue;
        }

        if m.id > rec.last_mutation_id + 1 {
            client_errors.push((
                m.client_id.clone(),
                ErrorKind::ClientNotFound,
                format!("mutation id {} skips ahead of lastMutationID {}", m.id, rec.last_mutation_id),
            ));
            state.metrics.mutations_skipped.with_label_values(&[&room_id, "gap"]).inc();
            continue;
        }

        match state.mutators.get(&m.name) {
            Some(mutator) => {
                let ctx = MutatorCtx {
                    auth: m.auth.clone(),
                    mutation_id: m.id,
                    client_id: m.client_id.clone(),
                    version: next_cookie,
                };
                let checkpoint = tx.checkpoint();
                if let Err(err) = mutator.call(&mut tx, &m.args, &ctx) {
                    tracing::warn!(room_id = %state.room_id, client_id = %m.client_id, mutation_id = m.id, error = %err, "mutator failed, rolling back its writes");
                    tx.restore(checkpoint);
                    state.metrics.mutations_failed.with_label_values(&[&room_id]).inc();
                } else {
                    state.metrics.mutations_applied.with_label_values(&[&room_id]).inc();
                }
            }
            None => {
                tracing::warn!(room_id = %state.room_id, mutator = %m.name, "no mutator registered with this name, skipping");
                state.metrics.mutations_skipped.with_label_values(&[&room_id, "no_mutator"]).inc();
            }
        }

        let mut new_rec = rec;
        new_rec.last_mutation_id = m.id;
        new_rec.last_mutation_id_version = next_cookie;
        record_cache.insert(m.client_id.clone(), new_rec.clone());
        changed_records.insert(m.client_id.clone(), new_rec);
        lmid_changes.insert(m.client_id.as_str().to_owned(), m.id);
    }

    // Disconnect mutators: clients the durable connected-set still lists but
    // whose in-memory session is gone.
    let disconnect_mutator_name = "disconnect";
    for client_id in &stale {
        if let Some(mutator) = state.mutators.get(disconnect_mutator_name) {
            let rec = record_cache
                .get(client_id)
                .cloned()
                .or(state.client_record(client_id)?)
                .unwrap_or_else(|| ClientRecord::fresh(roomsync_lib::UserId::from("")));
            let ctx = MutatorCtx {
                auth: crate::model::UserData { user_id: rec.user_id.clone(), extra: Default::default() },
                mutation_id: rec.last_mutation_id,
                client_id: client_id.clone(),
                version: next_cookie,
            };
            let checkpoint = tx.checkpoint();
            if let Err(err) = mutator.call(&mut tx, &serde_json::Value::Null, &ctx) {
                tracing::warn!(room_id = %state.room_id, client_id = %client_id, error = %err, "disconnect mutator failed, rolling back its writes");
                tx.restore(checkpoint);
            }
        }
    }

    if tx.is_empty() && changed_records.is_empty() && stale.is_empty() {
        // Entire due set was idempotent duplicates or unresolvable gaps; no
        // effective change, so no turn commits (see module-level decision note).
        for (client_id, kind, detail) in &client_errors {
            tracing::debug!(room_id = %state.room_id, client_id = %client_id, kind = %kind, detail, "mutation rejected without a committed turn");
        }
        return Ok(Some(TurnOutcome {
            cookie: current_version,
            pokes: HashMap::new(),
            client_errors,
            failed_sends: Vec::new(),
        }));
    }

    let (patch, mut batch) = tx.into_diff();
    batch.put(VERSION_KEY, to_json(&next_cookie));
    for (client_id, record) in &changed_records {
        batch.put(client_key(client_id), to_json(record));
    }
    for client_id in &stale {
        batch.delete(connected_key(client_id));
    }

    if let Err(err) = state.storage.commit(batch) {
        // The whole turn is rolled back: nothing durable changed, so the
        // drained mutations must go back into the buffer for the next tick
        // to retry, preserving per-client FIFO ordering.
        state.buffer.requeue(due);
        return Err(err);
    }
    if let Err(err) = state.storage.flush() {
        state.buffer.requeue(due);
        return Err(err);
    }
    state.metrics.turns_committed.with_label_values(&[&room_id]).inc();

    let mut pokes = HashMap::new();
    let mut failed_sends = Vec::new();
    let request_id = String::new();
    for (client_id, client_state) in state.clients.iter_mut() {
        let poke = Poke {
            base_cookie: client_state.last_cookie_sent.value(),
            cookie: next_cookie.value().expect("turn commits always assign a concrete cookie"),
            last_mutation_id_changes: lmid_changes.clone(),
            patch: patch.clone(),
            timestamp: now_ms,
            request_id: request_id.clone(),
        };
        if client_state.sink.send(roomsync_protocol::ServerFrame::Poke(poke.clone())).is_err() {
            failed_sends.push(client_id.clone());
        }
        state.metrics.pokes_sent.with_label_values(&[&room_id]).inc();
        client_state.last_cookie_sent = next_cookie;
        pokes.insert(client_id.clone(), poke);
    }

    Ok(Some(TurnOutcome {
        cookie: next_cookie,
        pokes,
        client_errors,
        failed_sends,
    }))
}

/// Renders a gap-rejection error as the frame the client actually receives.
pub fn client_not_found_frame(detail: &str) -> roomsync_protocol::ServerFrame {
    roomsync_protocol::ServerFrame::Error(ErrorKind::ClientNotFound, detail.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ChannelClientSink, ClientState};
    use crate::model::{PendingMutation, UserData};
    use crate::mutator::MutatorRegistry;
    use crate::storage::fake::MemStorage;
    use crate::storage::{Storage, WriteBatch};
    use roomsync_lib::{SystemClock, UserId};
    use serde_json::Value;
    use std::sync::Arc;

    /// A [`Storage`] whose `commit` always fails, for exercising the turn
    /// loop's rollback-and-requeue path without touching a real backend.
    struct FailingStorage {
        inner: MemStorage,
    }

    impl Storage for FailingStorage {
        fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
            self.inner.get(key)
        }

        fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, StorageError> {
            self.inner.list_prefix(prefix)
        }

        fn commit(&self, _batch: WriteBatch) -> Result<(), StorageError> {
            let source = serde_json::from_str::<Value>("not json").unwrap_err();
            Err(StorageError::Corrupt { key: "x".into(), source })
        }

        fn flush(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    fn push(state: &mut RoomState, client_id: &str, id: u64, name: &str, args: serde_json::Value, now_ms: i64) {
        state.buffer.push(PendingMutation {
            client_id: ClientId::from(client_id),
            id,
            name: name.to_owned(),
            args,
            timestamp: now_ms,
            server_received_timestamp: now_ms,
            auth: UserData { user_id: UserId::from("u1"), extra: Default::default() },
        });
    }

    fn fresh_state() -> RoomState {
        let mut state = RoomState::new(
            roomsync_lib::RoomId::from("r1"),
            Arc::new(MemStorage::default()),
            crate::model::RoomConfig { buffer_initial_ms: 0, ..Default::default() },
            MutatorRegistry::with_builtins(),
            Arc::new(SystemClock),
            Arc::new(crate::metrics::Metrics::new()),
        );
        let (sink, _rx) = ChannelClientSink::new();
        state.clients.insert(
            ClientId::from("c1"),
            ClientState::new(sink, UserData { user_id: UserId::from("u1"), extra: Default::default() }, Cookie::GENESIS),
        );
        state
    }

    #[test]
    fn idle_room_with_nothing_due_produces_no_turn() {
        let mut state = fresh_state();
        assert!(tick(&mut state, 1000).unwrap().is_none());
    }

    #[test]
    fn applying_a_mutation_advances_cookie_and_produces_a_poke() {
        let mut state = fresh_state();
        push(&mut state, "c1", 1, "inc", serde_json::json!({"k": "x"}), 1000);
        let outcome = tick(&mut state, 1000).unwrap().unwrap();
        assert_eq!(outcome.cookie, Cookie(Some(0)));
        let poke = &outcome.pokes[&ClientId::from("c1")];
        assert_eq!(poke.base_cookie, None);
        assert_eq!(poke.cookie, 0);
        assert_eq!(poke.patch, vec![PatchOp::Put { key: "x".into(), value: serde_json::json!(1) }]);
        assert_eq!(poke.last_mutation_id_changes["c1"], 1);
    }

    #[test]
    fn duplicate_mutation_does_not_advance_cookie() {
        let mut state = fresh_state();
        // First apply id=1 so lastMutationID becomes 1.
        push(&mut state, "c1", 1, "inc", serde_json::json!({"k": "x"}), 1000);
        tick(&mut state, 1000).unwrap();
        // Replaying id=1 again must be a pure no-op: no new turn.
        push(&mut state, "c1", 1, "inc", serde_json::json!({"k": "x"}), 2000);
        let outcome = tick(&mut state, 2000).unwrap().unwrap();
        assert!(outcome.pokes.is_empty());
        assert_eq!(outcome.cookie, Cookie(Some(0)));
    }

    #[test]
    fn commit_failure_requeues_due_mutations_instead_of_dropping_them() {
        let mut state = RoomState::new(
            roomsync_lib::RoomId::from("r1"),
            Arc::new(FailingStorage { inner: MemStorage::default() }),
            crate::model::RoomConfig { buffer_initial_ms: 0, ..Default::default() },
            MutatorRegistry::with_builtins(),
            Arc::new(SystemClock),
            Arc::new(crate::metrics::Metrics::new()),
        );
        let (sink, _rx) = ChannelClientSink::new();
        state.clients.insert(
            ClientId::from("c1"),
            ClientState::new(sink, UserData { user_id: UserId::from("u1"), extra: Default::default() }, Cookie::GENESIS),
        );
        push(&mut state, "c1", 1, "inc", serde_json::json!({"k": "x"}), 1000);

        assert!(tick(&mut state, 1000).is_err());

        // The mutation must still be buffered, not silently dropped, so the
        // next tick's retry can make progress without creating a gap.
        assert_eq!(state.buffer.len(), 1);
        assert_eq!(state.current_version().unwrap(), Cookie::GENESIS);
    }

    #[test]
    fn gap_is_rejected_and_lmid_does_not_advance() {
        let mut state = fresh_state();
        push(&mut state, "c1", 3, "inc", serde_json::json!({"k": "x"}), 1000);
        let outcome = tick(&mut state, 1000).unwrap().unwrap();
        assert!(outcome.pokes.is_empty());
        assert_eq!(outcome.client_errors.len(), 1);
        assert_eq!(outcome.client_errors[0].1, ErrorKind::ClientNotFound);
        let rec = state.client_record(&ClientId::from("c1")).unwrap();
        assert!(rec.is_none());
    }

    #[test]
    fn missing_mutator_still_advances_lmid_with_no_writes() {
        let mut state = fresh_state();
        push(&mut state, "c1", 1, "no_such_mutator", serde_json::json!({}), 1000);
        let outcome = tick(&mut state, 1000).unwrap().unwrap();
        assert!(outcome.pokes[&ClientId::from("c1")].patch.is_empty());
        assert_eq!(outcome.pokes[&ClientId::from("c1")].last_mutation_id_changes["c1"], 1);
        let rec = state.client_record(&ClientId::from("c1")).unwrap().unwrap();
        assert_eq!(rec.last_mutation_id, 1);
    }
}
