//! Parses already-accepted client frames, deposits new mutations into the
//! shared [`crate::mutation_buffer::MutationBuffer`], and answers pings inline.
//! Gap/replay *admission* against `lastMutationID` happens later, in the turn
//! loop — this handler only dedupes against what has already been enqueued or
//! durably applied this session.

use roomsync_lib::ClientId;
use roomsync_protocol::{ClientFrame, Push, ServerFrame};

use crate::error::MessageError;
use crate::model::PendingMutation;

use super::state::RoomState;

/// Outcome of handling one frame: whether new work landed in the buffer, so
/// the actor knows whether to (re)start the turn loop.
pub struct MessageOutcome {
    pub enqueued_mutations: bool,
}

pub fn handle_frame(state: &mut RoomState, client_id: &ClientId, frame: ClientFrame, now_ms: i64) -> Result<MessageOutcome, MessageError> {
    match frame {
        ClientFrame::Push(push) => Ok(MessageOutcome {
            enqueued_mutations: handle_push(state, client_id, push, now_ms),
        }),
        ClientFrame::Ping => {
            if let Some(client) = state.clients.get(client_id) {
                let _ = client.sink.send(ServerFrame::Pong);
            }
            Ok(MessageOutcome { enqueued_mutations: false })
        }
        // Pull is structurally opaque to the core; answering it is an external
        // collaborator's job, so there is nothing to do here beyond having
        // already validated that it parsed as a frame.
        ClientFrame::Pull(_) => Ok(MessageOutcome { enqueued_mutations: false }),
    }
}

fn handle_push(state: &mut RoomState, client_id: &ClientId, push: Push, now_ms: i64) -> bool {
    let Some(client) = state.clients.get_mut(client_id) else {
        tracing::warn!(room_id = %state.room_id, client_id = %client_id, "push from a client with no registered session, dropping");
        return false;
    };

    let mut enqueued = false;
    for m in push.mutations {
        client.observe_clock_skew(now_ms, m.timestamp);
        if m.id <= client.highest_enqueued_id {
            continue;
        }
        client.highest_enqueued_id = m.id;
        state.buffer.push(PendingMutation {
            client_id: client_id.clone(),
            id: m.id,
            name: m.name,
            args: m.args,
            timestamp: m.timestamp,
            server_received_timestamp: now_ms,
            auth: client.user_data.clone(),
        });
        enqueued = true;
    }
    enqueued
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ChannelClientSink, ClientState};
    use crate::model::{RoomConfig, UserData};
    use crate::mutator::MutatorRegistry;
    use crate::storage::fake::MemStorage;
    use roomsync_lib::{Cookie, RoomId, SystemClock, UserId};
    use roomsync_protocol::PushMutation;
    use std::sync::Arc;

    fn state_with_client(client_id: &str) -> RoomState {
        let mut state = RoomState::new(
            RoomId::from("r1"),
            Arc::new(MemStorage::default()),
            RoomConfig::default(),
            MutatorRegistry::with_builtins(),
            Arc::new(SystemClock),
            Arc::new(crate::metrics::Metrics::new()),
        );
        let (sink, _rx) = ChannelClientSink::new();
        state.clients.insert(
            ClientId::from(client_id),
            ClientState::new(sink, UserData { user_id: UserId::from("u1"), extra: Default::default() }, Cookie::GENESIS),
        );
        state
    }

    fn push(mutations: Vec<PushMutation>) -> Push {
        Push {
            mutations,
            push_version: 0,
            schema_version: "v1".into(),
            request_id: "r1".into(),
            timestamp: 1000,
        }
    }

    #[test]
    fn push_enqueues_into_shared_buffer() {
        let mut state = state_with_client("c1");
        let frame = ClientFrame::Push(push(vec![PushMutation { id: 1, name: "inc".into(), args: serde_json::json!({"k":"x"}), timestamp: 900 }]));
        let outcome = handle_frame(&mut state, &ClientId::from("c1"), frame, 1000).unwrap();
        assert!(outcome.enqueued_mutations);
        assert_eq!(state.buffer.len(), 1);
    }

    #[test]
    fn duplicate_within_session_is_dropped_before_reaching_the_buffer() {
        let mut state = state_with_client("c1");
        let frame = ClientFrame::Push(push(vec![PushMutation { id: 1, name: "inc".into(), args: serde_json::Value::Null, timestamp: 900 }]));
        handle_frame(&mut state, &ClientId::from("c1"), frame, 1000).unwrap();
        let frame = ClientFrame::Push(push(vec![PushMutation { id: 1, name: "inc".into(), args: serde_json::Value::Null, timestamp: 950 }]));
        let outcome = handle_frame(&mut state, &ClientId::from("c1"), frame, 1100).unwrap();
        assert!(!outcome.enqueued_mutations);
        assert_eq!(state.buffer.len(), 1);
    }

    #[test]
    fn empty_push_is_a_no_op() {
        let mut state = state_with_client("c1");
        let outcome = handle_frame(&mut state, &ClientId::from("c1"), ClientFrame::Push(push(vec![])), 1000).unwrap();
        assert!(!outcome.enqueued_mutations);
        assert!(state.buffer.is_empty());
    }

    #[test]
    fn ping_replies_pong_immediately() {
        let mut state = state_with_client("c1");
        handle_frame(&mut state, &ClientId::from("c1"), ClientFrame::Ping, 1000).unwrap();
    }
}
