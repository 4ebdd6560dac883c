//! The time-ordered buffer of [`PendingMutation`]s across every client in a
//! room, shared by all clients (not per-client) so the turn loop can select a
//! single globally-ordered `Due` set each tick.

use std::collections::VecDeque;

use crate::model::PendingMutation;

#[derive(Default)]
pub struct MutationBuffer {
    // Arrival order == serverReceivedTimestamp order, since both are assigned at
    // enqueue time under the same single-writer actor.
    queue: VecDeque<PendingMutation>,
}

impl MutationBuffer {
    pub fn push(&mut self, mutation: PendingMutation) {
        self.queue.push_back(mutation);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Removes and returns every mutation due at `now_ms` given `buffer_ms`,
    /// ordered by `(server_received_timestamp, client_id, id)` to break ties.
    /// Mutations not yet due stay buffered.
    pub fn drain_due(&mut self, now_ms: i64, buffer_ms: i64) -> Vec<PendingMutation> {
        let mut due = Vec::new();
        let mut remaining = VecDeque::with_capacity(self.queue.len());
        for m in self.queue.drain(..) {
            if m.server_received_timestamp + buffer_ms <= now_ms {
                due.push(m);
            } else {
                remaining.push_back(m);
            }
        }
        self.queue = remaining;
        due.sort_by(|a, b| {
            (a.server_received_timestamp, a.client_id.as_str(), a.id).cmp(&(
                b.server_received_timestamp,
                b.client_id.as_str(),
                b.id,
            ))
        });
        due
    }

    /// Restores a previously-drained `Due` set to the front of the buffer,
    /// in its original order. Used when a turn fails to commit: the mutations
    /// must stay buffered and be retried, not silently disappear.
    pub fn requeue(&mut self, mutations: Vec<PendingMutation>) {
        for m in mutations.into_iter().rev() {
            self.queue.push_front(m);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomsync_lib::ClientId;

    fn mutation(client: &str, id: u64, srt: i64) -> PendingMutation {
        PendingMutation {
            client_id: ClientId::from(client),
            id,
            name: "noop".into(),
            args: serde_json::Value::Null,
            timestamp: srt,
            server_received_timestamp: srt,
            auth: crate::model::UserData {
                user_id: roomsync_lib::UserId::from("u1"),
                extra: Default::default(),
            },
        }
    }

    #[test]
    fn only_drains_mutations_past_buffer_window() {
        let mut buf = MutationBuffer::default();
        buf.push(mutation("c1", 1, 100));
        buf.push(mutation("c1", 2, 900));
        let due = buf.drain_due(1000, 200);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, 1);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn orders_by_received_time_then_client_then_id() {
        let mut buf = MutationBuffer::default();
        buf.push(mutation("c2", 1, 100));
        buf.push(mutation("c1", 2, 100));
        buf.push(mutation("c1", 1, 100));
        let due = buf.drain_due(1000, 0);
        let order: Vec<_> = due.iter().map(|m| (m.client_id.as_str().to_owned(), m.id)).collect();
        assert_eq!(order, vec![("c1".to_owned(), 1), ("c1".to_owned(), 2), ("c2".to_owned(), 1)]);
    }
}
