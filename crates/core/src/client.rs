//! The in-memory client registry: a channel-backed sender with a
//! `try_send`-and-cancel policy so one slow client can't stall the turn loop,
//! wrapped behind a small trait so the room actor never depends on a concrete
//! transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use roomsync_lib::{ClientId, Cookie};
use roomsync_protocol::ServerFrame;
use tokio::sync::mpsc;

use crate::model::UserData;

const CLIENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ClientSendError {
    #[error("client disconnected")]
    Disconnected,
    #[error("client was not responding and has been disconnected")]
    Cancelled,
}

/// A sink a room actor can push frames into without knowing whether the other
/// end is a real WebSocket, a test harness, or something else entirely.
pub trait ClientSink: Send + Sync {
    fn send(&self, frame: ServerFrame) -> Result<(), ClientSendError>;
    fn close(&self);
}

/// The production [`ClientSink`]: an mpsc channel read by the task that owns the
/// actual WebSocket. If the channel fills up (a client racking up backlog
/// without ACKing/draining), the sender aborts that client rather than let an
/// unbounded backlog build up against one slow peer.
pub struct ChannelClientSink {
    tx: mpsc::Sender<ServerFrame>,
    cancelled: AtomicBool,
}

impl ChannelClientSink {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
        (
            Arc::new(Self {
                tx,
                cancelled: AtomicBool::new(false),
            }),
            rx,
        )
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

impl ClientSink for ChannelClientSink {
    fn send(&self, frame: ServerFrame) -> Result<(), ClientSendError> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(ClientSendError::Disconnected);
        }
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ClientSendError::Disconnected),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.cancelled.store(true, Ordering::Relaxed);
                Err(ClientSendError::Cancelled)
            }
        }
    }

    fn close(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

/// In-memory session state for one connected client. Created on accepted
/// connect, destroyed on close; a reconnect always gets a fresh one and
/// forcibly closes any prior session.
pub struct ClientState {
    pub sink: Arc<dyn ClientSink>,
    pub user_data: UserData,
    /// Aligns client-submitted `timestamp`s into server time; updated as new
    /// pushes arrive. `None` until the first push.
    pub clock_behind_by_ms: Option<i64>,
    /// The cookie of the last poke actually sent to this client, i.e. the
    /// `baseCookie` its next poke must carry.
    pub last_cookie_sent: Cookie,
    pub sent_initial_presence: bool,
    /// Highest mutation id enqueued this session, seeded from the durable
    /// `ClientRecord.lastMutationID` at connect time. The message handler
    /// drops anything at or below this without ever touching the turn loop's
    /// buffer.
    pub highest_enqueued_id: u64,
}

impl ClientState {
    pub fn new(sink: Arc<dyn ClientSink>, user_data: UserData, last_cookie_sent: Cookie) -> Self {
        ClientState::with_baseline(sink, user_data, last_cookie_sent, 0)
    }

    pub fn with_baseline(sink: Arc<dyn ClientSink>, user_data: UserData, last_cookie_sent: Cookie, highest_enqueued_id: u64) -> Self {
        ClientState {
            sink,
            user_data,
            clock_behind_by_ms: None,
            last_cookie_sent,
            sent_initial_presence: false,
            highest_enqueued_id,
        }
    }

    /// EWMA-ish update: the value is only ever used to align timestamps, so a
    /// simple exponential smoothing (alpha = 0.1) gives a deterministic,
    /// monotone-ish signal without needing a full latency histogram per client.
    pub fn observe_clock_skew(&mut self, now_ms: i64, client_timestamp_ms: i64) {
        let sample = now_ms - client_timestamp_ms;
        self.clock_behind_by_ms = Some(match self.clock_behind_by_ms {
            Some(prev) => ((prev as f64) * 0.9 + (sample as f64) * 0.1) as i64,
            None => sample,
        });
    }
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: HashMap<ClientId, ClientState>,
}

impl ClientRegistry {
    pub fn insert(&mut self, client_id: ClientId, state: ClientState) -> Option<ClientState> {
        self.clients.insert(client_id, state)
    }

    pub fn get(&self, client_id: &ClientId) -> Option<&ClientState> {
        self.clients.get(client_id)
    }

    pub fn get_mut(&mut self, client_id: &ClientId) -> Option<&mut ClientState> {
        self.clients.get_mut(client_id)
    }

    pub fn remove(&mut self, client_id: &ClientId) -> Option<ClientState> {
        self.clients.remove(client_id)
    }

    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.clients.contains_key(client_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClientId, &ClientState)> {
        self.clients.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&ClientId, &mut ClientState)> {
        self.clients.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Client IDs currently connected, as a lock-free snapshot for `authConnections`.
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.clients.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_replaces_prior_client_state() {
        let mut registry = ClientRegistry::default();
        let (sink_a, _rx_a) = ChannelClientSink::new();
        let (sink_b, _rx_b) = ChannelClientSink::new();
        let user = UserData { user_id: roomsync_lib::UserId::from("u1"), extra: Default::default() };
        registry.insert(ClientId::from("c1"), ClientState::new(sink_a, user.clone(), Cookie::GENESIS));
        let old = registry.insert(ClientId::from("c1"), ClientState::new(sink_b, user, Cookie::GENESIS));
        assert!(old.is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn full_channel_cancels_sender() {
        let (sink, mut rx) = ChannelClientSink::new();
        for _ in 0..CLIENT_CHANNEL_CAPACITY {
            sink.send(ServerFrame::Pong).unwrap();
        }
        assert!(sink.send(ServerFrame::Pong).is_err());
        assert!(sink.is_cancelled());
        drop(rx.try_recv());
    }
}
