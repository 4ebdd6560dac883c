//! RoomCore's command loop: one tokio task per room, the sole holder of
//! `&mut RoomState`, dispatching off a single mpsc receiver. `RoomHandle`
//! is the cheap, cloneable front a caller (AuthFront, the HTTP layer) holds
//! instead of the state itself.

use std::sync::Arc;
use std::time::Duration;

use roomsync_lib::{ClientId, Clock, RoomId, UserId};
use roomsync_protocol::{ClientFrame, ServerFrame};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::client::{ClientSink, ClientState};
use crate::error::{ConnectError, MessageError};
use crate::metrics::Metrics;
use crate::model::RoomConfig;
use crate::mutator::MutatorRegistry;
use crate::storage::Storage;
use crate::turn_lock::TurnLock;

use super::connect::{self, ConnectRequest};
use super::state::RoomState;
use super::{close, message, turn};

const COMMAND_CHANNEL_CAPACITY: usize = 1024;

/// Ceiling for the turn retry backoff after a storage commit failure.
const MAX_TURN_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Everything a connect needs beyond [`ConnectRequest`]: the transport sink
/// the actor should install, supplied by the caller so the room never knows
/// whether it's talking to a real socket or a test harness.
pub struct ConnectCommand {
    pub req: ConnectRequest,
    pub sink: Arc<dyn ClientSink>,
}

enum RoomCommand {
    Connect {
        cmd: ConnectCommand,
        respond_to: oneshot::Sender<Result<(), ConnectError>>,
    },
    Frame {
        client_id: ClientId,
        frame: ClientFrame,
        respond_to: oneshot::Sender<Result<(), MessageError>>,
    },
    Close {
        client_id: ClientId,
    },
    Invalidate {
        user_id: Option<UserId>,
        respond_to: oneshot::Sender<()>,
    },
    ConnectedClientIds {
        respond_to: oneshot::Sender<Vec<ClientId>>,
    },
    Shutdown,
}

/// A cheap, cloneable handle to a running room actor. Dropping every handle
/// does not stop the room; callers that own the room's lifecycle hold this
/// alongside a `JoinHandle` and send `Shutdown` explicitly.
#[derive(Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    tx: mpsc::Sender<RoomCommand>,
}

#[derive(Debug, thiserror::Error)]
#[error("room actor is no longer running")]
pub struct RoomGone;

impl RoomHandle {
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub async fn connect(&self, cmd: ConnectCommand) -> Result<Result<(), ConnectError>, RoomGone> {
        let (respond_to, rx) = oneshot::channel();
        self.tx.send(RoomCommand::Connect { cmd, respond_to }).await.map_err(|_| RoomGone)?;
        rx.await.map_err(|_| RoomGone)
    }

    pub async fn frame(&self, client_id: ClientId, frame: ClientFrame) -> Result<Result<(), MessageError>, RoomGone> {
        let (respond_to, rx) = oneshot::channel();
        self.tx.send(RoomCommand::Frame { client_id, frame, respond_to }).await.map_err(|_| RoomGone)?;
        rx.await.map_err(|_| RoomGone)
    }

    pub async fn close(&self, client_id: ClientId) -> Result<(), RoomGone> {
        self.tx.send(RoomCommand::Close { client_id }).await.map_err(|_| RoomGone)
    }

    /// `user_id: None` invalidates every connection in the room (`invalidateAll`/
    /// `invalidateForRoom`); `Some` targets one user (`invalidateForUser`).
    pub async fn invalidate(&self, user_id: Option<UserId>) -> Result<(), RoomGone> {
        let (respond_to, rx) = oneshot::channel();
        self.tx.send(RoomCommand::Invalidate { user_id, respond_to }).await.map_err(|_| RoomGone)?;
        rx.await.map_err(|_| RoomGone)
    }

    /// Lock-free `authConnections`: a snapshot of who the room currently
    /// believes is connected, used by AuthFront's revalidation sweep.
    pub async fn connected_client_ids(&self) -> Result<Vec<ClientId>, RoomGone> {
        let (respond_to, rx) = oneshot::channel();
        self.tx.send(RoomCommand::ConnectedClientIds { respond_to }).await.map_err(|_| RoomGone)?;
        rx.await.map_err(|_| RoomGone)
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(RoomCommand::Shutdown).await;
    }
}

/// Spawns a room actor and returns a handle to it. The returned `JoinHandle`
/// resolves once the actor processes `Shutdown` or every `RoomHandle` is
/// dropped and the command channel closes.
pub fn spawn(
    room_id: RoomId,
    storage: Arc<dyn Storage>,
    config: RoomConfig,
    mutators: MutatorRegistry,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
) -> (RoomHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let handle = RoomHandle { room_id: room_id.clone(), tx };
    let turn_lock = Arc::new(TurnLock::new(room_id.clone()));
    let state = RoomState::new(room_id, storage, config, mutators, clock, metrics);
    let join = tokio::spawn(run(state, rx, turn_lock));
    (handle, join)
}

async fn run(mut state: RoomState, mut rx: mpsc::Receiver<RoomCommand>, turn_lock: Arc<TurnLock>) {
    let turn_duration = state.config.turn_duration;
    // The turn timer only runs while there's work to do; `None` means idle,
    // matched against a never-ready branch.
    let mut next_tick: Option<Instant> = None;
    // Set only while the previous tick failed to commit; escalates 1.5x per
    // consecutive failure, capped at `MAX_TURN_RETRY_BACKOFF`, and resets to
    // `None` the moment a tick succeeds (committed or legitimately idle).
    let mut retry_backoff: Option<Duration> = None;
    state.metrics.active_rooms.inc();

    loop {
        let sleep = match next_tick {
            Some(at) => tokio::time::sleep_until(at),
            None => tokio::time::sleep(Duration::from_secs(u64::MAX / 2)),
        };

        tokio::select! {
            biased;

            cmd = rx.recv() => {
                match cmd {
                    Some(RoomCommand::Connect { cmd, respond_to }) => {
                        let result = handle_connect(&mut state, cmd);
                        let _ = respond_to.send(result);
                    }
                    Some(RoomCommand::Frame { client_id, frame, respond_to }) => {
                        let now_ms = state.clock.now_millis();
                        let result = message::handle_frame(&mut state, &client_id, frame, now_ms);
                        let enqueued = result.as_ref().map(|o| o.enqueued_mutations).unwrap_or(false);
                        let _ = respond_to.send(result.map(|_| ()));
                        if enqueued && next_tick.is_none() {
                            next_tick = Some(Instant::now() + turn_duration);
                        }
                    }
                    Some(RoomCommand::Close { client_id }) => {
                        if close::close(&mut state, &client_id) && next_tick.is_none() {
                            next_tick = Some(Instant::now() + turn_duration);
                        }
                    }
                    Some(RoomCommand::Invalidate { user_id, respond_to }) => {
                        let closed = close::invalidate(&mut state, user_id.as_ref());
                        if !closed.is_empty() && next_tick.is_none() {
                            next_tick = Some(Instant::now() + turn_duration);
                        }
                        let _ = respond_to.send(());
                    }
                    Some(RoomCommand::ConnectedClientIds { respond_to }) => {
                        let _ = respond_to.send(state.clients.client_ids());
                    }
                    Some(RoomCommand::Shutdown) | None => {
                        turn_lock.shut_down();
                        state.closing = true;
                        break;
                    }
                }
            }

            _ = sleep, if next_tick.is_some() => {
                let now_ms = state.clock.now_millis();
                let tick_result = turn_lock.with_lock("turn", turn_duration, async {
                    turn::tick(&mut state, now_ms)
                }).await;

                let mut delay = turn_duration;
                match tick_result {
                    Ok(Ok(Some(outcome))) => {
                        retry_backoff = None;
                        for client_id in &outcome.failed_sends {
                            close::close(&mut state, client_id);
                        }
                        for (client_id, kind, detail) in &outcome.client_errors {
                            if let Some(client) = state.clients.get(client_id) {
                                let _ = client.sink.send(ServerFrame::Error(*kind, detail.clone()));
                            }
                        }
                    }
                    Ok(Ok(None)) => {
                        retry_backoff = None;
                    }
                    Ok(Err(err)) => {
                        let next_backoff = retry_backoff
                            .unwrap_or(turn_duration)
                            .mul_f64(1.5)
                            .min(MAX_TURN_RETRY_BACKOFF);
                        tracing::warn!(
                            room_id = %state.room_id,
                            error = %err,
                            backoff_ms = next_backoff.as_millis() as u64,
                            "turn commit failed, retrying with backoff",
                        );
                        retry_backoff = Some(next_backoff);
                        delay = next_backoff;
                    }
                    Err(_) => {
                        // Lock closed out from under us: only happens once we've
                        // already decided to shut down.
                    }
                }

                next_tick = if state.buffer.is_empty() && !has_disconnect_work(&state) {
                    None
                } else {
                    Some(Instant::now() + delay)
                };
            }
        }
    }

    state.metrics.active_rooms.dec();
}

/// `true` if the durable connected set still lists someone whose live session
/// is gone, i.e. there's disconnect-mutator work the next tick needs to do.
fn has_disconnect_work(state: &RoomState) -> bool {
    let durable = match state.connected_set() {
        Ok(set) => set,
        Err(_) => return false,
    };
    let live: std::collections::HashSet<ClientId> = state.clients.client_ids().into_iter().collect();
    durable.difference(&live).next().is_some()
}

fn handle_connect(state: &mut RoomState, cmd: ConnectCommand) -> Result<(), ConnectError> {
    let admission = connect::admit(state, &cmd.req)?;
    state.storage.commit(admission.batch).map_err(ConnectError::Internal)?;

    if let Some(prior) = state.clients.remove(&cmd.req.client_id) {
        prior.sink.close();
        state.metrics.active_clients.dec();
    }

    let client_state = ClientState::with_baseline(
        cmd.sink.clone(),
        cmd.req.user_data.clone(),
        admission.last_cookie_sent,
        admission.record.last_mutation_id,
    );
    state.clients.insert(cmd.req.client_id.clone(), client_state);
    state.metrics.active_clients.inc();

    let _ = cmd.sink.send(ServerFrame::Connected { wsid: cmd.req.wsid.clone() });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChannelClientSink;
    use crate::model::UserData;
    use crate::storage::fake::MemStorage;
    use roomsync_lib::{Cookie, SystemClock};
    use roomsync_protocol::frame::{Push, PushMutation};
    use std::time::Duration as StdDuration;

    fn connect_request(client_id: &str, user_id: &str) -> ConnectRequest {
        ConnectRequest {
            client_id: ClientId::from(client_id),
            base_cookie: Cookie::GENESIS,
            timestamp: 0,
            lmid: 0,
            wsid: None,
            user_data: UserData { user_id: UserId::from(user_id), extra: Default::default() },
        }
    }

    #[tokio::test]
    async fn connect_then_push_produces_a_poke() {
        let (handle, join) = spawn(
            RoomId::from("r1"),
            Arc::new(MemStorage::default()),
            RoomConfig { turn_duration: StdDuration::from_millis(10), buffer_initial_ms: 0, ..Default::default() },
            MutatorRegistry::with_builtins(),
            Arc::new(SystemClock),
            Arc::new(Metrics::new()),
        );

        let (sink, mut rx) = ChannelClientSink::new();
        let result = handle
            .connect(ConnectCommand { req: connect_request("c1", "u1"), sink: sink.clone() })
            .await
            .unwrap();
        assert!(result.is_ok());
        assert!(matches!(rx.recv().await.unwrap(), ServerFrame::Connected { .. }));

        handle
            .frame(
                ClientId::from("c1"),
                ClientFrame::Push(Push {
                    mutations: vec![PushMutation { id: 1, name: "inc".into(), args: serde_json::json!({"k": "x"}), timestamp: 0 }],
                    push_version: 0,
                    schema_version: "v1".into(),
                    request_id: "r1".into(),
                    timestamp: 0,
                }),
            )
            .await
            .unwrap()
            .unwrap();

        let poke = tokio::time::timeout(StdDuration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(poke, ServerFrame::Poke(_)));

        handle.shutdown().await;
        join.await.unwrap();
    }

    #[tokio::test]
    async fn invalidate_closes_matching_connection() {
        let (handle, join) = spawn(
            RoomId::from("r1"),
            Arc::new(MemStorage::default()),
            RoomConfig { turn_duration: StdDuration::from_millis(10), ..Default::default() },
            MutatorRegistry::with_builtins(),
            Arc::new(SystemClock),
            Arc::new(Metrics::new()),
        );

        let (sink, mut rx) = ChannelClientSink::new();
        handle
            .connect(ConnectCommand { req: connect_request("c1", "u1"), sink })
            .await
            .unwrap()
            .unwrap();
        rx.recv().await.unwrap();

        handle.invalidate(Some(UserId::from("u1"))).await.unwrap();
        let frame = tokio::time::timeout(StdDuration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(frame, ServerFrame::Error(roomsync_protocol::ErrorKind::AuthInvalidated, _)));

        assert!(handle.connected_client_ids().await.unwrap().is_empty());
        handle.shutdown().await;
        join.await.unwrap();
    }
}
