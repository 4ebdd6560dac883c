//! `roomsync-core`: the RoomCore turn-loop actor (turn ordering, mutation
//! admission, buffer sizing, connect/message/close handling) and the AuthFront
//! gatekeeper (dispatch, invalidation, revalidation) that feeds it.

pub mod auth_front;
pub mod buffer_sizer;
pub mod client;
pub mod error;
pub mod kv;
pub mod metrics;
pub mod model;
pub mod mutation_buffer;
pub mod mutator;
pub mod room;
pub mod storage;
pub mod turn_lock;

pub use auth_front::{AuthFront, AuthFrontConfig, DispatchConnectRequest, RoomLookup};
pub use error::{ConnectError, DispatchError, MessageError, MutatorError, StorageError, TurnLockClosed};
pub use model::{ClientRecord, ConnectionRecord, PendingMutation, RoomConfig, RoomRecord, RoomStatus, UserData};
