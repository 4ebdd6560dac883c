//! RoomCore: one actor per room. `state` and `turn` hold the data model and the
//! core tick algorithm; `connect`/`message`/`close` are the three inbound
//! operations a live session goes through; `actor` wires them behind one
//! command-processing task.

mod actor;
mod close;
mod connect;
mod message;
mod state;
mod turn;

pub use actor::{spawn, ConnectCommand, RoomGone, RoomHandle};
pub use connect::ConnectRequest;
pub use state::RoomState;
pub use turn::TurnOutcome;
