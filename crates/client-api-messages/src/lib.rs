//! Wire types for the room WebSocket protocol.
//!
//! Frames are JSON arrays with the frame name at index 0, matching the external
//! interface exactly: `["push", {...}]`, `["poke", {...}]`, `["error", kind, detail]`.
//! Any change here is a wire-compatibility break for every connected client.

pub mod error_kind;
pub mod frame;
pub mod patch;

pub use error_kind::ErrorKind;
pub use frame::{ClientFrame, FrameError, Poke, Push, PushMutation, ServerFrame};
pub use patch::PatchOp;
