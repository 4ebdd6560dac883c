//! `roomsync-auth`: the claims shape and default JWT [`AuthHandler`] used by
//! the standalone binary. `roomsync-core` depends on this crate for the
//! `AuthHandler` trait itself, not the other way around, so a custom
//! embedder-supplied handler never needs to depend on `roomsync-core`.

pub mod handler;
pub mod identity;

pub use handler::{AuthHandler, AuthRejected, JwtAuthHandler, ResolvedIdentity};
pub use identity::{ClaimsError, RoomSyncClaims};
