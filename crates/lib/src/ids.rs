use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id!(RoomId);
string_id!(ClientId);
string_id!(UserId);

/// The monotonic version of a room's key-value state. `None` means "pre-genesis":
/// no turn has ever committed. Once a turn commits, the cookie only ever increases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cookie(pub Option<u64>);

impl Cookie {
    pub const GENESIS: Cookie = Cookie(None);

    pub fn value(self) -> Option<u64> {
        self.0
    }

    /// The cookie assigned to the next turn after this one commits.
    pub fn next(self) -> Cookie {
        Cookie(Some(self.0.map_or(0, |c| c + 1)))
    }

    /// `self` is an acceptable `baseCookie` for a connect request given the room's
    /// current version, per the cookie admission rule in `ConnectHandler`.
    pub fn is_admissible_base_for(self, current: Cookie) -> bool {
        match (self.0, current.0) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(requested), Some(current)) => requested <= current,
        }
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{v}"),
            None => f.write_str("null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_from_genesis_is_zero() {
        assert_eq!(Cookie::GENESIS.next(), Cookie(Some(0)));
    }

    #[test]
    fn next_increments() {
        assert_eq!(Cookie(Some(4)).next(), Cookie(Some(5)));
    }

    #[test]
    fn base_cookie_admission() {
        // null baseCookie is always admissible; it means the client has no
        // cached state to reconcile against, regardless of the room's version.
        assert!(Cookie::GENESIS.is_admissible_base_for(Cookie::GENESIS));
        assert!(Cookie::GENESIS.is_admissible_base_for(Cookie(Some(3))));
        // a concrete baseCookie must not be ahead of the server's version.
        assert!(!Cookie(Some(5)).is_admissible_base_for(Cookie::GENESIS));
        assert!(Cookie(Some(3)).is_admissible_base_for(Cookie(Some(3))));
        assert!(Cookie(Some(2)).is_admissible_base_for(Cookie(Some(3))));
        assert!(!Cookie(Some(4)).is_admissible_base_for(Cookie(Some(3))));
    }
}
