use serde::{Deserialize, Serialize};

/// The closed set of error kinds a client can observe, either in an `error` frame
/// or (for connect-time rejections) as the reason a socket never reaches `connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidMessage,
    AuthInvalidated,
    ClientNotFound,
    RoomClosed,
    RoomNotFound,
    Unauthorized,
    UnexpectedBaseCookie,
    UnexpectedLMID,
    ConnectTimeout,
    PingTimeout,
    InternalError,
}

impl ErrorKind {
    /// Errors a client should treat as "reacquire a token and reconnect", as
    /// opposed to "clear local state and reconnect".
    pub fn is_auth_error(self) -> bool {
        matches!(self, ErrorKind::Unauthorized | ErrorKind::AuthInvalidated)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Derive-free so the wire string matches the Rust variant name exactly;
        // serde_json's enum serialization already gives us that, this just avoids
        // a round trip through the serializer for logging.
        let s = match self {
            ErrorKind::InvalidMessage => "InvalidMessage",
            ErrorKind::AuthInvalidated => "AuthInvalidated",
            ErrorKind::ClientNotFound => "ClientNotFound",
            ErrorKind::RoomClosed => "RoomClosed",
            ErrorKind::RoomNotFound => "RoomNotFound",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::UnexpectedBaseCookie => "UnexpectedBaseCookie",
            ErrorKind::UnexpectedLMID => "UnexpectedLMID",
            ErrorKind::ConnectTimeout => "ConnectTimeout",
            ErrorKind::PingTimeout => "PingTimeout",
            ErrorKind::InternalError => "InternalError",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_bare_variant_name() {
        assert_eq!(
            serde_json::to_value(ErrorKind::UnexpectedLMID).unwrap(),
            serde_json::json!("UnexpectedLMID")
        );
    }
}
