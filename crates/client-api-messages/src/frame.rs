use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error_kind::ErrorKind;
use crate::patch::PatchOp;

/// A single client-submitted mutation, as carried inside a `push` frame.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PushMutation {
    pub id: u64,
    pub name: String,
    #[serde(default = "default_args")]
    pub args: Value,
    pub timestamp: i64,
}

fn default_args() -> Value {
    Value::Null
}

/// The body of an upstream `["push", {...}]` frame.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Push {
    #[serde(default)]
    pub mutations: Vec<PushMutation>,
    #[serde(rename = "pushVersion", default)]
    pub push_version: u32,
    #[serde(rename = "schemaVersion", default)]
    pub schema_version: String,
    #[serde(rename = "requestID", default)]
    pub request_id: String,
    #[serde(default)]
    pub timestamp: i64,
}

/// A frame sent by a client over the room WebSocket. `Pull` is structurally opaque
/// to the core: it's validated only enough to know it parsed as a JSON array whose
/// second element is an object, then forwarded to the external pull collaborator.
#[derive(Debug, Clone)]
pub enum ClientFrame {
    Push(Push),
    Ping,
    Pull(Value),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not a two-element JSON array")]
    NotAFrame,
    #[error("unrecognized frame discriminator {0:?}")]
    UnknownDiscriminator(String),
    #[error("malformed frame body: {0}")]
    MalformedBody(#[from] serde_json::Error),
}

impl ClientFrame {
    /// Parses a text WebSocket message into a [`ClientFrame`]. The wire format is a
    /// bare JSON array with the frame name at index 0, so this is hand-rolled rather
    /// than derived: serde's tagged-enum support assumes an object with a tag field.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Array(mut parts) = value else {
            return Err(FrameError::NotAFrame);
        };
        if parts.is_empty() {
            return Err(FrameError::NotAFrame);
        }
        let body = if parts.len() > 1 { parts.remove(1) } else { Value::Object(Default::default()) };
        let Value::String(tag) = parts.remove(0) else {
            return Err(FrameError::NotAFrame);
        };
        match tag.as_str() {
            "push" => Ok(ClientFrame::Push(serde_json::from_value(body)?)),
            "ping" => Ok(ClientFrame::Ping),
            "pull" => Ok(ClientFrame::Pull(body)),
            other => Err(FrameError::UnknownDiscriminator(other.to_owned())),
        }
    }
}

/// The body of a downstream `["poke", {...}]` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poke {
    #[serde(rename = "baseCookie")]
    pub base_cookie: Option<u64>,
    pub cookie: u64,
    #[serde(rename = "lastMutationIDChanges")]
    pub last_mutation_id_changes: HashMap<String, u64>,
    pub patch: Vec<PatchOp>,
    pub timestamp: i64,
    #[serde(rename = "requestID")]
    pub request_id: String,
}

/// A frame sent by the room to a client.
#[derive(Debug, Clone)]
pub enum ServerFrame {
    Connected { wsid: Option<String> },
    Pong,
    Poke(Poke),
    Error(ErrorKind, String),
}

impl ServerFrame {
    /// Renders this frame into the `["name", ...]` JSON array the wire format requires.
    pub fn to_json(&self) -> Value {
        match self {
            ServerFrame::Connected { wsid } => {
                let mut obj = serde_json::Map::new();
                if let Some(wsid) = wsid {
                    obj.insert("wsid".to_owned(), Value::String(wsid.clone()));
                }
                serde_json::json!(["connected", obj])
            }
            ServerFrame::Pong => serde_json::json!(["pong", {}]),
            ServerFrame::Poke(poke) => serde_json::json!(["poke", poke]),
            ServerFrame::Error(kind, detail) => serde_json::json!(["error", kind, detail]),
        }
    }

    pub fn to_text(&self) -> String {
        self.to_json().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_push_frame() {
        let text = r#"["push", {"mutations": [{"id": 1, "name": "inc", "args": {"k": "x"}, "timestamp": 1000}], "pushVersion": 0, "schemaVersion": "v1", "requestID": "r1", "timestamp": 1000}]"#;
        match ClientFrame::parse(text).unwrap() {
            ClientFrame::Push(push) => {
                assert_eq!(push.mutations.len(), 1);
                assert_eq!(push.mutations[0].id, 1);
                assert_eq!(push.mutations[0].name, "inc");
            }
            other => panic!("expected Push, got {other:?}"),
        }
    }

    #[test]
    fn parses_ping_and_empty_push() {
        assert!(matches!(ClientFrame::parse(r#"["ping", {}]"#).unwrap(), ClientFrame::Ping));
        match ClientFrame::parse(r#"["push", {"mutations": []}]"#).unwrap() {
            ClientFrame::Push(push) => assert!(push.mutations.is_empty()),
            other => panic!("expected Push, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_discriminator() {
        assert!(matches!(
            ClientFrame::parse(r#"["shrug", {}]"#),
            Err(FrameError::UnknownDiscriminator(tag)) if tag == "shrug"
        ));
    }

    #[test]
    fn error_frame_has_three_elements() {
        let frame = ServerFrame::Error(ErrorKind::UnexpectedLMID, "lmid 100 > stored 7".to_owned());
        let json = frame.to_json();
        let arr = json.as_array().unwrap();
        assert_eq!(arr.len(), 3);
        assert_eq!(arr[0], "error");
        assert_eq!(arr[1], "UnexpectedLMID");
    }

    #[test]
    fn poke_serializes_base_cookie_null_at_genesis() {
        let poke = Poke {
            base_cookie: None,
            cookie: 1,
            last_mutation_id_changes: HashMap::from([("c1".to_owned(), 1)]),
            patch: vec![PatchOp::Put {
                key: "x".into(),
                value: serde_json::json!(1),
            }],
            timestamp: 1000,
            request_id: "r1".into(),
        };
        let json = ServerFrame::Poke(poke).to_json();
        assert_eq!(json[0], "poke");
        assert_eq!(json[1]["baseCookie"], Value::Null);
        assert_eq!(json[1]["cookie"], 1);
    }
}
