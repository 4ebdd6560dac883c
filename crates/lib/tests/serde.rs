//! Pins the on-wire JSON shape of the shared id/cookie types: callers serialize
//! these directly into protocol frames and persisted records, so the shape is a
//! compatibility surface, not an implementation detail.

use roomsync_lib::{ClientId, Cookie, RoomId};

#[test]
fn ids_serialize_as_bare_strings() {
    let room = RoomId::from("r1");
    assert_eq!(serde_json::to_value(&room).unwrap(), serde_json::json!("r1"));

    let client: ClientId = serde_json::from_value(serde_json::json!("c1")).unwrap();
    assert_eq!(client, ClientId::from("c1"));
}

#[test]
fn cookie_serializes_as_nullable_int() {
    assert_eq!(serde_json::to_value(Cookie::GENESIS).unwrap(), serde_json::json!(null));
    assert_eq!(serde_json::to_value(Cookie(Some(7))).unwrap(), serde_json::json!(7));

    let parsed: Cookie = serde_json::from_value(serde_json::json!(null)).unwrap();
    assert_eq!(parsed, Cookie::GENESIS);
    let parsed: Cookie = serde_json::from_value(serde_json::json!(12)).unwrap();
    assert_eq!(parsed, Cookie(Some(12)));
}
