use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of a poke's `patch`: the ordered write-set of a committed turn,
/// already resolved to the exact operations clients replay against local state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Put { key: String, value: Value },
    Del { key: String },
    Clear,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_del_round_trip_through_json() {
        let put = PatchOp::Put {
            key: "x".into(),
            value: serde_json::json!(1),
        };
        let v = serde_json::to_value(&put).unwrap();
        assert_eq!(v, serde_json::json!({"op": "put", "key": "x", "value": 1}));
        assert_eq!(serde_json::from_value::<PatchOp>(v).unwrap(), put);

        let del = PatchOp::Del { key: "x".into() };
        assert_eq!(
            serde_json::to_value(&del).unwrap(),
            serde_json::json!({"op": "del", "key": "x"})
        );
    }

    #[test]
    fn clear_carries_no_key_or_value() {
        assert_eq!(serde_json::to_value(PatchOp::Clear).unwrap(), serde_json::json!({"op": "clear"}));
    }
}
