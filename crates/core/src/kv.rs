//! The typed view over storage that mutators actually touch. Buffers writes
//! in a staging map for the duration of one turn; on commit the diff is both
//! materialized into durable storage and rendered into the poke's `patch`.
//!
//! User-visible keys live under the `user/` namespace; `version`, `client/*`,
//! and `connected/*` are internal to the turn loop and never touched through
//! this interface.

use std::collections::BTreeMap;

use roomsync_protocol::PatchOp;
use serde_json::Value;

use crate::error::StorageError;
use crate::storage::{Storage, WriteBatch};

const USER_PREFIX: &str = "user/";

#[derive(Clone, Debug)]
enum Staged {
    Put(Value),
    Deleted,
}

/// Operations exposed to mutators. A trait (rather than a concrete struct) so
/// mutator implementations can be unit-tested against a bare in-memory fake
/// without a [`TurnTx`] in play.
pub trait KvTx {
    fn get(&mut self, key: &str) -> Result<Option<Value>, StorageError>;
    fn put(&mut self, key: &str, value: Value);
    fn del(&mut self, key: &str);
    fn has(&mut self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }
    fn scan(&mut self, prefix: &str, limit: Option<usize>) -> Result<Vec<(String, Value)>, StorageError>;
    /// Wipes every user-visible key. Rendered into the poke as `PatchOp::Clear`
    /// rather than one `Del` per key.
    fn delete_all(&mut self);
}

/// The staging transaction backing one turn's mutator executions. Reads fall
/// through to durable storage for keys not yet staged this turn (read-your-writes
/// within a mutator, and cross-mutator visibility in turn order) regardless of
/// `allow_unconfirmed_writes` — writes are always visible to later mutators in
/// the same turn; what the flag gates is whether the *durable* commit waits for
/// storage's ack before the next tick starts.
pub struct TurnTx<'s> {
    storage: &'s dyn Storage,
    staged: BTreeMap<String, Staged>,
    cleared: bool,
}

impl<'s> TurnTx<'s> {
    pub fn new(storage: &'s dyn Storage) -> Self {
        TurnTx {
            storage,
            staged: BTreeMap::new(),
            cleared: false,
        }
    }

    /// A checkpoint a mutator's writes can be rolled back to, without discarding
    /// writes staged by mutators that already committed earlier in this turn.
    pub fn checkpoint(&self) -> TurnTxCheckpoint {
        TurnTxCheckpoint {
            staged: self.staged.clone(),
            cleared: self.cleared,
        }
    }

    pub fn restore(&mut self, checkpoint: TurnTxCheckpoint) {
        self.staged = checkpoint.staged;
        self.cleared = checkpoint.cleared;
    }

    /// Renders everything staged this turn into a patch (in key order) and a
    /// storage write batch, consuming the transaction.
    pub fn into_diff(self) -> (Vec<PatchOp>, WriteBatch) {
        let mut patch = Vec::new();
        let mut batch = WriteBatch::new();
        if self.cleared {
            patch.push(PatchOp::Clear);
            batch.clear_all();
        }
        for (key, staged) in self.staged {
            let user_key = key.strip_prefix(USER_PREFIX).unwrap_or(&key).to_owned();
            match staged {
                Staged::Put(value) => {
                    batch.put(key, value.clone());
                    patch.push(PatchOp::Put { key: user_key, value });
                }
                Staged::Deleted => {
                    batch.delete(key);
                    if !self.cleared {
                        patch.push(PatchOp::Del { key: user_key });
                    }
                }
            }
        }
        (patch, batch)
    }

    pub fn is_empty(&self) -> bool {
        !self.cleared && self.staged.is_empty()
    }
}

/// Opaque rollback point produced by [`TurnTx::checkpoint`].
pub struct TurnTxCheckpoint {
    staged: BTreeMap<String, Staged>,
    cleared: bool,
}

impl KvTx for TurnTx<'_> {
    fn get(&mut self, key: &str) -> Result<Option<Value>, StorageError> {
        let full_key = format!("{USER_PREFIX}{key}");
        match self.staged.get(&full_key) {
            Some(Staged::Put(v)) => Ok(Some(v.clone())),
            Some(Staged::Deleted) => Ok(None),
            None if self.cleared => Ok(None),
            None => self.storage.get(&full_key),
        }
    }

    fn put(&mut self, key: &str, value: Value) {
        self.staged.insert(format!("{USER_PREFIX}{key}"), Staged::Put(value));
    }

    fn del(&mut self, key: &str) {
        self.staged.insert(format!("{USER_PREFIX}{key}"), Staged::Deleted);
    }

    fn scan(&mut self, prefix: &str, limit: Option<usize>) -> Result<Vec<(String, Value)>, StorageError> {
        let full_prefix = format!("{USER_PREFIX}{prefix}");
        let mut merged: BTreeMap<String, Value> = BTreeMap::new();
        if !self.cleared {
            for (key, value) in self.storage.list_prefix(&full_prefix)? {
                merged.insert(key, value);
            }
        }
        for (key, staged) in &self.staged {
            if !key.starts_with(&full_prefix) {
                continue;
            }
            match staged {
                Staged::Put(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                Staged::Deleted => {
                    merged.remove(key);
                }
            }
        }
        let mut out: Vec<_> = merged
            .into_iter()
            .map(|(k, v)| (k.strip_prefix(USER_PREFIX).unwrap_or(&k).to_owned(), v))
            .collect();
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    fn delete_all(&mut self) {
        self.staged.clear();
        self.cleared = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fake::MemStorage;

    #[test]
    fn read_your_writes_within_a_turn() {
        let storage = MemStorage::default();
        let mut tx = TurnTx::new(&storage);
        tx.put("x", serde_json::json!(1));
        assert_eq!(tx.get("x").unwrap(), Some(serde_json::json!(1)));
    }

    #[test]
    fn checkpoint_rolls_back_one_mutators_writes_only() {
        let storage = MemStorage::default();
        let mut tx = TurnTx::new(&storage);
        tx.put("a", serde_json::json!("from-mutator-1"));
        let checkpoint = tx.checkpoint();
        tx.put("b", serde_json::json!("from-mutator-2"));
        tx.restore(checkpoint);
        assert_eq!(tx.get("a").unwrap(), Some(serde_json::json!("from-mutator-1")));
        assert_eq!(tx.get("b").unwrap(), None);
    }

    #[test]
    fn delete_all_emits_clear_and_suppresses_individual_dels() {
        let storage = MemStorage::default();
        {
            let mut batch = WriteBatch::new();
            batch.put("user/x", serde_json::json!(1));
            storage.commit(batch).unwrap();
        }
        let mut tx = TurnTx::new(&storage);
        tx.delete_all();
        tx.put("y", serde_json::json!(2));
        let (patch, _) = tx.into_diff();
        assert!(matches!(patch[0], PatchOp::Clear));
        assert_eq!(patch.len(), 2);
    }

    #[test]
    fn diff_into_batch_roundtrips_through_storage() {
        let storage = MemStorage::default();
        let mut tx = TurnTx::new(&storage);
        tx.put("x", serde_json::json!(42));
        let (patch, batch) = tx.into_diff();
        assert_eq!(patch, vec![PatchOp::Put { key: "x".into(), value: serde_json::json!(42) }]);
        storage.commit(batch).unwrap();
        assert_eq!(storage.get("user/x").unwrap(), Some(serde_json::json!(42)));
    }
}
