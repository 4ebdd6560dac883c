//! Durable key/value storage, abstracted behind a trait, plus the one concrete
//! backend this process ships: one sled tree per logical concern, with
//! `flush_every_ms`/`Mode::HighThroughput` configuration, values JSON-encoded
//! rather than protobuf since this wire protocol is JSON end to end.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::StorageError;

/// An atomic multi-key write, applied by [`Storage::commit`] as a single sled
/// transaction so a turn's `version`, `ClientRecord`s, and user values share
/// one write barrier.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    puts: Vec<(String, Value)>,
    deletes: Vec<String>,
    clear: bool,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.puts.push((key.into(), value));
        self
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.deletes.push(key.into());
        self
    }

    /// Marks this batch as a full wipe of the tree, preceding its puts/deletes.
    /// Used only for `deleteAll` mutations (emits `PatchOp::Clear`).
    pub fn clear_all(&mut self) -> &mut Self {
        self.clear = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        !self.clear && self.puts.is_empty() && self.deletes.is_empty()
    }
}

/// C2's contract: an ordered byte-string-keyed JSON value map with prefix listing,
/// atomic batched writes, and an explicit write barrier. Implemented once, by
/// [`SledStorage`]; the trait exists so the turn loop and AuthFront can be tested
/// against an in-memory fake without touching disk.
pub trait Storage: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    fn has(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }
    /// Keys strictly greater than `prefix` and sharing it, in key order.
    fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, StorageError>;
    fn commit(&self, batch: WriteBatch) -> Result<(), StorageError>;
    /// Blocks until everything committed so far is durable on disk.
    fn flush(&self) -> Result<(), StorageError>;

    fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        self.get(key)?
            .map(|v| serde_json::from_value(v).map_err(|source| StorageError::Corrupt { key: key.to_owned(), source }))
            .transpose()
    }
}

/// Helper for callers building a [`WriteBatch`] entry from a typed value.
pub fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).expect("room-core value types always serialize")
}

/// The one concrete [`Storage`] implementation the standalone binary ships: a
/// single sled tree. Rooms each get their own `SledStorage` over a tree named
/// after the room ID; AuthFront gets one shared tree for its directory.
pub struct SledStorage {
    tree: sled::Tree,
}

impl SledStorage {
    /// Opens (or creates) `tree_name` inside the sled database rooted at `data_dir`.
    pub fn open(data_dir: impl AsRef<Path>, tree_name: &str) -> Result<Self, StorageError> {
        let db = sled::Config::default()
            .path(data_dir.as_ref())
            .flush_every_ms(Some(50))
            .mode(sled::Mode::HighThroughput)
            .open()?;
        Ok(Self {
            tree: db.open_tree(tree_name)?,
        })
    }

    pub fn from_tree(tree: sled::Tree) -> Self {
        Self { tree }
    }
}

impl Storage for SledStorage {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        match self.tree.get(key.as_bytes())? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|source| StorageError::Corrupt { key: key.to_owned(), source })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, StorageError> {
        let mut out = Vec::new();
        for entry in self.tree.scan_prefix(prefix.as_bytes()) {
            let (key, bytes) = entry?;
            let key = String::from_utf8_lossy(&key).into_owned();
            let value = serde_json::from_slice(&bytes)
                .map_err(|source| StorageError::Corrupt { key: key.clone(), source })?;
            out.push((key, value));
        }
        Ok(out)
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StorageError> {
        if batch.clear {
            self.tree.clear()?;
        }
        self.tree
            .transaction(|tx| {
                for (key, value) in &batch.puts {
                    let bytes = serde_json::to_vec(value).expect("room values always serialize");
                    tx.insert(key.as_bytes(), bytes)?;
                }
                for key in &batch.deletes {
                    tx.remove(key.as_bytes())?;
                }
                Ok::<_, sled::transaction::ConflictableTransactionError<std::convert::Infallible>>(())
            })
            .map_err(|e| match e {
                sled::transaction::TransactionError::Abort(never) => match never {},
                sled::transaction::TransactionError::Storage(err) => StorageError::Backend(err),
            })?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.tree.flush()?;
        Ok(())
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// An in-memory [`Storage`] for unit tests that exercise the turn loop and
    /// AuthFront without touching disk.
    #[derive(Default)]
    pub struct MemStorage {
        data: Mutex<BTreeMap<String, Value>>,
    }

    impl Storage for MemStorage {
        fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
            Ok(self.data.lock().unwrap().get(key).cloned())
        }

        fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, StorageError> {
            Ok(self
                .data
                .lock()
                .unwrap()
                .range(prefix.to_owned()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        }

        fn commit(&self, batch: WriteBatch) -> Result<(), StorageError> {
            let mut data = self.data.lock().unwrap();
            if batch.clear {
                data.clear();
            }
            for (key, value) in batch.puts {
                data.insert(key, value);
            }
            for key in batch.deletes {
                data.remove(&key);
            }
            Ok(())
        }

        fn flush(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::MemStorage;
    use super::*;

    #[test]
    fn batch_commit_is_visible_after_commit() {
        let storage = MemStorage::default();
        let mut batch = WriteBatch::new();
        batch.put("x", serde_json::json!(1));
        storage.commit(batch).unwrap();
        assert_eq!(storage.get("x").unwrap(), Some(serde_json::json!(1)));
    }

    #[test]
    fn list_prefix_respects_boundary() {
        let storage = MemStorage::default();
        let mut batch = WriteBatch::new();
        batch.put("user/a", serde_json::json!(1));
        batch.put("user/b", serde_json::json!(2));
        batch.put("client/a", serde_json::json!(3));
        storage.commit(batch).unwrap();
        let listed = storage.list_prefix("user/").unwrap();
        assert_eq!(listed.len(), 2);
    }
}
