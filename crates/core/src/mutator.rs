//! The mutator registry. Mutators are treated as an opaque, embedder-supplied
//! registry; this crate ships a small built-in set (`put`, `del`, `inc`) so a
//! room is exercisable standalone, in tests and in the default binary, without
//! an embedder wiring one up.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::MutatorError;
use crate::kv::KvTx;
use crate::model::MutatorCtx;

/// A user-provided function `(tx, args, ctx) -> ()` whose side effects become
/// part of the turn's write-set. Synchronous: mutator execution suspends for
/// nothing other than KvTx reads/writes.
pub trait Mutator: Send + Sync {
    fn call(&self, tx: &mut dyn KvTx, args: &Value, ctx: &MutatorCtx) -> Result<(), MutatorError>;
}

impl<F> Mutator for F
where
    F: Fn(&mut dyn KvTx, &Value, &MutatorCtx) -> Result<(), MutatorError> + Send + Sync,
{
    fn call(&self, tx: &mut dyn KvTx, args: &Value, ctx: &MutatorCtx) -> Result<(), MutatorError> {
        self(tx, args, ctx)
    }
}

#[derive(Clone, Default)]
pub struct MutatorRegistry {
    mutators: HashMap<String, Arc<dyn Mutator>>,
}

impl MutatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in `put`/`del`/`inc` set, useful for tests and as the default
    /// registry for the standalone binary when no embedder registers its own.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register("put", put_mutator);
        reg.register("del", del_mutator);
        reg.register("inc", inc_mutator);
        reg
    }

    pub fn register(&mut self, name: impl Into<String>, mutator: impl Mutator + 'static) {
        self.mutators.insert(name.into(), Arc::new(mutator));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Mutator>> {
        self.mutators.get(name).cloned()
    }
}

fn arg_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, MutatorError> {
    args.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| MutatorError::Rejected(format!("missing or non-string `{field}` argument")))
}

fn put_mutator(tx: &mut dyn KvTx, args: &Value, _ctx: &MutatorCtx) -> Result<(), MutatorError> {
    let key = arg_str(args, "key")?;
    let value = args
        .get("value")
        .cloned()
        .ok_or_else(|| MutatorError::Rejected("missing `value` argument".into()))?;
    tx.put(key, value);
    Ok(())
}

fn del_mutator(tx: &mut dyn KvTx, args: &Value, _ctx: &MutatorCtx) -> Result<(), MutatorError> {
    let key = arg_str(args, "key")?;
    tx.del(key);
    Ok(())
}

fn inc_mutator(tx: &mut dyn KvTx, args: &Value, _ctx: &MutatorCtx) -> Result<(), MutatorError> {
    let key = arg_str(args, "k")?;
    let by = args.get("by").and_then(Value::as_i64).unwrap_or(1);
    let current = tx
        .get(key)
        .map_err(|e| MutatorError::Rejected(e.to_string()))?
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    tx.put(key, serde_json::json!(current + by));
    Ok(())
}
