//! `KvFacade` — the single handle the rest of the schema manager takes on
//! the backing store: open a transaction, run a closure against it, retry
//! automatically on `CommitConflict`. Mirrors the way the teacher's own
//! `mvcc::MVCC` is the one thing callers hold onto, but adds the
//! retry-on-conflict loop spec.md's concurrency model calls for (every
//! suspension point is a KV call; a conflicting commit just means retry).

use crate::error::{CResult, Error};
use crate::kv::engine::Engine;
use crate::kv::mvcc::{MVCCDef, MVCC};
use crate::kv::transaction::Transaction;

/// How many times a conflicting read-write transaction is retried before
/// giving up and surfacing the conflict to the caller.
const MAX_RETRIES: u32 = 16;

pub struct KvFacade<E: Engine> {
    mvcc: MVCC<E>,
}

impl<E: Engine> KvFacade<E> {
    pub fn new(engine: E) -> Self {
        Self { mvcc: MVCC::new(engine) }
    }

    /// Runs `f` inside a fresh read-write transaction, committing on success
    /// and retrying the whole closure on `CommitConflict`. `f` must be safe
    /// to run more than once: any non-KV side effect it performs should be
    /// idempotent or deferred until after `transact` returns.
    pub fn transact<T>(&self, f: impl Fn(&Transaction<E>) -> CResult<T>) -> CResult<T> {
        for attempt in 0..MAX_RETRIES {
            let txn = self.mvcc.begin()?;
            match f(&txn) {
                Ok(value) => {
                    txn.commit()?;
                    return Ok(value);
                }
                Err(Error::CommitConflict) => {
                    txn.rollback()?;
                    log::debug!("transaction conflict, retrying (attempt {attempt})");
                    continue;
                }
                Err(err) => {
                    txn.rollback()?;
                    return Err(err);
                }
            }
        }
        Err(Error::CommitConflict)
    }

    /// Runs `f` inside a read-only snapshot transaction. Never conflicts.
    pub fn view<T>(&self, f: impl FnOnce(&Transaction<E>) -> CResult<T>) -> CResult<T> {
        let txn = self.mvcc.begin_read_only()?;
        f(&txn)
    }

    pub fn status(&self) -> CResult<crate::kv::mvcc::Status> {
        self.mvcc.status()
    }
}

impl<E: Engine> Clone for KvFacade<E> {
    fn clone(&self) -> Self {
        Self { mvcc: self.mvcc.clone() }
    }
}
