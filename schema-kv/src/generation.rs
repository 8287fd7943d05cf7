//! C4 — the generation registry and per-session AIS caching.
//!
//! spec.md §4.4: the `generation` key is the sole authoritative version
//! counter; `get_session_ais` is a 5-step algorithm that returns the same
//! AIS instance for repeated calls within one transaction and otherwise
//! reconciles a session's cached AIS against whatever generation its
//! transaction's snapshot actually sees.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::ais::Ais;
use crate::error::{CResult, Error};
use crate::kv::directory::{self, Dir};
use crate::kv::engine::Engine;
use crate::kv::transaction::Transaction;
use crate::kv::tuple;

const GENERATION_KEY: &[u8] = b"generation";

/// Owns the `generation` key's directory handle and the handful of
/// operations defined on it by spec.md §4.4.
pub struct GenerationRegistry {
    dir: Dir,
}

impl GenerationRegistry {
    pub fn open<E: Engine>(txn: &Transaction<E>, root: &[String]) -> CResult<Self> {
        Ok(Self { dir: directory::create_or_open(txn, root)? })
    }

    fn key(&self) -> Vec<u8> {
        directory::pack(&self.dir, GENERATION_KEY)
    }

    /// Reads the generation visible to `txn`'s snapshot. Absent means the
    /// schema-manager metadata was wiped out from under a running process
    /// (spec.md §7 `ExternalClear`).
    pub fn get_transactional_generation<E: Engine>(&self, txn: &Transaction<E>) -> CResult<i64> {
        match txn.get(&self.key())? {
            Some(v) => tuple::unpack_i64(&v),
            None => Err(Error::ExternalClear("generation key is missing".into())),
        }
    }

    /// Reads, increments, and writes back the generation counter,
    /// returning the new value. Every call within a transaction that will
    /// commit bumps the counter exactly once per call; `apply_ddl`/
    /// `stage_online`/etc. call this exactly as many times as spec.md says
    /// they should.
    pub fn next_generation<E: Engine>(&self, txn: &Transaction<E>) -> CResult<i64> {
        let current = self.get_transactional_generation(txn)?;
        let next = current + 1;
        txn.set(&self.key(), tuple::pack_i64(next))?;
        Ok(next)
    }

    /// Initializes `generation` to `0`, for fresh startup or post-clear
    /// reinitialization (spec.md §8 scenario S1).
    pub fn initialize<E: Engine>(&self, txn: &Transaction<E>) -> CResult<()> {
        txn.set(&self.key(), tuple::pack_i64(0))?;
        Ok(())
    }
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Per-session volatile state (spec.md §3): the AIS a session currently
/// observes, and at most one active online-DDL id.
///
/// The AIS cache is keyed by generation rather than by a literal
/// transaction handle: two different transactions that read the same
/// generation are guaranteed (by invariant 1, strict monotonicity) to see
/// identical committed schema content, so comparing generations is
/// equivalent to -- and simpler than -- tracking "is this the same
/// transaction" through the KV facade's retrying `transact`/`view` calls.
pub struct Session {
    id: u64,
    attached: RefCell<Option<Arc<Ais>>>,
    online_session_id: RefCell<Option<i64>>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            attached: RefCell::new(None),
            online_session_id: RefCell::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The AIS attached for the transaction currently in flight, if its
    /// generation still matches `expected_generation`.
    pub(crate) fn attached_for(&self, expected_generation: i64) -> Option<Arc<Ais>> {
        let attached = self.attached.borrow();
        match attached.as_ref() {
            Some(ais) if ais.generation == expected_generation => Some(ais.clone()),
            _ => None,
        }
    }

    pub(crate) fn attach(&self, ais: Arc<Ais>) {
        *self.attached.borrow_mut() = Some(ais);
    }

    /// Detaches the session's cached AIS. Called when the transaction the
    /// AIS was attached for ends (spec.md §3: "attached at first access in
    /// the transaction, detached at transaction end").
    pub fn end_transaction(&self) {
        *self.attached.borrow_mut() = None;
    }

    pub fn online_session_id(&self) -> Option<i64> {
        *self.online_session_id.borrow()
    }

    pub(crate) fn set_online_session_id(&self, id: Option<i64>) {
        *self.online_session_id.borrow_mut() = id;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::Memory;
    use crate::kv::mvcc::{MVCCDef, MVCC};

    #[test]
    fn fresh_generation_reads_as_error_until_initialized() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let registry = GenerationRegistry::open(&txn, &["schemaManager".to_string()]).unwrap();
        assert!(matches!(registry.get_transactional_generation(&txn), Err(Error::ExternalClear(_))));
        registry.initialize(&txn).unwrap();
        assert_eq!(registry.get_transactional_generation(&txn).unwrap(), 0);
        txn.commit().unwrap();
    }

    #[test]
    fn next_generation_is_monotonic() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let registry = GenerationRegistry::open(&txn, &["schemaManager".to_string()]).unwrap();
        registry.initialize(&txn).unwrap();
        assert_eq!(registry.next_generation(&txn).unwrap(), 1);
        assert_eq!(registry.next_generation(&txn).unwrap(), 2);
        txn.commit().unwrap();
    }

    #[test]
    fn session_attach_and_detach() {
        let session = Session::new();
        assert!(session.attached_for(0).is_none());
        session.attach(Arc::new(Ais::empty()));
        assert!(session.attached_for(0).is_some());
        assert!(session.attached_for(1).is_none());
        session.end_transaction();
        assert!(session.attached_for(0).is_none());
    }
}
