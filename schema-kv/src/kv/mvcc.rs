//! This mod implements MVCC (Multi-Version Concurrency Control), a widely used method for ACID transactions and concurrency control.
//! It allows multiple concurrent transactions to access and modify the same dataset, isolates them from each other,
//! detects and handles conflicts, and commits their writes atomically as a single unit.
//! It uses an underlying storage engine to store raw keys and values.
//!
//!
//! VERSIONS
//! ========
//! MVCC handles concurrency control by managing multiple historical versions of keys, identified by a timestamp.
//! Every write adds a new version at a higher timestamp, with deletes having a special tombstone value.
//!
//! KV Storage Engine uses logical timestamps with a sequence number stored in `Key::NextVersion`.
//! Each new read-write transaction takes its timestamp from the current value of `Key::NextVersion`
//! and then increments the value for the next transaction.
//!
//!
//! ISOLATION
//! =========
//! MVCC provides an isolation level called snapshot isolation.
//! Briefly, transactions see a consistent snapshot of the database state as of their start time.
//! Writes made by concurrent or subsequent transactions are never visible to it.
//! If two concurrent transactions write to the same key they will conflict and one of them must retry.
//! A transaction's writes become atomically visible to subsequent transactions only when they commit,
//! and are rolled back on failure.
//! Read-only transactions never conflict with other transactions.
//!
//! Transactions write new versions at their timestamp, storing them as `Key::Version(key, version) => value`.
//! If a transaction writes to a key and finds a newer version, it returns an error and the client must retry.
//!
//! Active (uncommitted) read-write transactions record their version in the active set,
//! stored as `Key::TxnActive(version)`.
//! When new transactions begin, they take a snapshot of this active set,
//! and any key versions that belong to a transaction in the active set are considered `invisible` (to anyone except that transaction itself).
//!
//! To commit, a transaction simply deletes its record in the active set.
//! This will immediately (and, crucially, atomically) make all of its writes visible to subsequent transactions,
//! but not ongoing ones. If the transaction is cancelled and rolled back,
//! it maintains a record of all keys it wrote as `Key::TxnWrite(version, key)`,
//! so that it can find the corresponding versions and delete them before removing itself from the active set.
//!
//! mvcc:
//!   Writers don't block readers.
//!   Readers don't block writers.

use std::borrow::Cow;
use std::sync::{Arc, Mutex};
use serde_derive::{Deserialize, Serialize};
use crate::error::{CResult, Error};
use crate::kv::engine::Engine;
use crate::kv::keycode;
use crate::kv::transaction::{Transaction, TransactionState};

/// An MVCC version represents a logical timestamp. The latest version is incremented
/// when beginning each read-write transaction.
pub type Version = u64;

/// An MVCC-based transactional key-value engine.
/// It wraps an underlying storage engine that's used for raw key/value storage.
pub struct MVCC<E: Engine> {
    pub(crate) engine: Arc<Mutex<E>>,
}

pub trait MVCCDef<E: Engine> {
    fn new(engine: E) -> MVCC<E>;

    fn begin(&self) -> CResult<Transaction<E>>;

    fn begin_read_only(&self) -> CResult<Transaction<E>>;

    fn resume(&self, state: TransactionState) -> CResult<Transaction<E>>;

    fn status(&self) -> CResult<Status>;
}

/// MVCC keys, using the KeyCode encoding which preserves the ordering and grouping of keys.
/// Cow byte slices allow encoding borrowed values and decoding into owned values.
#[derive(Debug, Clone, PartialEq)]
pub enum Key<'a> {
    /// The next available version.
    NextVersion,

    /// Active (uncommitted) transactions by version.
    TxnActive(Version),

    /// A snapshot of the active set at each version.
    /// Only written for versions where the active set is non-empty (excluding itself).
    TxnActiveSnapshot(Version),

    /// Keeps track of all keys written to by an active transaction (identified by its version), in case it needs to roll back.
    TxnWrite(Version, Cow<'a, [u8]>),

    /// A versioned key/value pair.
    Version(Cow<'a, [u8]>, Version),

    /// Unversioned non-transactional key/value pairs.
    /// These exist separately from versioned keys.
    /// These are mostly used for metadata.
    Unversioned(Cow<'a, [u8]>),
}

impl<'a> Key<'a> {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Key::NextVersion => out.push(0),
            Key::TxnActive(version) => {
                out.push(1);
                keycode::encode_u64(*version, &mut out);
            }
            Key::TxnActiveSnapshot(version) => {
                out.push(2);
                keycode::encode_u64(*version, &mut out);
            }
            Key::TxnWrite(version, key) => {
                out.push(3);
                keycode::encode_u64(*version, &mut out);
                keycode::encode_bytes(key, &mut out);
            }
            Key::Version(key, version) => {
                out.push(4);
                keycode::encode_bytes(key, &mut out);
                keycode::encode_u64(*version, &mut out);
            }
            Key::Unversioned(key) => {
                out.push(5);
                keycode::encode_bytes(key, &mut out);
            }
        }
        out
    }

    pub fn decode(bytes: &'a [u8]) -> CResult<Self> {
        let (&tag, rest) = bytes.split_first().ok_or_else(|| Error::Parse("empty mvcc key".into()))?;
        match tag {
            0 => Ok(Key::NextVersion),
            1 => {
                let (version, _) = keycode::decode_u64(rest)?;
                Ok(Key::TxnActive(version))
            }
            2 => {
                let (version, _) = keycode::decode_u64(rest)?;
                Ok(Key::TxnActiveSnapshot(version))
            }
            3 => {
                let (version, rest) = keycode::decode_u64(rest)?;
                let (key, _) = keycode::decode_bytes(rest)?;
                Ok(Key::TxnWrite(version, Cow::Owned(key)))
            }
            4 => {
                let (key, rest) = keycode::decode_bytes(rest)?;
                let (version, _) = keycode::decode_u64(rest)?;
                Ok(Key::Version(Cow::Owned(key), version))
            }
            5 => {
                let (key, _) = keycode::decode_bytes(rest)?;
                Ok(Key::Unversioned(Cow::Owned(key)))
            }
            _ => Err(Error::Parse(format!("unknown mvcc key tag {tag}"))),
        }
    }
}

/// MVCC key prefixes, for prefix scans. These must match the keys above, including the enum variant index.
pub enum KeyPrefix<'a> {
    NextVersion,
    TxnActive,
    TxnActiveSnapshot,
    TxnWrite(Version),
    Version(Cow<'a, [u8]>),
    Unversioned,
}

impl<'a> KeyPrefix<'a> {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            KeyPrefix::NextVersion => out.push(0),
            KeyPrefix::TxnActive => out.push(1),
            KeyPrefix::TxnActiveSnapshot => out.push(2),
            KeyPrefix::TxnWrite(version) => {
                out.push(3);
                keycode::encode_u64(*version, &mut out);
            }
            KeyPrefix::Version(key) => {
                out.push(4);
                // No terminator: this is a *prefix* of the encoded key, not
                // a complete key, so the trailing version field is left
                // open for the scan to range over.
                for &b in key.iter() {
                    if b == 0x00 {
                        out.push(0x00);
                        out.push(0xff);
                    } else {
                        out.push(b);
                    }
                }
            }
            KeyPrefix::Unversioned => out.push(5),
        }
        out
    }
}

impl<E: Engine> MVCCDef<E> for MVCC<E> {
    fn new(engine: E) -> MVCC<E> {
        MVCC { engine: Arc::new(Mutex::new(engine)) }
    }

    fn begin(&self) -> CResult<Transaction<E>> {
        Transaction::begin(self.engine.clone())
    }

    fn begin_read_only(&self) -> CResult<Transaction<E>> {
        Transaction::begin_read_only(self.engine.clone(), None)
    }

    fn resume(&self, state: TransactionState) -> CResult<Transaction<E>> {
        Transaction::resume(self.engine.clone(), state)
    }

    fn status(&self) -> CResult<Status> {
        let mut engine = self.engine.lock().map_err(|_| Error::Internal("engine mutex poisoned".into()))?;
        let next_version = match engine.get(&Key::NextVersion.encode())? {
            Some(v) => bincode::deserialize(&v).map_err(|e| Error::Parse(e.to_string()))?,
            None => 1,
        };
        let active_txns = engine.scan_prefix(&KeyPrefix::TxnActive.encode()).count() as u64;
        Ok(Status { versions: next_version, active_txns, storage: engine.status()? })
    }
}

impl<E: Engine> Clone for MVCC<E> {
    fn clone(&self) -> Self {
        MVCC { engine: self.engine.clone() }
    }
}

/// MVCC engine status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// The total number of MVCC versions (i.e. read-write transactions) issued.
    pub versions: u64,
    /// Number of currently active transactions.
    pub active_txns: u64,
    /// The underlying byte-engine storage status.
    pub storage: crate::kv::Status,
}
