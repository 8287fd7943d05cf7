use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use serde_derive::{Deserialize, Serialize};
use crate::error::{CResult, Error};
use crate::kv::engine::Engine;
use crate::kv::mvcc::{Key, KeyPrefix, Version};
use crate::kv::scan::Scan;

/// An MVCC transaction.
pub struct Transaction<E: Engine> {
    /// The underlying engine, shared by all transactions.
    engine: Arc<Mutex<E>>,

    /// The transaction state.
    st: TransactionState,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionState {
    /// The version this transaction is running at.
    /// Only one read-write transaction can run at a given version, since this identifies its writes.
    pub version: Version,

    /// If true, the transaction is read only.
    pub read_only: bool,

    /// The set of concurrent active (uncommitted) transactions, as of the start of this transaction.
    /// Their writes should be invisible to this transaction even if they're writing at a lower version,
    /// since they're not committed yet.
    pub active: HashSet<Version>,
}

impl TransactionState {
    /// Checks whether the given version is visible to this transaction.
    ///
    /// Any version visible to the transaction as of the start of the transaction is visible,
    /// except for the versions of other concurrent, uncommitted transactions.
    pub(crate) fn is_visible(&self, version: Version) -> bool {
        if self.active.contains(&version) {
            false
        } else if self.read_only {
            version < self.version
        } else {
            version <= self.version
        }
    }
}

impl<E: Engine> Transaction<E> {
    /// Begins a new read-write transaction.
    pub(crate) fn begin(engine: Arc<Mutex<E>>) -> CResult<Self> {
        let mut session = engine.lock().map_err(|_| Error::Internal("engine mutex poisoned".into()))?;

        let version = match session.get(&Key::NextVersion.encode())? {
            Some(ref v) => bincode::deserialize(v).map_err(|e| Error::Parse(e.to_string()))?,
            None => 1,
        };
        session.set(&Key::NextVersion.encode(), bincode::serialize(&(version + 1)).unwrap())?;

        let active = Self::scan_active(&mut session)?;
        if !active.is_empty() {
            session.set(
                &Key::TxnActiveSnapshot(version).encode(),
                bincode::serialize(&active).map_err(|e| Error::Parse(e.to_string()))?,
            )?;
        }
        session.set(&Key::TxnActive(version).encode(), vec![])?;
        drop(session);

        Ok(Self { engine, st: TransactionState { version, read_only: false, active } })
    }

    /// Begins a new read-only transaction.
    ///
    /// If `as_of` is given, the transaction will see the state as of the start of that version
    /// (ignoring writes at that version itself), as opposed to the latest version.
    pub(crate) fn begin_read_only(engine: Arc<Mutex<E>>, as_of: Option<Version>) -> CResult<Self> {
        let mut session = engine.lock().map_err(|_| Error::Internal("engine mutex poisoned".into()))?;

        let mut version = match session.get(&Key::NextVersion.encode())? {
            Some(ref v) => bincode::deserialize(v).map_err(|e| Error::Parse(e.to_string()))?,
            None => 1,
        };
        let mut active = HashSet::new();
        if let Some(as_of) = as_of {
            version = as_of;
            if let Some(ref v) = session.get(&Key::TxnActiveSnapshot(version).encode())? {
                active = bincode::deserialize(v).map_err(|e| Error::Parse(e.to_string()))?;
            }
        } else {
            active = Self::scan_active(&mut session)?;
        }
        drop(session);

        Ok(Self { engine, st: TransactionState { version, read_only: true, active } })
    }

    /// Resumes a transaction from the given state.
    pub(crate) fn resume(engine: Arc<Mutex<E>>, st: TransactionState) -> CResult<Self> {
        Ok(Self { engine, st })
    }

    fn scan_active(engine: &mut E) -> CResult<HashSet<Version>> {
        let mut active = HashSet::new();
        let mut scan = engine.scan_dyn(
            Self::prefix_range(&KeyPrefix::TxnActive.encode()),
        );
        while let Some(item) = scan.next() {
            let (key, _) = item?;
            match Key::decode(&key)? {
                Key::TxnActive(version) => {
                    active.insert(version);
                }
                k => return Err(Error::Internal(format!("expected TxnActive key, got {k:?}"))),
            }
        }
        Ok(active)
    }

    fn prefix_range(prefix: &[u8]) -> (std::ops::Bound<Vec<u8>>, std::ops::Bound<Vec<u8>>) {
        let start = std::ops::Bound::Included(prefix.to_vec());
        let end = match crate::kv::keycode::prefix_end(prefix) {
            Some(end) => std::ops::Bound::Excluded(end),
            None => std::ops::Bound::Unbounded,
        };
        (start, end)
    }

    /// Returns the transaction's internal state, for resuming later via `resume()`.
    pub fn state(&self) -> &TransactionState {
        &self.st
    }

    pub fn version(&self) -> Version {
        self.st.version
    }

    pub fn read_only(&self) -> bool {
        self.st.read_only
    }

    /// Commits the transaction, making its writes visible to subsequent transactions.
    pub fn commit(self) -> CResult<()> {
        if self.st.read_only {
            return Ok(());
        }
        let mut engine = self.engine.lock().map_err(|_| Error::Internal("engine mutex poisoned".into()))?;

        let remove: Vec<Vec<u8>> = {
            let mut scan = engine.scan_dyn(Self::prefix_range(&KeyPrefix::TxnWrite(self.st.version).encode()));
            let mut keys = Vec::new();
            while let Some(item) = scan.next() {
                let (key, _) = item?;
                keys.push(key);
            }
            keys
        };
        for key in remove {
            engine.delete(&key)?;
        }
        engine.delete(&Key::TxnActive(self.st.version).encode())?;
        Ok(())
    }

    /// Rolls back the transaction, removing all its writes.
    pub fn rollback(self) -> CResult<()> {
        if self.st.read_only {
            return Ok(());
        }
        let mut engine = self.engine.lock().map_err(|_| Error::Internal("engine mutex poisoned".into()))?;

        let writes: Vec<Vec<u8>> = {
            let mut scan = engine.scan_dyn(Self::prefix_range(&KeyPrefix::TxnWrite(self.st.version).encode()));
            let mut keys = Vec::new();
            while let Some(item) = scan.next() {
                let (key, _) = item?;
                keys.push(key);
            }
            keys
        };
        for write_key in writes {
            let target = match Key::decode(&write_key)? {
                Key::TxnWrite(_, key) => Key::Version(key, self.st.version).encode(),
                k => return Err(Error::Internal(format!("expected TxnWrite key, got {k:?}"))),
            };
            engine.delete(&target)?;
            engine.delete(&write_key)?;
        }
        engine.delete(&Key::TxnActive(self.st.version).encode())?;
        Ok(())
    }

    /// Writes a value for a key. None is used for deletion (tombstone), to distinguish it
    /// from an absent key when replaying the log.
    fn write(&self, key: &[u8], value: Option<Vec<u8>>) -> CResult<()> {
        if self.st.read_only {
            return Err(Error::Internal("cannot write in a read-only transaction".into()));
        }
        let mut engine = self.engine.lock().map_err(|_| Error::Internal("engine mutex poisoned".into()))?;

        // Check for conflicting writes: any version of this key written at or after the
        // oldest version visible to this transaction, by a transaction we cannot see through,
        // means someone else wrote to this key concurrently and one of us must retry.
        let since = self.st.active.iter().min().copied().unwrap_or(self.st.version + 1);
        let from = Key::Version(key.into(), since).encode();
        let to = Key::Version(key.into(), Version::MAX).encode();
        if let Some(item) = engine.scan_dyn((std::ops::Bound::Included(from), std::ops::Bound::Included(to))).last() {
            let (k, _) = item?;
            match Key::decode(&k)? {
                Key::Version(_, version) if !self.st.is_visible(version) => {
                    return Err(Error::CommitConflict);
                }
                _ => {}
            }
        }

        engine.set(&Key::TxnWrite(self.st.version, key.into()).encode(), vec![])?;
        engine.set(
            &Key::Version(key.into(), self.st.version).encode(),
            bincode::serialize(&value).map_err(|e| Error::Parse(e.to_string()))?,
        )?;
        Ok(())
    }

    /// Sets a value for a key.
    pub fn set(&self, key: &[u8], value: Vec<u8>) -> CResult<()> {
        self.write(key, Some(value))
    }

    /// Deletes a key.
    pub fn delete(&self, key: &[u8]) -> CResult<()> {
        self.write(key, None)
    }

    /// Fetches a key's value, if any.
    pub fn get(&self, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        let mut engine = self.engine.lock().map_err(|_| Error::Internal("engine mutex poisoned".into()))?;
        let from = Key::Version(key.into(), 0).encode();
        let to = Key::Version(key.into(), self.st.version).encode();
        let mut scan = engine.scan_dyn((std::ops::Bound::Included(from), std::ops::Bound::Included(to)));
        while let Some(item) = scan.next_back() {
            let (k, v) = item?;
            match Key::decode(&k)? {
                Key::Version(_, version) => {
                    if self.st.is_visible(version) {
                        return bincode::deserialize(&v).map_err(|e| Error::Parse(e.to_string()));
                    }
                }
                k => return Err(Error::Internal(format!("expected Version key, got {k:?}"))),
            }
        }
        Ok(None)
    }

    /// Returns an iterator over the latest visible versions of keys in the given range.
    pub fn scan(&self, range: impl std::ops::RangeBounds<Vec<u8>>) -> CResult<Scan<E>> {
        let start = match range.start_bound() {
            std::ops::Bound::Included(k) => std::ops::Bound::Included(Key::Version(k.as_slice().into(), 0).encode()),
            std::ops::Bound::Excluded(k) => {
                std::ops::Bound::Excluded(Key::Version(k.as_slice().into(), Version::MAX).encode())
            }
            std::ops::Bound::Unbounded => std::ops::Bound::Included(KeyPrefix::Version(vec![].into()).encode()),
        };
        let end = match range.end_bound() {
            std::ops::Bound::Included(k) => {
                std::ops::Bound::Included(Key::Version(k.as_slice().into(), Version::MAX).encode())
            }
            std::ops::Bound::Excluded(k) => std::ops::Bound::Excluded(Key::Version(k.as_slice().into(), 0).encode()),
            std::ops::Bound::Unbounded => match crate::kv::keycode::prefix_end(&KeyPrefix::Version(vec![].into()).encode()) {
                Some(end) => std::ops::Bound::Excluded(end),
                None => std::ops::Bound::Unbounded,
            },
        };
        Ok(Scan::new(self.engine.clone(), (start, end), self.st.clone()))
    }

    /// Returns an iterator over the latest visible versions of keys starting with prefix.
    pub fn scan_prefix(&self, prefix: &[u8]) -> CResult<Scan<E>> {
        let start = KeyPrefix::Version(prefix.into()).encode();
        let end = match crate::kv::keycode::prefix_end(&start) {
            Some(end) => std::ops::Bound::Excluded(end),
            None => std::ops::Bound::Unbounded,
        };
        Ok(Scan::new(self.engine.clone(), (std::ops::Bound::Included(start), end), self.st.clone()))
    }
}
