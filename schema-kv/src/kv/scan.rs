//! Iterators over the latest visible version of each key in a range, built on
//! top of the raw `Key::Version(key, version)` keyspace. Because keycode
//! encoding sorts first by user key and then by version, a forward scan over
//! that keyspace groups all versions of a key together -- this module's job
//! is to keep only the newest version visible to a given transaction.

use std::sync::{Arc, Mutex};
use crate::error::{CResult, Error};
use crate::kv::engine::Engine;
use crate::kv::mvcc::Key;
use crate::kv::transaction::TransactionState;

type ScanRange = (std::ops::Bound<Vec<u8>>, std::ops::Bound<Vec<u8>>);

/// An iterator over the latest live versions of keys in a range, visible to a transaction.
pub struct Scan<E: Engine> {
    engine: Arc<Mutex<E>>,
    range: ScanRange,
    st: TransactionState,
}

impl<E: Engine> Scan<E> {
    pub(crate) fn new(engine: Arc<Mutex<E>>, range: ScanRange, st: TransactionState) -> Self {
        Self { engine, range, st }
    }

    /// Materializes the scan into an ordered vector of visible key/value pairs.
    ///
    /// The underlying engine only exposes lifetime-bound iterators over a
    /// `&mut self` borrow, so the MVCC layer collects eagerly here rather
    /// than threading a borrowed engine guard into a lazy iterator.
    pub fn collect(self) -> CResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut engine = self.engine.lock().map_err(|_| Error::Internal("engine mutex poisoned".into()))?;
        let mut iter = engine.scan_dyn(self.range);

        let mut result: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        let mut seen: Option<Vec<u8>> = None;
        while let Some(item) = iter.next() {
            let (raw_key, raw_value) = item?;
            let (user_key, version) = match Key::decode(&raw_key)? {
                Key::Version(key, version) => (key.into_owned(), version),
                k => return Err(Error::Internal(format!("expected Version key, got {k:?}"))),
            };
            if !self.st.is_visible(version) {
                continue;
            }
            // Versions of the same key arrive in ascending order, so a newer visible
            // version always supersedes whatever this key's last entry left behind.
            if seen.as_deref() != Some(user_key.as_slice()) {
                seen = Some(user_key.clone());
            } else if result.last().map(|(k, _)| k == &user_key).unwrap_or(false) {
                result.pop();
            }
            let value: Option<Vec<u8>> = bincode::deserialize(&raw_value).map_err(|e| Error::Parse(e.to_string()))?;
            if let Some(v) = value {
                result.push((user_key, v));
            }
        }
        Ok(result)
    }
}
