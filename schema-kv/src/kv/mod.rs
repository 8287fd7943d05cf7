//! C1 — the KV facade. Everything the rest of the schema manager needs from
//! the backing key/value store: directories, tuple-packed values, ranges,
//! and serializable-isolation transactions with optimistic commit.
//!
//! spec.md treats the KV store as an abstract external collaborator. This
//! module supplies one concrete realization of that interface (an
//! MVCC-over-a-byte-engine store, same shape as the teacher's own
//! `storage`/`mvcc` modules) so the crate runs standalone.

pub mod directory;
pub mod engine;
pub mod facade;
pub mod keycode;
pub mod log;
pub mod log_cask;
pub mod memory;
pub mod mvcc;
pub mod scan;
pub mod transaction;
pub mod tuple;

use serde_derive::{Deserialize, Serialize};

/// KeyDir是一个内存当中的map，这里使用的是BTreeMap的实现方式，便于进行顺序遍历进行compaction。
/// key为存储的key，而value为Entry的metadata，记录长度和位置，用于进行偏移读取.
pub type KeyDir = std::collections::BTreeMap<Vec<u8>, (u64, u32)>;

/// Status of the underlying byte engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub name: String,
    pub keys: u64,
    pub size: u64,
    pub total_disk_size: u64,
    pub live_disk_size: u64,
    pub garbage_disk_size: u64,
}

/// A scan iterator, with a blanket implementation (in lieu of trait aliases).
pub trait ScanIteratorT: DoubleEndedIterator<Item = crate::error::CResult<(Vec<u8>, Vec<u8>)>> {}

impl<I: DoubleEndedIterator<Item = crate::error::CResult<(Vec<u8>, Vec<u8>)>>> ScanIteratorT for I {}

#[cfg(test)]
pub(crate) mod tests {
    /// Generates common tests for any Engine implementation.
    macro_rules! test_engine {
        ($setup:expr) => {
            #[track_caller]
            fn assert_scan<I>(iter: I, expect: Vec<(&[u8], Vec<u8>)>) -> crate::error::CResult<()>
            where
                I: Iterator<Item = crate::error::CResult<(Vec<u8>, Vec<u8>)>>,
            {
                assert_eq!(
                    iter.collect::<crate::error::CResult<Vec<_>>>()?,
                    expect.into_iter().map(|(k, v)| (k.to_vec(), v)).collect::<Vec<_>>()
                );
                Ok(())
            }

            #[test]
            fn point_ops() -> crate::error::CResult<()> {
                let mut s = $setup;

                assert_eq!(s.get(b"a")?, None);

                s.set(b"a", vec![1])?;
                assert_eq!(s.get(b"a")?, Some(vec![1]));

                s.set(b"b", vec![2])?;
                assert_eq!(s.get(b"b")?, Some(vec![2]));
                assert_eq!(s.get(b"a")?, Some(vec![1]));

                assert_eq!(s.get(b"c")?, None);
                assert_eq!(s.get(b"A")?, None);

                s.set(b"a", vec![0])?;
                assert_eq!(s.get(b"a")?, Some(vec![0]));

                s.delete(b"a")?;
                assert_eq!(s.get(b"a")?, None);
                assert_eq!(s.get(b"b")?, Some(vec![2]));

                s.delete(b"a")?;
                assert_eq!(s.get(b"a")?, None);

                Ok(())
            }

            #[test]
            fn point_ops_empty() -> crate::error::CResult<()> {
                let mut s = $setup;
                assert_eq!(s.get(b"")?, None);
                s.set(b"", vec![])?;
                assert_eq!(s.get(b"")?, Some(vec![]));
                s.delete(b"")?;
                assert_eq!(s.get(b"")?, None);
                Ok(())
            }

            #[test]
            fn scan() -> crate::error::CResult<()> {
                let mut s = $setup;
                s.set(b"a", vec![1])?;
                s.set(b"b", vec![2])?;
                s.set(b"ba", vec![2, 1])?;
                s.set(b"bb", vec![2, 2])?;
                s.set(b"c", vec![3])?;
                s.set(b"C", vec![3])?;

                assert_scan(
                    s.scan(b"b".to_vec()..b"bz".to_vec()),
                    vec![(b"b", vec![2]), (b"ba", vec![2, 1]), (b"bb", vec![2, 2])],
                )?;
                assert_scan(
                    s.scan(b"b".to_vec()..b"bz".to_vec()).rev(),
                    vec![(b"bb", vec![2, 2]), (b"ba", vec![2, 1]), (b"b", vec![2])],
                )?;

                assert_scan(s.scan(b"bb".to_vec()..), vec![(b"bb", vec![2, 2]), (b"c", vec![3])])?;

                Ok(())
            }

            #[test]
            fn scan_prefix() -> crate::error::CResult<()> {
                let mut s = $setup;
                s.set(b"a", vec![1])?;
                s.set(b"b", vec![2])?;
                s.set(b"ba", vec![2, 1])?;
                s.set(b"bb", vec![2, 2])?;
                s.set(b"c", vec![3])?;

                assert_scan(
                    s.scan_prefix(b"b"),
                    vec![(b"b", vec![2]), (b"ba", vec![2, 1]), (b"bb", vec![2, 2])],
                )?;
                assert_scan(s.scan_prefix(b"bb"), vec![(b"bb", vec![2, 2])])?;
                assert_scan(s.scan_prefix(b"bq"), vec![])?;

                Ok(())
            }

            #[test]
            fn status() -> crate::error::CResult<()> {
                let mut s = $setup;
                s.set(b"foo", vec![1, 2, 3])?;
                s.set(b"bar", vec![1])?;
                s.delete(b"bar")?;
                s.set(b"baz", vec![1])?;
                s.set(b"baz", vec![2])?;
                s.set(b"baz", vec![3])?;
                s.delete(b"qux")?;

                let status = s.status()?;
                assert!(status.name.len() > 0);
                assert_eq!(status.keys, 2);
                assert_eq!(status.size, 10);

                Ok(())
            }
        };
    }

    pub(crate) use test_engine;
}
