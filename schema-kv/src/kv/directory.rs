//! The directory layer: a hierarchical namespace of named subspaces, each
//! mapped to a short, stable byte prefix. Modeled on the FoundationDB
//! directory layer referenced by spec.md's KV-store contract
//! (`open_dir`/`create_or_open`/`remove`/`move`/`list`), and implemented the
//! way the teacher builds services on top of its own transactional engine:
//! as ordinary reads/writes through a [`crate::kv::transaction::Transaction`],
//! not as a separate storage facility.
//!
//! Two reserved single-byte namespaces partition the whole keyspace used by
//! [`crate::kv::facade::KvFacade`] consumers:
//! - `0x00` — directory metadata: `path -> allocated prefix` mappings, plus
//!   the prefix allocation counter.
//! - `0x01` — directory content: `allocated_prefix ++ caller key -> value`,
//!   what [`pack`]/[`range`] address.
//!
//! Nothing else is expected to write directly to the engine underneath a
//! `KvFacade`, so this partitioning is exhaustive, not merely a convention.

use crate::error::{CResult, Error};
use crate::kv::transaction::Transaction;
use crate::kv::tuple::{tuple_pack, tuple_unpack, TupleItem};
use crate::kv::{engine::Engine, keycode};

const META_NS: u8 = 0x00;
const CONTENT_NS: u8 = 0x01;
const NEXT_ID_KEY: [u8; 2] = [META_NS, 0xff];
const DIR_TAG: &str = "dir";

/// A handle to an opened directory: its path and its allocated content prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dir {
    pub path: Vec<String>,
    pub prefix: Vec<u8>,
}

fn meta_key(path: &[String]) -> Vec<u8> {
    let mut items = vec![TupleItem::Str(DIR_TAG.to_string())];
    items.extend(path.iter().cloned().map(TupleItem::Str));
    let mut out = vec![META_NS];
    out.extend(tuple_pack(&items));
    out
}

fn decode_meta_path(key: &[u8]) -> CResult<Vec<String>> {
    let body = key.strip_prefix(&[META_NS]).ok_or_else(|| Error::Internal("not a directory meta key".into()))?;
    let items = tuple_unpack(body)?;
    let mut iter = items.into_iter();
    match iter.next() {
        Some(TupleItem::Str(tag)) if tag == DIR_TAG => {}
        _ => return Err(Error::Internal("malformed directory meta key".into())),
    }
    iter.map(|item| match item {
        TupleItem::Str(s) => Ok(s),
        TupleItem::Int(_) => Err(Error::Internal("non-string directory path component".into())),
    })
    .collect()
}

fn allocate_prefix<E: Engine>(txn: &Transaction<E>) -> CResult<Vec<u8>> {
    let next = match txn.get(&NEXT_ID_KEY)? {
        Some(v) => crate::kv::tuple::unpack_i64(&v)? as u64 + 1,
        None => 1,
    };
    txn.set(&NEXT_ID_KEY, crate::kv::tuple::pack_i64(next as i64))?;
    let mut prefix = vec![CONTENT_NS];
    keycode::encode_u64(next, &mut prefix);
    Ok(prefix)
}

/// Opens an existing directory, failing if it has not been created.
pub fn open_dir<E: Engine>(txn: &Transaction<E>, path: &[String]) -> CResult<Dir> {
    match txn.get(&meta_key(path))? {
        Some(prefix) => Ok(Dir { path: path.to_vec(), prefix }),
        None => Err(Error::InvalidSchema { reasons: vec![format!("directory {path:?} does not exist")] }),
    }
}

/// Opens a directory, creating it (and any missing ancestors) if necessary.
pub fn create_or_open<E: Engine>(txn: &Transaction<E>, path: &[String]) -> CResult<Dir> {
    if let Some(prefix) = txn.get(&meta_key(path))? {
        return Ok(Dir { path: path.to_vec(), prefix });
    }
    for depth in 1..path.len() {
        let ancestor = &path[..depth];
        if txn.get(&meta_key(ancestor))?.is_none() {
            let prefix = allocate_prefix(txn)?;
            txn.set(&meta_key(ancestor), prefix)?;
        }
    }
    let prefix = allocate_prefix(txn)?;
    txn.set(&meta_key(path), prefix.clone())?;
    Ok(Dir { path: path.to_vec(), prefix })
}

/// Removes a directory and everything nested beneath it, including content.
pub fn remove<E: Engine>(txn: &Transaction<E>, path: &[String]) -> CResult<()> {
    open_dir(txn, path)?;

    // `meta_key(path)`'s full, correctly terminated encoding is itself a safe
    // scan prefix: it matches this entry exactly and, because tuple encoding
    // escapes/terminates each component, can only be a byte-prefix of a
    // deeper path's encoding, never of an unrelated sibling's.
    let scan_prefix = meta_key(path);
    let entries = txn.scan_prefix(&scan_prefix)?.collect()?;
    for (key, prefix) in entries {
        let (content_start, content_end) = range(&Dir { path: decode_meta_path(&key)?, prefix });
        for item in txn.scan(content_start..content_end)?.collect()? {
            txn.delete(&item.0)?;
        }
        txn.delete(&key)?;
    }
    Ok(())
}

/// Moves (renames) a directory subtree from one path to another. The
/// destination's parent must already exist; the destination itself must not.
pub fn move_dir<E: Engine>(txn: &Transaction<E>, from: &[String], to: &[String]) -> CResult<()> {
    if txn.get(&meta_key(to))?.is_some() {
        return Err(Error::InvalidSchema { reasons: vec![format!("directory {to:?} already exists")] });
    }
    let scan_prefix = meta_key(from);
    let entries = txn.scan_prefix(&scan_prefix)?.collect()?;
    for (key, value) in entries {
        let suffix_path = decode_meta_path(&key)?;
        let suffix = &suffix_path[from.len()..];
        let mut new_path = to.to_vec();
        new_path.extend_from_slice(suffix);
        txn.set(&meta_key(&new_path), value)?;
        txn.delete(&key)?;
    }
    Ok(())
}

/// Lists the immediate child path components of a directory.
pub fn list<E: Engine>(txn: &Transaction<E>, path: &[String]) -> CResult<Vec<String>> {
    let scan_prefix = meta_key(path);
    let depth = path.len() + 1;
    let mut children = Vec::new();
    for (key, _) in txn.scan_prefix(&scan_prefix)?.collect()? {
        let full = decode_meta_path(&key)?;
        if full.len() == depth {
            children.push(full[depth - 1].clone());
        }
    }
    Ok(children)
}

/// Packs a caller key under a directory's content prefix.
pub fn pack(dir: &Dir, key: &[u8]) -> Vec<u8> {
    let mut out = dir.prefix.clone();
    out.extend_from_slice(key);
    out
}

/// Returns the `[start, end)` range covering every key packed under a directory.
pub fn range(dir: &Dir) -> (Vec<u8>, Vec<u8>) {
    let start = dir.prefix.clone();
    let end = keycode::prefix_end(&dir.prefix).unwrap_or_else(|| {
        let mut end = start.clone();
        end.push(0xff);
        end
    });
    (start, end)
}
