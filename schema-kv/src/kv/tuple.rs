//! Tuple packing: an order-preserving encoding for small sequences of typed
//! values (`i64`/`String`), used for the schema manager's own stored values
//! (`generation`, `dataVersion`, `metaDataVersion`, directory-allocator
//! counters) and, together with [`crate::kv::directory`], for composing full
//! keys under a directory's prefix.
//!
//! Distinct from [`crate::kv::mvcc`]'s internal key encoding: that module
//! encodes the MVCC transaction machinery's own keys, this one packs
//! caller-supplied values. Both ultimately reuse the same
//! [`crate::kv::keycode`] primitives so a packed tuple sorts the way its
//! unpacked values would.

use crate::error::{CResult, Error};
use crate::kv::keycode;

/// A single item in a packed tuple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum TupleItem {
    Int(i64),
    Str(String),
}

impl From<i64> for TupleItem {
    fn from(n: i64) -> Self {
        TupleItem::Int(n)
    }
}

impl From<String> for TupleItem {
    fn from(s: String) -> Self {
        TupleItem::Str(s)
    }
}

impl From<&str> for TupleItem {
    fn from(s: &str) -> Self {
        TupleItem::Str(s.to_string())
    }
}

const TAG_INT: u8 = 1;
const TAG_STR: u8 = 2;

/// Packs a sequence of tuple items into an order-preserving byte string:
/// tuples compare item-by-item, left to right, the same way their unpacked
/// values would.
pub fn tuple_pack(items: &[TupleItem]) -> Vec<u8> {
    let mut out = Vec::new();
    for item in items {
        match item {
            TupleItem::Int(n) => {
                out.push(TAG_INT);
                keycode::encode_i64(*n, &mut out);
            }
            TupleItem::Str(s) => {
                out.push(TAG_STR);
                keycode::encode_bytes(s.as_bytes(), &mut out);
            }
        }
    }
    out
}

/// Unpacks a byte string produced by [`tuple_pack`] back into its items.
pub fn tuple_unpack(bytes: &[u8]) -> CResult<Vec<TupleItem>> {
    let mut items = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        let (&tag, tail) = rest.split_first().ok_or_else(|| Error::Parse("empty tuple item".into()))?;
        match tag {
            TAG_INT => {
                let (n, tail) = keycode::decode_i64(tail)?;
                items.push(TupleItem::Int(n));
                rest = tail;
            }
            TAG_STR => {
                let (s, tail) = keycode::decode_bytes(tail)?;
                items.push(TupleItem::Str(String::from_utf8(s)?));
                rest = tail;
            }
            t => return Err(Error::Parse(format!("unknown tuple tag {t}"))),
        }
    }
    Ok(items)
}

/// Convenience for packing a single integer value, as stored at
/// `generation`/`dataVersion`/`metaDataVersion`.
pub fn pack_i64(n: i64) -> Vec<u8> {
    tuple_pack(&[TupleItem::Int(n)])
}

/// Convenience for unpacking a single integer value.
pub fn unpack_i64(bytes: &[u8]) -> CResult<i64> {
    match tuple_unpack(bytes)?.as_slice() {
        [TupleItem::Int(n)] => Ok(*n),
        _ => Err(Error::Parse("expected a single packed i64".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let items = vec![TupleItem::Int(-7), TupleItem::Str("schema".into()), TupleItem::Int(42)];
        let packed = tuple_pack(&items);
        assert_eq!(tuple_unpack(&packed).unwrap(), items);
    }

    #[test]
    fn order_preserved_for_shared_first_item() {
        let a = tuple_pack(&[TupleItem::Str("schema".into()), TupleItem::Int(1)]);
        let b = tuple_pack(&[TupleItem::Str("schema".into()), TupleItem::Int(2)]);
        let c = tuple_pack(&[TupleItem::Str("schemb".into()), TupleItem::Int(0)]);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn single_i64_roundtrip() {
        assert_eq!(unpack_i64(&pack_i64(-1)).unwrap(), -1);
        assert_eq!(unpack_i64(&pack_i64(0)).unwrap(), 0);
        assert_eq!(unpack_i64(&pack_i64(i64::MAX)).unwrap(), i64::MAX);
    }
}
