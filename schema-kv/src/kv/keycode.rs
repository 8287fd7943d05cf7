//! An order-preserving binary encoding for the primitives the MVCC layer and
//! the tuple layer need: unsigned/signed integers and byte strings.
//!
//! Grounded in two things observed in the corpus: the teacher's own doc
//! comment on `mvcc::Key` ("using the KeyCode encoding which preserves the
//! ordering and grouping of keys") and the `keycode` module used by the
//! `reifydb` MVCC transaction layer (`base::encoding::keycode`) to build
//! `prefix_range`s over its own versioned keys. Neither corpus entry ships
//! the encoding itself, so it's implemented here from the well-known
//! technique: escape `0x00` bytes so a byte string never produces a
//! sub-sequence that could be mistaken for the terminator, and flip the
//! sign bit of signed integers so two's-complement ordering matches
//! unsigned big-endian ordering.

use crate::error::{CResult, Error};

/// Appends `bytes` to `out`, escaped so that the encoding of one value never
/// forms a prefix of the encoding of a longer value sharing the same bytes.
/// `0x00` is escaped to `0x00 0xff`, and the value is terminated by `0x00
/// 0x00`.
pub fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    out.reserve(bytes.len() + 2);
    for &b in bytes {
        if b == 0x00 {
            out.push(0x00);
            out.push(0xff);
        } else {
            out.push(b);
        }
    }
    out.push(0x00);
    out.push(0x00);
}

/// Decodes a byte string encoded by [`encode_bytes`], returning the decoded
/// value and the remaining unconsumed input.
pub fn decode_bytes(input: &[u8]) -> CResult<(Vec<u8>, &[u8])> {
    let mut decoded = Vec::new();
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            0x00 => match input.get(i + 1) {
                Some(0x00) => return Ok((decoded, &input[i + 2..])),
                Some(0xff) => {
                    decoded.push(0x00);
                    i += 2;
                }
                _ => return Err(Error::Parse("invalid keycode byte-string escape".into())),
            },
            b => {
                decoded.push(b);
                i += 1;
            }
        }
    }
    Err(Error::Parse("unterminated keycode byte-string".into()))
}

/// Encodes a `u64` as 8 big-endian bytes. Unsigned big-endian bytes already
/// sort in numeric order, so no transformation is needed.
pub fn encode_u64(n: u64, out: &mut Vec<u8>) {
    out.extend_from_slice(&n.to_be_bytes());
}

pub fn decode_u64(input: &[u8]) -> CResult<(u64, &[u8])> {
    if input.len() < 8 {
        return Err(Error::Parse("truncated keycode u64".into()));
    }
    let (head, rest) = input.split_at(8);
    Ok((u64::from_be_bytes(head.try_into().unwrap()), rest))
}

/// Encodes an `i64` by flipping the sign bit, then writing big-endian bytes.
/// This maps the signed range onto the unsigned range while preserving
/// order: `i64::MIN` becomes `0`, `i64::MAX` becomes `u64::MAX`.
pub fn encode_i64(n: i64, out: &mut Vec<u8>) {
    let flipped = (n as u64) ^ (1 << 63);
    out.extend_from_slice(&flipped.to_be_bytes());
}

pub fn decode_i64(input: &[u8]) -> CResult<(i64, &[u8])> {
    let (flipped, rest) = decode_u64(input)?;
    Ok(((flipped ^ (1 << 63)) as i64, rest))
}

/// Given a prefix, returns the exclusive end bound of the range of all keys
/// beginning with that prefix (the smallest key that sorts strictly after
/// every key with the given prefix), or `None` if the prefix is all `0xff`
/// bytes (in which case the range is unbounded above).
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    match prefix.iter().rposition(|b| *b != 0xff) {
        Some(i) => {
            let mut end = prefix[..i].to_vec();
            end.push(prefix[i] + 1);
            Some(end)
        }
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_roundtrip_and_order() {
        let values: Vec<&[u8]> = vec![b"", b"a", b"aa", b"ab", b"b", b"\x00", b"\x00\x01", b"\xff"];
        let mut encoded: Vec<Vec<u8>> = values.iter().map(|v| {
            let mut out = Vec::new();
            encode_bytes(v, &mut out);
            out
        }).collect();

        for (v, enc) in values.iter().zip(encoded.iter()) {
            let (decoded, rest) = decode_bytes(enc).unwrap();
            assert_eq!(&decoded, v);
            assert!(rest.is_empty());
        }

        let mut sorted_values = values.clone();
        sorted_values.sort();
        encoded.sort();
        let decoded_order: Vec<Vec<u8>> =
            encoded.iter().map(|e| decode_bytes(e).unwrap().0).collect();
        assert_eq!(decoded_order, sorted_values.iter().map(|v| v.to_vec()).collect::<Vec<_>>());
    }

    #[test]
    fn i64_order_preserved() {
        let values = [i64::MIN, -100, -1, 0, 1, 100, i64::MAX];
        let mut encoded: Vec<Vec<u8>> = values.iter().map(|&n| {
            let mut out = Vec::new();
            encode_i64(n, &mut out);
            out
        }).collect();
        encoded.sort();
        let decoded: Vec<i64> = encoded.iter().map(|e| decode_i64(e).unwrap().0).collect();
        assert_eq!(decoded, values.to_vec());
    }

    #[test]
    fn prefix_end_wraps_ff() {
        assert_eq!(prefix_end(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_end(b"a\xff"), Some(b"b".to_vec()));
        assert_eq!(prefix_end(b"\xff\xff"), None);
    }
}
