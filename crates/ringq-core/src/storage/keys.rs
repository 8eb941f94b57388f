//! Key encoding for RocksDB column families.
//!
//! All numeric values use big-endian encoding for correct lexicographic ordering.
//! Composite keys use `:` (0x3A) as separator.
//! Variable-length strings are length-prefixed with a big-endian u16.

use crate::error::{StorageError, StorageResult};

const SEPARATOR: u8 = b':';

/// Encode a u64 as 8 big-endian bytes.
fn encode_u64(val: u64) -> [u8; 8] {
    val.to_be_bytes()
}

/// Encode a variable-length string with a 2-byte big-endian length prefix.
fn encode_string(s: &str) -> StorageResult<Vec<u8>> {
    let len = u16::try_from(s.len())
        .map_err(|_| StorageError::Unavailable(format!("collection name too long: {s}")))?;
    let mut buf = Vec::with_capacity(2 + s.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(buf)
}

/// Build a prefix for iterating all documents of a collection in insertion order.
pub fn document_prefix(collection: &str) -> StorageResult<Vec<u8>> {
    let mut prefix = encode_string(collection)?;
    prefix.push(SEPARATOR);
    Ok(prefix)
}

/// Build a document key: `{collection}:{insertion_seq}`
///
/// The sequence is big-endian so a prefix scan walks oldest first, which is
/// also the eviction order.
pub fn document_key(collection: &str, seq: u64) -> StorageResult<Vec<u8>> {
    let mut key = document_prefix(collection)?;
    key.extend_from_slice(&encode_u64(seq));
    Ok(key)
}

/// Build an identity index key: `{collection}:{doc_id}`
pub fn id_key(collection: &str, doc_id: &uuid::Uuid) -> StorageResult<Vec<u8>> {
    let mut key = encode_string(collection)?;
    key.push(SEPARATOR);
    key.extend_from_slice(doc_id.as_bytes());
    Ok(key)
}

/// Extract the insertion sequence from the trailing 8 bytes of a document key.
pub fn parse_seq(key: &[u8]) -> Option<u64> {
    if key.len() < 8 {
        return None;
    }
    let bytes: [u8; 8] = key[key.len() - 8..].try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}
