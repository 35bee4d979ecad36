//! Key encoding for the on-disk index.
//!
//! The store keeps three databases whose keys share a common prefix scheme
//! designed to preserve lexicographic ordering, so that byte order equals
//! `(org, source, sequence)` order and a reverse cursor scan is a
//! reverse-chronological scan.
//!
//! # Key Formats
//!
//! ```text
//! entries:   | org (u64 BE) | source (terminated) | seq (u64 BE)              | -> StoredEntry bytes
//! levels:    | org (u64 BE) | source (terminated) | level (u8) | lseq (u64 BE) | -> seq (u64 BE)
//! counters:  | org (u64 BE) | source (terminated) | 0x00                      | -> entry counter
//!            | org (u64 BE) | source (terminated) | 0x01 | level (u8)         | -> level counter
//! ```
//!
//! Every key for one source shares the `| org | source |` prefix, so a
//! single range delete over that prefix removes a source's entries, level
//! indices, and counters in one transaction.
//!
//! # Terminated Source Encoding
//!
//! Variable-length source names use a terminated encoding that preserves
//! lexicographic ordering. Names are escaped and terminated with `0x00`:
//!
//! - `0x00` → `0x01 0x01`
//! - `0x01` → `0x01 0x02`
//! - `0xFF` → `0x01 0x03`
//! - All other bytes unchanged
//! - Terminated with `0x00` delimiter
//!
//! Using `0x00` as the terminator ensures shorter names sort before longer
//! names with the same prefix ("dev" < "device"), and guarantees that no
//! key of a sibling source falls inside another source's prefix range.

use std::ops::Bound;

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::model::Level;

const ESCAPE: u8 = 0x01;
const TERMINATOR: u8 = 0x00;

const KIND_ENTRIES: u8 = 0x00;
const KIND_LEVEL: u8 = 0x01;

/// Encodes an organization id as a big-endian key segment.
///
/// Organization ids are non-negative; callers validate before encoding.
fn put_org(org: i64, buf: &mut BytesMut) {
    buf.put_u64(org as u64);
}

/// Appends the escaped, terminated form of a source name.
fn put_source(source: &str, buf: &mut BytesMut) {
    for &b in source.as_bytes() {
        match b {
            0x00 => buf.put_slice(&[ESCAPE, 0x01]),
            0x01 => buf.put_slice(&[ESCAPE, 0x02]),
            0xFF => buf.put_slice(&[ESCAPE, 0x03]),
            other => buf.put_u8(other),
        }
    }
    buf.put_u8(TERMINATOR);
}

/// Reads a terminated source name, advancing `data` past the terminator.
fn read_source(data: &mut &[u8]) -> Result<String> {
    let mut out = Vec::new();
    let mut i = 0;
    loop {
        match data.get(i) {
            None => return Err(Error::Encoding("unterminated source in key".to_string())),
            Some(&TERMINATOR) => break,
            Some(&ESCAPE) => {
                let escaped = match data.get(i + 1) {
                    Some(0x01) => 0x00,
                    Some(0x02) => 0x01,
                    Some(0x03) => 0xFF,
                    other => {
                        return Err(Error::Encoding(format!(
                            "invalid escape sequence in key: {other:?}"
                        )));
                    }
                };
                out.push(escaped);
                i += 2;
            }
            Some(&b) => {
                out.push(b);
                i += 1;
            }
        }
    }
    *data = &data[i + 1..];
    String::from_utf8(out).map_err(|e| Error::Encoding(e.to_string()))
}

/// Key of an entry record: `| org | source | seq |`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EntryKey {
    pub org: i64,
    pub source: String,
    pub seq: u64,
}

impl EntryKey {
    pub(crate) fn new(org: i64, source: &str, seq: u64) -> Self {
        Self {
            org,
            source: source.to_string(),
            seq,
        }
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        put_org(self.org, &mut buf);
        put_source(&self.source, &mut buf);
        buf.put_u64(self.seq);
        buf.to_vec()
    }

    /// Recovers the sequence id from an encoded entry key.
    ///
    /// The sequence is the fixed-width suffix, so the variable-length
    /// source does not need to be decoded.
    pub(crate) fn decode_seq(key: &[u8]) -> Result<u64> {
        let tail = key
            .len()
            .checked_sub(8)
            .ok_or_else(|| Error::Encoding("entry key too short".to_string()))?;
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&key[tail..]);
        Ok(u64::from_be_bytes(seq))
    }
}

/// Key of a level-index record: `| org | source | level | lseq |`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LevelKey {
    pub org: i64,
    pub source: String,
    pub level: Level,
    pub lseq: u64,
}

impl LevelKey {
    pub(crate) fn new(org: i64, source: &str, level: Level, lseq: u64) -> Self {
        Self {
            org,
            source: source.to_string(),
            level,
            lseq,
        }
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        put_org(self.org, &mut buf);
        put_source(&self.source, &mut buf);
        buf.put_u8(self.level.tag());
        buf.put_u64(self.lseq);
        buf.to_vec()
    }
}

/// What a counter key counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CounterKind {
    /// The source's entry counter.
    Entries,
    /// A per-level counter under the source.
    Level(Level),
}

/// Key of a counter record.
///
/// Counters are the sequence state of a source: they assign the next id
/// and double as the total-ever-written count reported by queries. A
/// source exists iff its entry counter key exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CounterKey {
    pub org: i64,
    pub source: String,
    pub kind: CounterKind,
}

impl CounterKey {
    pub(crate) fn entries(org: i64, source: &str) -> Self {
        Self {
            org,
            source: source.to_string(),
            kind: CounterKind::Entries,
        }
    }

    pub(crate) fn level(org: i64, source: &str, level: Level) -> Self {
        Self {
            org,
            source: source.to_string(),
            kind: CounterKind::Level(level),
        }
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        put_org(self.org, &mut buf);
        put_source(&self.source, &mut buf);
        match self.kind {
            CounterKind::Entries => buf.put_u8(KIND_ENTRIES),
            CounterKind::Level(level) => {
                buf.put_u8(KIND_LEVEL);
                buf.put_u8(level.tag());
            }
        }
        buf.to_vec()
    }

    pub(crate) fn decode(key: &[u8]) -> Result<Self> {
        if key.len() < 8 {
            return Err(Error::Encoding("counter key too short".to_string()));
        }
        let mut org_bytes = [0u8; 8];
        org_bytes.copy_from_slice(&key[..8]);
        let org = u64::from_be_bytes(org_bytes) as i64;

        let mut rest = &key[8..];
        let source = read_source(&mut rest)?;

        let kind = match rest {
            [KIND_ENTRIES] => CounterKind::Entries,
            [KIND_LEVEL, tag] => CounterKind::Level(Level::from_tag(*tag).ok_or_else(|| {
                Error::Encoding(format!("unknown level tag in counter key: {tag}"))
            })?),
            _ => {
                return Err(Error::Encoding(
                    "malformed counter key suffix".to_string(),
                ));
            }
        };

        Ok(Self {
            org,
            source,
            kind,
        })
    }
}

/// The shared `| org | source |` prefix of all keys belonging to a source.
pub(crate) fn source_prefix(org: i64, source: &str) -> Vec<u8> {
    let mut buf = BytesMut::new();
    put_org(org, &mut buf);
    put_source(source, &mut buf);
    buf.to_vec()
}

/// The `| org |` prefix of all keys belonging to an organization.
pub(crate) fn org_prefix(org: i64) -> Vec<u8> {
    (org as u64).to_be_bytes().to_vec()
}

/// The smallest key strictly greater than every key carrying `prefix`.
///
/// Trailing 0xFF bytes cannot be incremented, so they are dropped and the
/// next byte carries. The org prefix has a zero top byte (ids are
/// non-negative) and the source prefix ends with its terminator, so the
/// result is never empty.
pub(crate) fn prefix_successor(prefix: &[u8]) -> Vec<u8> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.last_mut() {
        if *last < 0xFF {
            *last += 1;
            break;
        }
        upper.pop();
    }
    upper
}

/// A half-open range covering every key that starts with `prefix`.
pub(crate) fn prefix_range(prefix: &[u8]) -> (Vec<u8>, Vec<u8>) {
    (prefix.to_vec(), prefix_successor(prefix))
}

/// Range bounds over borrowed key slices, as the store's range APIs expect.
pub(crate) fn bounds<'a>(
    lo: &'a [u8],
    hi_exclusive: &'a [u8],
) -> (Bound<&'a [u8]>, Bound<&'a [u8]>) {
    (Bound::Included(lo), Bound::Excluded(hi_exclusive))
}
