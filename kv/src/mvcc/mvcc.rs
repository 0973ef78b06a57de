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
//! For example, the keys a,b,c,d may have the following values at various logical timestamps (x is tombstone):
//!
//! Time
//! 5
//! 4  a4
//! 3      b3      x
//! 2
//! 1  a1      c1  d1
//!    a   b   c   d   Keys
//!
//! * At time t1, a transaction writes a=a1,c=c1,d=d1 and commits it.
//! * At time t2, transaction T2 is started, will see the values a=a1, c=c1, d=d1.
//! * At t3, a transaction writes b=b3 and deletes D.
//! * At t4, a transaction writes a=a4.
//! * A different transaction t5 running at T=5 will see a=a4, b=b3, c=c1.
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
//! A transaction's writes become atomically visible to subsequent transactions only when they commit,
//! and are rolled back on failure.
//! Read-only transactions never conflict with other transactions.
//!
//! Transactions write new versions at their timestamp, storing them as `Key::Version(key, version) => value`.
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
//! Row/key-level write-write serialisation is handled one layer up, by the lock manager
//! (`crate::lock`); this module only makes each writable transaction's own version visible to
//! itself and invisible to everyone else until commit.
//!
//! mvcc:
//!   Writers don't block readers.
//!   Readers don't block writers (of different keys; same-key writers are serialised by locks).

use std::borrow::Cow;
use std::sync::{Arc, Mutex};
use serde_derive::{Deserialize, Serialize};
use crate::encoding::keycode;
use crate::error::{CResult, Error};
use crate::mvcc::transaction::{Transaction, TransactionDef, TransactionState};
use crate::mvcc::Version;
use crate::storage::engine::Engine;

/// An MVCC-based transactional key-value engine.
/// It wraps an underlying storage engine that's used for raw key/value storage.
pub struct MVCC<E: Engine> {
    engine: Arc<Mutex<E>>,
}

pub trait MVCCDef<E: Engine> {
    fn new(engine: E) -> MVCC<E>;

    fn begin(&self) -> CResult<Transaction<E>>;

    fn begin_read_only(&self) -> CResult<Transaction<E>>;

    fn resume(&self, state: TransactionState) -> CResult<Transaction<E>>;

    fn status(&self) -> CResult<Status>;
}

/// MVCC keys, using the keycode separator/escape scheme to preserve the
/// ordering and grouping of keys. Cow byte slices allow encoding borrowed
/// values and decoding into owned values.
///
/// Each variant has its own tag byte, followed by an order-preserving
/// encoding of its fields. A `Key::Version`'s user key is itself an
/// arbitrary (already keycode-encoded) byte string, so it's escaped the
/// same way `keycode` escapes `Text`/`Blob` components before the version
/// suffix is appended, to keep the whole key ordered and unambiguous to
/// split back apart.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub enum Key<'a> {
    /// The next available version.
    NextVersion,

    /// Active (uncommitted) transactions by version.
    TxnActive(Version),

    /// `A snapshot of the active set` at each version.
    /// Only written for versions where the active set is non-empty (excluding itself).
    TxnActiveSnapshot(Version),

    /// Keeps track of all keys written to by an active transaction (identified by its version), in case it needs to roll back.
    TxnWrite(
        Version,
        #[serde(with = "serde_bytes")]
        #[serde(borrow)]
        Cow<'a, [u8]>,
    ),

    /// A versioned key/value pair.
    Version(
        #[serde(with = "serde_bytes")]
        #[serde(borrow)]
        Cow<'a, [u8]>,
        Version,
    ),

    /// Unversioned non-transactional key/value pairs.
    /// These exist separately from versioned keys, i.e. the unversioned key "abcdefg" is entirely independent of the versioned key "abcdefg@7".
    /// These are mostly used for metadata (the catalog and per-table/index sequence counters).
    Unversioned(
        #[serde(with = "serde_bytes")]
        #[serde(borrow)]
        Cow<'a, [u8]>,
    ),
}

const TAG_NEXT_VERSION: u8 = 0x00;
const TAG_TXN_ACTIVE: u8 = 0x01;
const TAG_TXN_ACTIVE_SNAPSHOT: u8 = 0x02;
const TAG_TXN_WRITE: u8 = 0x03;
const TAG_VERSION: u8 = 0x04;
const TAG_UNVERSIONED: u8 = 0x05;

impl<'a> Key<'a> {
    pub fn decode(bytes: &'a [u8]) -> CResult<Self> {
        let tag = *bytes.first().ok_or_else(|| Error::Corruption("empty mvcc key".into()))?;
        let rest = &bytes[1..];
        match tag {
            TAG_NEXT_VERSION => Ok(Key::NextVersion),
            TAG_TXN_ACTIVE => Ok(Key::TxnActive(decode_version(rest)?)),
            TAG_TXN_ACTIVE_SNAPSHOT => Ok(Key::TxnActiveSnapshot(decode_version(rest)?)),
            TAG_TXN_WRITE => {
                let version = decode_version(&rest[..8])?;
                let raw = keycode::unescape(trim_separator(&rest[8..])?)?;
                Ok(Key::TxnWrite(version, Cow::Owned(raw)))
            }
            TAG_VERSION => {
                let sep = find_separator(rest)?;
                let raw = keycode::unescape(&rest[..sep])?;
                let version = decode_version(&rest[sep + 1..])?;
                Ok(Key::Version(Cow::Owned(raw), version))
            }
            TAG_UNVERSIONED => Ok(Key::Unversioned(Cow::Owned(rest.to_vec()))),
            other => Err(Error::Corruption(format!("unknown mvcc key tag {other:#x}"))),
        }
    }

    pub fn encode(&self) -> CResult<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Key::NextVersion => out.push(TAG_NEXT_VERSION),
            Key::TxnActive(version) => {
                out.push(TAG_TXN_ACTIVE);
                out.extend_from_slice(&version.to_be_bytes());
            }
            Key::TxnActiveSnapshot(version) => {
                out.push(TAG_TXN_ACTIVE_SNAPSHOT);
                out.extend_from_slice(&version.to_be_bytes());
            }
            Key::TxnWrite(version, key) => {
                out.push(TAG_TXN_WRITE);
                out.extend_from_slice(&version.to_be_bytes());
                out.extend_from_slice(keycode::escape(key).as_bytes());
                out.push(keycode::SEPARATOR);
            }
            Key::Version(key, version) => {
                out.push(TAG_VERSION);
                out.extend_from_slice(keycode::escape(key).as_bytes());
                out.push(keycode::SEPARATOR);
                out.extend_from_slice(&version.to_be_bytes());
            }
            Key::Unversioned(key) => {
                out.push(TAG_UNVERSIONED);
                out.extend_from_slice(key);
            }
        }
        Ok(out)
    }
}

fn decode_version(bytes: &[u8]) -> CResult<Version> {
    let arr: [u8; 8] = bytes
        .get(..8)
        .ok_or_else(|| Error::Corruption("truncated mvcc version".into()))?
        .try_into()
        .unwrap();
    Ok(Version::from_be_bytes(arr))
}

fn find_separator(bytes: &[u8]) -> CResult<usize> {
    bytes
        .iter()
        .position(|b| *b == keycode::SEPARATOR)
        .ok_or_else(|| Error::Corruption("unterminated mvcc key component".into()))
}

fn trim_separator(bytes: &[u8]) -> CResult<&[u8]> {
    let end = find_separator(bytes)?;
    Ok(&bytes[..end])
}

/// MVCC key prefixes, for prefix scans. These must match the keys above, including the tag byte.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub enum KeyPrefix<'a> {
    TxnActive,

    TxnWrite(Version),

    Version(
        #[serde(with = "serde_bytes")]
        #[serde(borrow)]
        Cow<'a, [u8]>,
    ),
}

impl<'a> KeyPrefix<'a> {
    pub fn encode(&self) -> CResult<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            KeyPrefix::TxnActive => out.push(TAG_TXN_ACTIVE),
            KeyPrefix::TxnWrite(version) => {
                out.push(TAG_TXN_WRITE);
                out.extend_from_slice(&version.to_be_bytes());
            }
            KeyPrefix::Version(key) => {
                out.push(TAG_VERSION);
                out.extend_from_slice(keycode::escape(key).as_bytes());
                out.push(keycode::SEPARATOR);
            }
        }
        Ok(out)
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
        let mut engine =
            self.engine.lock().map_err(|_| Error::Internal("engine mutex poisoned".into()))?;

        let versions = match engine.get(&Key::NextVersion.encode()?)? {
            Some(v) => bincode::deserialize::<Version>(&v)?.saturating_sub(1),
            None => 0,
        };

        let active_txns = engine
            .scan_prefix(&KeyPrefix::TxnActive.encode()?)
            .collect::<CResult<Vec<_>>>()?
            .len() as u64;

        Ok(Status { versions, active_txns, storage: engine.status()? })
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
    /// The total number of MVCC versions (i.e.  read-write transactions).
    pub versions: u64,
    /// Number of currently active transactions.
    pub active_txns: u64,
    /// The storage engine.
    pub storage: super::super::storage::Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trips() {
        let cases: Vec<Key> = vec![
            Key::NextVersion,
            Key::TxnActive(7),
            Key::TxnActiveSnapshot(7),
            Key::TxnWrite(7, Cow::Borrowed(b"abc")),
            Key::Version(Cow::Borrowed(b"abc"), 7),
            Key::Unversioned(Cow::Borrowed(b"catalog-entry")),
        ];
        for key in cases {
            let encoded = key.encode().unwrap();
            let decoded = Key::decode(&encoded).unwrap();
            assert_eq!(format!("{key:?}"), format!("{decoded:?}"));
        }
    }

    #[test]
    fn version_keys_of_same_user_key_sort_by_version() {
        let a = Key::Version(Cow::Borrowed(b"x"), 1).encode().unwrap();
        let b = Key::Version(Cow::Borrowed(b"x"), 2).encode().unwrap();
        assert!(a < b);
    }

    #[test]
    fn version_key_prefix_matches_version_key_encoding() {
        let prefix = KeyPrefix::Version(Cow::Borrowed(b"x")).encode().unwrap();
        let full = Key::Version(Cow::Borrowed(b"x"), 9).encode().unwrap();
        assert!(full.starts_with(&prefix));
    }
}
