use std::collections::BTreeMap;
use std::ops::Bound;
use crate::error::{CResult, Error};
use crate::mvcc::mvcc::{Key, KeyPrefix};
use crate::mvcc::transaction::TransactionState;
use crate::mvcc::Version;
use crate::storage::engine::Engine;

/// Whether `version` is visible to a transaction in the given state: its own
/// writes are always visible, anything newer than its snapshot never is, and
/// anything written by a transaction that was still active when it began is
/// invisible even if the version number is lower.
pub(super) fn is_visible(txn: &TransactionState, version: Version) -> bool {
    if version == txn.version {
        true
    } else if version > txn.version {
        false
    } else {
        !txn.active.contains(&version)
    }
}

/// Translates a user-key range into the raw engine-key range that covers
/// every version of every key in it, bounded below by the empty version
/// prefix and above by `Version::MAX` so inclusive/exclusive user-key bounds
/// translate correctly regardless of how many versions a key has.
fn encode_range(range: (Bound<Vec<u8>>, Bound<Vec<u8>>)) -> CResult<(Bound<Vec<u8>>, Bound<Vec<u8>>)> {
    let start = match range.0 {
        Bound::Included(k) => Bound::Included(KeyPrefix::Version(k.into()).encode()?),
        Bound::Excluded(k) => Bound::Excluded(Key::Version(k.into(), Version::MAX).encode()?),
        Bound::Unbounded => Bound::Unbounded,
    };
    let end = match range.1 {
        Bound::Included(k) => Bound::Included(Key::Version(k.into(), Version::MAX).encode()?),
        Bound::Excluded(k) => Bound::Excluded(KeyPrefix::Version(k.into()).encode()?),
        Bound::Unbounded => Bound::Unbounded,
    };
    Ok((start, end))
}

/// Scans a user-key range and returns the latest value visible to `txn` for
/// each live key, eagerly materialized into a `Vec`.
///
/// This replaces a streaming `Peekable<VersionIterator>` design: holding the
/// engine's `MutexGuard` alongside an iterator borrowing from it is a
/// self-referential struct, and the transactions in this engine are small
/// enough (rows and index entries, not full table scans of an external
/// store) that eager materialization is the simpler correct choice.
pub(super) fn scan<E: Engine>(
    engine: &mut E,
    txn: &TransactionState,
    range: (Bound<Vec<u8>>, Bound<Vec<u8>>),
) -> CResult<Vec<(Vec<u8>, Vec<u8>)>> {
    let (start, end) = encode_range(range)?;
    let mut latest: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();
    for item in engine.scan((start, end)) {
        let (raw_key, raw_value) = item?;
        let (key, version) = match Key::decode(&raw_key)? {
            Key::Version(key, version) => (key.into_owned(), version),
            other => return Err(Error::Corruption(format!("expected Version key, got {other:?}"))),
        };
        if !is_visible(txn, version) {
            continue;
        }
        let value: Option<Vec<u8>> = bincode::deserialize(&raw_value)?;
        latest.insert(key, value);
    }
    Ok(latest.into_iter().filter_map(|(k, v)| v.map(|v| (k, v))).collect())
}
