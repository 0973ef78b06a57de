use std::borrow::Cow;
use std::collections::HashSet;
use std::ops::{Bound, RangeBounds};
use std::sync::{Arc, Mutex};
use serde_derive::{Deserialize, Serialize};
use crate::error::{CResult, Error};
use crate::mvcc::mvcc::{Key, KeyPrefix};
use crate::mvcc::scan;
use crate::mvcc::Version;
use crate::storage::engine::Engine;

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

pub trait TransactionDef<E: Engine> {
    /// Begins a new read-write transaction, taking the next available
    /// version and recording it in the active set.
    fn begin(engine: Arc<Mutex<E>>) -> CResult<Transaction<E>>;

    /// Begins a new read-only transaction. If `as_of` is given, the
    /// transaction observes the database as of that historical version
    /// rather than the current one.
    fn begin_read_only(engine: Arc<Mutex<E>>, as_of: Option<Version>) -> CResult<Transaction<E>>;

    /// Resumes a transaction from a previously persisted state, e.g. across
    /// a process restart for the session that owned it.
    fn resume(engine: Arc<Mutex<E>>, state: TransactionState) -> CResult<Transaction<E>>;

    /// The version this transaction is running at.
    fn version(&self) -> Version;

    /// The transaction's full state, for suspension/resumption.
    fn state(&self) -> &TransactionState;

    /// Commits the transaction, making its writes visible to subsequent
    /// transactions.
    fn commit(self) -> CResult<()>;

    /// Rolls back the transaction, discarding its writes.
    fn rollback(self) -> CResult<()>;

    /// Fetches a value for a key, if it exists and is visible.
    fn get(&self, key: &[u8]) -> CResult<Option<Vec<u8>>>;

    /// Sets a value for a key.
    fn set(&self, key: &[u8], value: Vec<u8>) -> CResult<()>;

    /// Deletes a key, writing a tombstone.
    fn delete(&self, key: &[u8]) -> CResult<()>;

    /// Scans a key range, returning the latest visible value per live key.
    fn scan(&self, range: impl RangeBounds<Vec<u8>>) -> CResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Scans all keys with the given prefix.
    fn scan_prefix(&self, prefix: &[u8]) -> CResult<Vec<(Vec<u8>, Vec<u8>)>>;
}

impl<E: Engine> TransactionDef<E> for Transaction<E> {
    fn begin(engine: Arc<Mutex<E>>) -> CResult<Transaction<E>> {
        let mut session = engine.lock().map_err(|_| Error::Internal("engine mutex poisoned".into()))?;

        let version = match session.get(&Key::NextVersion.encode()?)? {
            Some(raw) => bincode::deserialize(&raw)?,
            None => 1,
        };
        session.set(&Key::NextVersion.encode()?, bincode::serialize(&(version + 1))?)?;

        let active = scan_active_set(&mut *session)?;
        if !active.is_empty() {
            session.set(
                &Key::TxnActiveSnapshot(version).encode()?,
                bincode::serialize(&active)?,
            )?;
        }
        session.set(&Key::TxnActive(version).encode()?, vec![])?;
        drop(session);

        Ok(Transaction { engine, st: TransactionState { version, read_only: false, active } })
    }

    fn begin_read_only(engine: Arc<Mutex<E>>, as_of: Option<Version>) -> CResult<Transaction<E>> {
        let mut session = engine.lock().map_err(|_| Error::Internal("engine mutex poisoned".into()))?;

        let mut version = match session.get(&Key::NextVersion.encode()?)? {
            Some(raw) => bincode::deserialize(&raw)?,
            None => 1,
        };

        let active = if let Some(as_of) = as_of {
            if as_of >= version {
                return Err(Error::Internal(format!("version {as_of} does not exist yet")));
            }
            version = as_of;
            match session.get(&Key::TxnActiveSnapshot(version).encode()?)? {
                Some(raw) => bincode::deserialize(&raw)?,
                None => HashSet::new(),
            }
        } else {
            scan_active_set(&mut *session)?
        };
        drop(session);

        Ok(Transaction { engine, st: TransactionState { version, read_only: true, active } })
    }

    fn resume(engine: Arc<Mutex<E>>, state: TransactionState) -> CResult<Transaction<E>> {
        Ok(Transaction { engine, st: state })
    }

    fn version(&self) -> Version {
        self.st.version
    }

    fn state(&self) -> &TransactionState {
        &self.st
    }

    fn commit(self) -> CResult<()> {
        if self.st.read_only {
            return Ok(());
        }
        let mut session = self.engine.lock().map_err(|_| Error::Internal("engine mutex poisoned".into()))?;

        let writes: Vec<Vec<u8>> = session
            .scan_prefix(&KeyPrefix::TxnWrite(self.st.version).encode()?)
            .collect::<CResult<Vec<_>>>()?
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        for write_key in writes {
            session.delete(&write_key)?;
        }
        session.delete(&Key::TxnActive(self.st.version).encode()?)?;
        Ok(())
    }

    fn rollback(self) -> CResult<()> {
        if self.st.read_only {
            return Ok(());
        }
        let mut session = self.engine.lock().map_err(|_| Error::Internal("engine mutex poisoned".into()))?;

        let writes: Vec<Vec<u8>> = session
            .scan_prefix(&KeyPrefix::TxnWrite(self.st.version).encode()?)
            .collect::<CResult<Vec<_>>>()?
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        for write_key in writes {
            match Key::decode(&write_key)? {
                Key::TxnWrite(_, key) => {
                    let version_key = Key::Version(Cow::Borrowed(key.as_ref()), self.st.version).encode()?;
                    session.delete(&version_key)?;
                }
                other => return Err(Error::Corruption(format!("expected TxnWrite key, got {other:?}"))),
            }
            session.delete(&write_key)?;
        }
        session.delete(&Key::TxnActive(self.st.version).encode()?)?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        let mut session = self.engine.lock().map_err(|_| Error::Internal("engine mutex poisoned".into()))?;

        let from = Key::Version(Cow::Borrowed(key), 0).encode()?;
        let to = Key::Version(Cow::Borrowed(key), self.st.version).encode()?;
        let mut iter = session.scan(from..=to).rev();
        while let Some(item) = iter.next() {
            let (raw_key, raw_value) = item?;
            match Key::decode(&raw_key)? {
                Key::Version(_, version) => {
                    if scan::is_visible(&self.st, version) {
                        return Ok(bincode::deserialize(&raw_value)?);
                    }
                }
                other => return Err(Error::Corruption(format!("expected Version key, got {other:?}"))),
            }
        }
        Ok(None)
    }

    fn set(&self, key: &[u8], value: Vec<u8>) -> CResult<()> {
        self.write_version(key, Some(value))
    }

    fn delete(&self, key: &[u8]) -> CResult<()> {
        self.write_version(key, None)
    }

    fn scan(&self, range: impl RangeBounds<Vec<u8>>) -> CResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let bounds = (clone_bound(range.start_bound()), clone_bound(range.end_bound()));
        let mut session = self.engine.lock().map_err(|_| Error::Internal("engine mutex poisoned".into()))?;
        scan::scan(&mut *session, &self.st, bounds)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> CResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let start = Bound::Included(prefix.to_vec());
        let end = match prefix.iter().rposition(|b| *b != 0xff) {
            Some(i) => Bound::Excluded(
                prefix.iter().take(i).copied().chain(std::iter::once(prefix[i] + 1)).collect(),
            ),
            None => Bound::Unbounded,
        };
        self.scan((start, end))
    }
}

impl<E: Engine> Transaction<E> {
    /// Writes a version for `key` at this transaction's version, recording
    /// it in the write set for rollback. `None` writes a tombstone.
    ///
    /// Write-write conflicts between concurrent transactions are prevented
    /// one layer up, by the lock manager taking an exclusive lock on `key`
    /// before this is ever called -- this just needs to land the write at
    /// the right version.
    fn write_version(&self, key: &[u8], value: Option<Vec<u8>>) -> CResult<()> {
        if self.st.read_only {
            return Err(Error::ReadOnly);
        }
        let mut session = self.engine.lock().map_err(|_| Error::Internal("engine mutex poisoned".into()))?;

        let version_key = Key::Version(Cow::Borrowed(key), self.st.version).encode()?;
        session.set(&version_key, bincode::serialize(&value)?)?;

        let write_key = Key::TxnWrite(self.st.version, Cow::Borrowed(key)).encode()?;
        session.set(&write_key, vec![])?;
        Ok(())
    }
}

fn clone_bound(bound: Bound<&Vec<u8>>) -> Bound<Vec<u8>> {
    match bound {
        Bound::Included(v) => Bound::Included(v.clone()),
        Bound::Excluded(v) => Bound::Excluded(v.clone()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// Collects the version numbers of every currently-active transaction.
fn scan_active_set<E: Engine>(session: &mut E) -> CResult<HashSet<Version>> {
    session
        .scan_prefix(&KeyPrefix::TxnActive.encode()?)
        .map(|item| {
            let (raw_key, _) = item?;
            match Key::decode(&raw_key)? {
                Key::TxnActive(version) => Ok(version),
                other => Err(Error::Corruption(format!("expected TxnActive key, got {other:?}"))),
            }
        })
        .collect()
}
