//! The transaction coordinator: the `Database` handle opens storage once and
//! hands out `Transaction`s that tie the mvcc session, the lock manager, the
//! catalog snapshot, and the table/index layers together -- every row or
//! index operation a caller performs goes through a `Transaction`, never
//! through the lower layers directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::catalog::{CatalogState, IndexSchema, NewIndex, NewTable, TableSchema};
use crate::error::{CResult, Error};
use crate::index::Index;
use crate::lock::{CancelToken, LockHolder, LockId, LockManager, Mode};
use crate::mvcc::transaction::{Transaction as MvccTransaction, TransactionDef};
use crate::mvcc::{MVCCDef, Status, MVCC};
use crate::storage::engine::Engine;
use crate::table::Table;
use crate::value::Value;

/// An embeddable database: one storage engine, one lock manager, and the
/// catalog snapshot pointer every transaction clones from at `begin` and
/// (if it wrote to the catalog) publishes back to at `commit`.
pub struct Database<E: Engine> {
    mvcc: MVCC<E>,
    locks: Arc<LockManager>,
    catalog: Arc<Mutex<Arc<CatalogState>>>,
    next_holder: AtomicU64,
}

impl<E: Engine> Database<E> {
    /// Opens a database over `engine`, bootstrapping the catalog snapshot
    /// from whatever catalog rows are already persisted.
    pub fn new(engine: E) -> CResult<Self> {
        let mvcc = MVCC::new(engine);
        let bootstrap = mvcc.begin_read_only()?;
        let catalog = CatalogState::bootstrap(&bootstrap)?;
        bootstrap.rollback()?;
        Ok(Self {
            mvcc,
            locks: Arc::new(LockManager::new()),
            catalog: Arc::new(Mutex::new(catalog)),
            next_holder: AtomicU64::new(1),
        })
    }

    fn allocate_holder(&self) -> LockHolder {
        self.next_holder.fetch_add(1, Ordering::SeqCst)
    }

    /// Begins a read-write transaction.
    pub fn begin(&self) -> CResult<Transaction<E>> {
        self.begin_as(false, None)
    }

    /// Begins a read-only transaction against the current snapshot.
    pub fn begin_read_only(&self) -> CResult<Transaction<E>> {
        self.begin_as(true, None)
    }

    /// Begins a transaction cancellably: a blocked wait for the database
    /// lock can be abandoned via `cancel`, returning `Error::LockTimeout`.
    pub fn begin_cancellable(&self, writable: bool, cancel: &CancelToken) -> CResult<Transaction<E>> {
        self.begin_as(!writable, Some(cancel))
    }

    fn begin_as(&self, read_only: bool, cancel: Option<&CancelToken>) -> CResult<Transaction<E>> {
        let holder = self.allocate_holder();
        let mode = if read_only { Mode::IS } else { Mode::IX };
        self.locks.acquire(holder, LockId::Database, mode, cancel)?;

        let mvcc_txn = if read_only { self.mvcc.begin_read_only()? } else { self.mvcc.begin()? };
        let catalog = (**self.catalog.lock().expect("catalog lock poisoned")).clone();

        Ok(Transaction {
            mvcc_txn: Some(mvcc_txn),
            locks: self.locks.clone(),
            shared_catalog: self.catalog.clone(),
            holder,
            catalog,
            held: vec![LockId::Database],
            read_only,
        })
    }

    /// The storage engine's status, surfaced at the database level for
    /// diagnostics/introspection.
    pub fn status(&self) -> CResult<Status> {
        self.mvcc.status()
    }
}

/// A transaction handle: an mvcc session, a lock holder identity, and a
/// private catalog snapshot clone that DDL on this transaction mutates in
/// isolation until `commit` publishes it.
///
/// Single-threaded-use -- like the mvcc `Transaction` it wraps, a handle is
/// meant to be driven by one caller from `begin` to `commit`/`rollback`, not
/// shared across threads.
pub struct Transaction<E: Engine> {
    mvcc_txn: Option<MvccTransaction<E>>,
    locks: Arc<LockManager>,
    shared_catalog: Arc<Mutex<Arc<CatalogState>>>,
    holder: LockHolder,
    catalog: CatalogState,
    /// Every `LockId` acquired over this transaction's life, in acquisition
    /// order (including the initial `Database` lock from `begin`), so
    /// `commit`/`rollback` can release them all in reverse-acquisition
    /// order.
    held: Vec<LockId>,
    read_only: bool,
}

impl<E: Engine> Transaction<E> {
    fn mvcc(&self) -> CResult<&MvccTransaction<E>> {
        self.mvcc_txn.as_ref().ok_or(Error::TransactionClosed)
    }

    fn release_held(&mut self) {
        for obj in self.held.drain(..).rev() {
            // `release` is a no-op success on an object this holder never
            // acquired, so this sweep is safe even if an earlier operation
            // in this transaction failed partway through acquiring.
            let _ = self.locks.release(self.holder, &obj);
        }
    }

    /// Commits the transaction: the mvcc session commits first, then the
    /// catalog clone (if DDL touched it) is published back to the database,
    /// then every held lock is released in reverse-acquisition order.
    pub fn commit(mut self) -> CResult<()> {
        let mvcc_txn = self.mvcc_txn.take().ok_or(Error::TransactionClosed)?;
        let version = mvcc_txn.version();
        mvcc_txn.commit()?;
        *self.shared_catalog.lock().expect("catalog lock poisoned") = Arc::new(self.catalog.clone());
        self.release_held();
        log::debug!("transaction at version {version} committed");
        Ok(())
    }

    /// Rolls back the transaction: the mvcc session's writes (including any
    /// catalog rows it touched) are discarded, the private catalog clone is
    /// simply dropped without being published, and every held lock is
    /// released in reverse-acquisition order.
    pub fn rollback(mut self) -> CResult<()> {
        let mvcc_txn = self.mvcc_txn.take().ok_or(Error::TransactionClosed)?;
        let version = mvcc_txn.version();
        mvcc_txn.rollback()?;
        self.release_held();
        log::debug!("transaction at version {version} rolled back");
        Ok(())
    }

    /// Upgrades a read-only transaction to read-write by rolling it back
    /// and beginning a fresh writable one at a new version. Promoting an
    /// already-writable transaction is rejected -- there's no reason to,
    /// and silently no-opping would hide a caller bug.
    pub fn promote(self, db: &Database<E>) -> CResult<Transaction<E>> {
        if !self.read_only {
            return Err(Error::Internal("cannot promote a writable transaction".into()));
        }
        self.rollback()?;
        db.begin()
    }

    pub fn version(&self) -> CResult<u64> {
        Ok(self.mvcc()?.version())
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn check_writable(&self) -> CResult<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    /// Opens a handle onto `name` for row CRUD/iteration.
    pub fn table(&mut self, name: &str) -> CResult<Table<'_, E>> {
        let mvcc_txn = self.mvcc_txn.as_ref().ok_or(Error::TransactionClosed)?;
        Table::new(name, &mut self.catalog, mvcc_txn, &self.locks, self.holder, &mut self.held)
    }

    /// Opens a handle onto `name`'s entries.
    pub fn index(&self, name: &str) -> CResult<Index<'_, E>> {
        let mvcc_txn = self.mvcc()?;
        let schema = self.catalog.get_index(name)?;
        Ok(Index::new(schema, mvcc_txn))
    }

    pub fn get_table(&self, name: &str) -> CResult<&TableSchema> {
        self.catalog.get_table(name)
    }

    pub fn list_tables(&self, prefix: Option<&str>) -> Vec<&TableSchema> {
        self.catalog.list_tables(prefix)
    }

    pub fn get_index(&self, name: &str) -> CResult<&IndexSchema> {
        self.catalog.get_index(name)
    }

    pub fn list_indexes(&self, prefix: Option<&str>) -> Vec<&IndexSchema> {
        self.catalog.list_indexes(prefix)
    }

    /// Creates a table. DDL statements re-touch the `IX` hold on `Database`
    /// from `begin` rather than locking any single table/row, since it's
    /// the catalog itself that's being mutated.
    pub fn create_table(&mut self, def: NewTable) -> CResult<TableSchema> {
        self.check_writable()?;
        self.locks.acquire(self.holder, LockId::Database, Mode::IX, None)?;
        self.held.push(LockId::Database);
        let mvcc_txn = self.mvcc_txn.as_ref().ok_or(Error::TransactionClosed)?;
        self.catalog.create_table(mvcc_txn, def)
    }

    pub fn drop_table(&mut self, name: &str) -> CResult<TableSchema> {
        self.check_writable()?;
        self.locks.acquire(self.holder, LockId::Database, Mode::IX, None)?;
        self.held.push(LockId::Database);
        let mvcc_txn = self.mvcc_txn.as_ref().ok_or(Error::TransactionClosed)?;
        self.catalog.drop_table(mvcc_txn, name)
    }

    pub fn create_index(&mut self, def: NewIndex) -> CResult<IndexSchema> {
        self.check_writable()?;
        self.locks.acquire(self.holder, LockId::Database, Mode::IX, None)?;
        self.held.push(LockId::Database);
        let mvcc_txn = self.mvcc_txn.as_ref().ok_or(Error::TransactionClosed)?;
        let schema = self.catalog.create_index(mvcc_txn, def)?;

        // A newly created index starts empty; back-fill it from every row
        // already in the table so it reflects existing data immediately,
        // rather than only rows inserted from this point on.
        let mut rows = Vec::new();
        self.table(&schema.table)?.iterate(.., false, |row_key, row| {
            rows.push((row_key.to_vec(), row.clone()));
            Ok(true)
        })?;
        let mvcc_txn = self.mvcc_txn.as_ref().ok_or(Error::TransactionClosed)?;
        let index = Index::new(&schema, mvcc_txn);
        let table_schema = self.catalog.get_table(&schema.table)?.clone();
        let column = schema
            .columns
            .first()
            .ok_or_else(|| Error::Corruption(format!("index {} has no columns", schema.name)))?;
        let column_idx = table_schema
            .column_index(column)
            .ok_or_else(|| Error::Corruption(format!("index column {column} missing from {}", schema.table)))?;
        for (row_key, row) in rows {
            index.set(&row.values()[column_idx], &row_key)?;
        }
        Ok(schema)
    }

    pub fn drop_index(&mut self, name: &str) -> CResult<IndexSchema> {
        self.check_writable()?;
        self.locks.acquire(self.holder, LockId::Database, Mode::IX, None)?;
        self.held.push(LockId::Database);
        let mvcc_txn = self.mvcc_txn.as_ref().ok_or(Error::TransactionClosed)?;
        self.catalog.drop_index(mvcc_txn, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnDef;
    use crate::storage::memory::Memory;
    use crate::value::DataType;

    fn schema() -> NewTable {
        NewTable {
            name: "t".into(),
            columns: vec![
                ColumnDef::new("a", DataType::Integer, false),
                ColumnDef::new("b", DataType::Text, true),
            ],
            primary_key: vec!["a".into()],
        }
    }

    #[test]
    fn commit_publishes_ddl_and_rows_to_later_transactions() {
        let db = Database::new(Memory::new()).unwrap();
        let mut txn = db.begin().unwrap();
        txn.create_table(schema()).unwrap();
        let key = txn.table("t").unwrap().insert(vec![Value::Integer(1), Value::Text("x".into())]).unwrap();
        txn.commit().unwrap();

        let mut txn2 = db.begin().unwrap();
        let row = txn2.table("t").unwrap().get(&key).unwrap();
        assert_eq!(row.values(), &[Value::Integer(1), Value::Text("x".into())]);
    }

    #[test]
    fn rollback_discards_ddl_and_writes() {
        let db = Database::new(Memory::new()).unwrap();
        let mut txn = db.begin().unwrap();
        txn.create_table(schema()).unwrap();
        txn.table("t").unwrap().insert(vec![Value::Integer(1), Value::Null]).unwrap();
        txn.rollback().unwrap();

        let txn2 = db.begin().unwrap();
        assert!(matches!(txn2.get_table("t"), Err(Error::NotFound(_))));
    }

    #[test]
    fn read_only_transaction_rejects_writes() {
        let db = Database::new(Memory::new()).unwrap();
        let mut txn = db.begin().unwrap();
        txn.create_table(schema()).unwrap();
        txn.commit().unwrap();

        let mut read_txn = db.begin_read_only().unwrap();
        let err = read_txn.create_table(schema()).unwrap_err();
        assert!(matches!(err, Error::ReadOnly));
    }

    #[test]
    fn promote_upgrades_a_read_only_transaction() {
        let db = Database::new(Memory::new()).unwrap();
        let mut setup = db.begin().unwrap();
        setup.create_table(schema()).unwrap();
        setup.commit().unwrap();

        let read_txn = db.begin_read_only().unwrap();
        let mut writable = read_txn.promote(&db).unwrap();
        assert!(!writable.is_read_only());
        writable.table("t").unwrap().insert(vec![Value::Integer(1), Value::Null]).unwrap();
        writable.commit().unwrap();
    }

    #[test]
    fn create_index_backfills_existing_rows() {
        let db = Database::new(Memory::new()).unwrap();
        let mut txn = db.begin().unwrap();
        txn.create_table(schema()).unwrap();
        txn.table("t").unwrap().insert(vec![Value::Integer(1), Value::Text("x".into())]).unwrap();
        txn.table("t").unwrap().insert(vec![Value::Integer(2), Value::Text("y".into())]).unwrap();

        txn.create_index(NewIndex {
            name: "t_b".into(),
            table: "t".into(),
            columns: vec!["b".into()],
            unique: false,
            numeric: false,
        })
        .unwrap();

        let mut seen = Vec::new();
        txn.index("t_b").unwrap().ascend(None, |(v, _, _)| {
            seen.push(v);
            Ok(true)
        }).unwrap();
        assert_eq!(seen, vec![Value::Text("x".into()), Value::Text("y".into())]);
    }
}
