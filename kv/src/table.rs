//! Row identity, row codec, row CRUD, iteration, and per-table sequences
//! (spec.md §4.5, component C5). A `Table` is a transient handle tying
//! together the catalog (for schema and index resolution), the lock
//! manager (for the acquisition discipline this section specifies), and
//! the underlying mvcc transaction (for the actual reads/writes) -- it
//! borrows all three from the enclosing `txn::Transaction` and does not
//! outlive the call that created it.

use std::ops::{Bound, RangeBounds};

use crate::catalog::{object_prefix, CatalogState, IndexSchema, TableSchema};
use crate::encoding::keycode;
use crate::error::{CResult, Error};
use crate::index::Index;
use crate::lock::{LockHolder, LockId, LockManager, Mode};
use crate::mvcc::transaction::TransactionDef;
use crate::mvcc::Transaction;
use crate::row::Row;
use crate::storage::engine::Engine;
use crate::value::Value;

pub struct Table<'a, E: Engine> {
    name: String,
    catalog: &'a mut CatalogState,
    txn: &'a Transaction<E>,
    locks: &'a LockManager,
    holder: LockHolder,
    /// Every `LockId` acquired through this handle, in acquisition order,
    /// so the enclosing `txn::Transaction` can release them in reverse on
    /// commit/rollback (spec.md §4.7).
    held: &'a mut Vec<LockId>,
}

impl<'a, E: Engine> Table<'a, E> {
    pub fn new(
        name: &str,
        catalog: &'a mut CatalogState,
        txn: &'a Transaction<E>,
        locks: &'a LockManager,
        holder: LockHolder,
        held: &'a mut Vec<LockId>,
    ) -> CResult<Self> {
        catalog.get_table(name)?;
        Ok(Self { name: name.to_string(), catalog, txn, locks, holder, held })
    }

    fn acquire(&mut self, obj: LockId, mode: Mode) -> CResult<()> {
        self.locks.acquire(self.holder, obj.clone(), mode, None)?;
        self.held.push(obj);
        Ok(())
    }

    fn schema(&self) -> CResult<TableSchema> {
        self.catalog.get_table(&self.name).cloned()
    }

    fn indexes(&self) -> Vec<IndexSchema> {
        self.catalog.indexes_on_table(&self.name).cloned().collect()
    }

    fn data_key(&self, schema: &TableSchema, row_key: &[u8]) -> Vec<u8> {
        let mut key = object_prefix(schema.object_id);
        key.extend_from_slice(row_key);
        key
    }

    fn validate(&self, schema: &TableSchema, values: &[Value]) -> CResult<()> {
        if values.len() != schema.columns.len() {
            return Err(Error::TypeMismatch(format!(
                "table {} has {} columns, got {}",
                self.name,
                schema.columns.len(),
                values.len()
            )));
        }
        for (col, value) in schema.columns.iter().zip(values.iter()) {
            if value.is_null() {
                if !col.nullable {
                    return Err(Error::Constraint(format!("column {} is not nullable", col.name)));
                }
                continue;
            }
            if value.datatype() != Some(col.datatype) {
                return Err(Error::TypeMismatch(format!(
                    "column {} expects {}, got {:?}",
                    col.name,
                    col.datatype,
                    value.datatype()
                )));
            }
        }
        Ok(())
    }

    fn index_value(schema: &TableSchema, values: &[Value], idx: &IndexSchema) -> CResult<Value> {
        let column = idx
            .columns
            .first()
            .ok_or_else(|| Error::Corruption(format!("index {} has no columns", idx.name)))?;
        let i = schema
            .column_index(column)
            .ok_or_else(|| Error::Corruption(format!("index column {column} missing from {}", schema.name)))?;
        Ok(values[i].clone())
    }

    /// The declared primary key's composite key-codec encoding, or `None`
    /// when the table has no declared primary key (spec.md §4.5 "Row
    /// identity").
    fn declared_row_key(schema: &TableSchema, values: &[Value]) -> CResult<Option<Vec<u8>>> {
        if schema.primary_key.is_empty() {
            return Ok(None);
        }
        let indices = schema.primary_key_indices()?;
        let pk_values: Vec<Value> = indices.iter().map(|&i| values[i].clone()).collect();
        Ok(Some(keycode::encode_keys(&pk_values)))
    }

    /// Computes the row key for a new row: the declared primary key, or
    /// the next value off the table's sequence when there's none.
    fn row_key(&mut self, schema: &TableSchema, values: &[Value]) -> CResult<Vec<u8>> {
        match Self::declared_row_key(schema, values)? {
            Some(key) => Ok(key),
            None => {
                let next = self.catalog.advance_sequence(self.txn, &self.name)?;
                Ok(next.to_be_bytes().to_vec())
            }
        }
    }

    /// Inserts a new row, returning its row key (spec.md §4.5 `insert`).
    pub fn insert(&mut self, values: Vec<Value>) -> CResult<Vec<u8>> {
        let schema = self.schema()?;
        self.validate(&schema, &values)?;

        self.acquire(LockId::Table(self.name.clone()), Mode::IX)?;
        let row_key = self.row_key(&schema, &values)?;
        self.acquire(LockId::Document(self.name.clone(), row_key.clone()), Mode::X)?;

        let data_key = self.data_key(&schema, &row_key);
        if self.txn.get(&data_key)?.is_some() {
            return Err(Error::Constraint(format!("primary key violation in table {}", self.name)));
        }

        let row = Row::new(values);
        self.txn.set(&data_key, row.encode())?;

        for idx_schema in self.indexes() {
            let value = Self::index_value(&schema, row.values(), &idx_schema)?;
            Index::new(&idx_schema, self.txn).set(&value, &row_key)?;
        }
        Ok(row_key)
    }

    /// Fetches one row by key (spec.md §4.5 `get`).
    pub fn get(&mut self, row_key: &[u8]) -> CResult<Row> {
        let schema = self.schema()?;
        self.acquire(LockId::Table(self.name.clone()), Mode::IS)?;
        self.acquire(LockId::Document(self.name.clone(), row_key.to_vec()), Mode::S)?;

        let data_key = self.data_key(&schema, row_key);
        match self.txn.get(&data_key)? {
            Some(bytes) => Row::decode(&bytes, schema.columns.len()),
            None => Err(Error::NotFound(format!("row in table {}", self.name))),
        }
    }

    /// Deletes a row and every index entry pointing at it (spec.md §4.5
    /// `delete`).
    pub fn delete(&mut self, row_key: &[u8]) -> CResult<()> {
        let schema = self.schema()?;
        self.acquire(LockId::Table(self.name.clone()), Mode::IX)?;
        self.acquire(LockId::Document(self.name.clone(), row_key.to_vec()), Mode::X)?;

        let data_key = self.data_key(&schema, row_key);
        let existing = match self.txn.get(&data_key)? {
            Some(bytes) => Row::decode(&bytes, schema.columns.len())?,
            None => return Err(Error::NotFound(format!("row in table {}", self.name))),
        };

        for idx_schema in self.indexes() {
            let value = Self::index_value(&schema, existing.values(), &idx_schema)?;
            Index::new(&idx_schema, self.txn).delete(&value, row_key)?;
        }
        self.txn.delete(&data_key)
    }

    /// Replaces a row's values, updating only the index entries whose
    /// column changed (spec.md §4.5 `replace`).
    pub fn replace(&mut self, row_key: &[u8], values: Vec<Value>) -> CResult<()> {
        let schema = self.schema()?;
        self.validate(&schema, &values)?;
        // A declared primary key is the row's identity; replace() can't
        // move a row to a different key, only change its other columns.
        if let Some(declared) = Self::declared_row_key(&schema, &values)? {
            if declared != row_key {
                return Err(Error::Constraint("replace cannot change a row's primary key".into()));
            }
        }

        self.acquire(LockId::Table(self.name.clone()), Mode::IX)?;
        self.acquire(LockId::Document(self.name.clone(), row_key.to_vec()), Mode::X)?;

        let data_key = self.data_key(&schema, row_key);
        let existing = match self.txn.get(&data_key)? {
            Some(bytes) => Row::decode(&bytes, schema.columns.len())?,
            None => return Err(Error::NotFound(format!("row in table {}", self.name))),
        };

        for idx_schema in self.indexes() {
            let old_value = Self::index_value(&schema, existing.values(), &idx_schema)?;
            let new_value = Self::index_value(&schema, &values, &idx_schema)?;
            if old_value != new_value {
                let index = Index::new(&idx_schema, self.txn);
                index.delete(&old_value, row_key)?;
                index.set(&new_value, row_key)?;
            }
        }

        let row = Row::new(values);
        self.txn.set(&data_key, row.encode())
    }

    /// Visits every row in `range` (row-key order), in reverse if
    /// `reverse` (spec.md §4.5 `iterate`). The visitor returns `Ok(true)`
    /// to continue or `Ok(false)` to stop, surfaced to the caller as
    /// `Error::Interrupted`.
    pub fn iterate(
        &mut self,
        range: impl RangeBounds<Vec<u8>>,
        reverse: bool,
        mut visitor: impl FnMut(&[u8], &Row) -> CResult<bool>,
    ) -> CResult<()> {
        let schema = self.schema()?;
        self.acquire(LockId::Table(self.name.clone()), Mode::IS)?;

        let prefix = object_prefix(schema.object_id);
        let start = match range.start_bound() {
            Bound::Included(k) => Bound::Included(self.data_key(&schema, k)),
            Bound::Excluded(k) => Bound::Excluded(self.data_key(&schema, k)),
            Bound::Unbounded => Bound::Included(prefix.clone()),
        };
        let end = match range.end_bound() {
            Bound::Included(k) => Bound::Included(self.data_key(&schema, k)),
            Bound::Excluded(k) => Bound::Excluded(self.data_key(&schema, k)),
            Bound::Unbounded => match prefix.iter().rposition(|b| *b != 0xff) {
                Some(i) => Bound::Excluded(
                    prefix.iter().take(i).copied().chain(std::iter::once(prefix[i] + 1)).collect(),
                ),
                None => Bound::Unbounded,
            },
        };

        let mut rows = self.txn.scan((start, end))?;
        if reverse {
            rows.reverse();
        }
        for (key, bytes) in rows {
            let row_key = key[prefix.len()..].to_vec();
            self.acquire(LockId::Document(self.name.clone(), row_key.clone()), Mode::S)?;
            let row = Row::decode(&bytes, schema.columns.len())?;
            if !visitor(&row_key, &row)? {
                return Err(Error::Interrupted);
            }
        }
        Ok(())
    }

    /// Empties the table and every index maintained on it (spec.md §4.5
    /// `truncate`).
    pub fn truncate(&mut self) -> CResult<()> {
        let schema = self.schema()?;
        self.acquire(LockId::Table(self.name.clone()), Mode::X)?;

        let prefix = object_prefix(schema.object_id);
        for (key, _) in self.txn.scan_prefix(&prefix)? {
            self.txn.delete(&key)?;
        }
        for idx_schema in self.indexes() {
            Index::new(&idx_schema, self.txn).truncate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, NewIndex, NewTable};
    use crate::mvcc::{MVCCDef, MVCC};
    use crate::storage::memory::Memory;
    use crate::value::DataType;

    fn setup() -> (MVCC<Memory>, CatalogState, LockManager) {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let mut catalog = CatalogState::empty();
        catalog
            .create_table(
                &txn,
                NewTable {
                    name: "t".into(),
                    columns: vec![
                        ColumnDef::new("a", DataType::Integer, false),
                        ColumnDef::new("b", DataType::Text, true),
                    ],
                    primary_key: vec!["a".into()],
                },
            )
            .unwrap();
        txn.commit().unwrap();
        (mvcc, catalog, LockManager::new())
    }

    #[test]
    fn insert_get_delete_round_trip() {
        let (mvcc, mut catalog, locks) = setup();
        let txn = mvcc.begin().unwrap();
        let mut held = Vec::new();
        let mut table = Table::new("t", &mut catalog, &txn, &locks, 1, &mut held).unwrap();
        let key = table.insert(vec![Value::Integer(1), Value::Text("hi".into())]).unwrap();

        let row = table.get(&key).unwrap();
        assert_eq!(row.values(), &[Value::Integer(1), Value::Text("hi".into())]);

        table.delete(&key).unwrap();
        assert!(matches!(table.get(&key), Err(Error::NotFound(_))));
    }

    #[test]
    fn duplicate_primary_key_is_constraint_violation() {
        let (mvcc, mut catalog, locks) = setup();
        let txn = mvcc.begin().unwrap();
        let mut held = Vec::new();
        let mut table = Table::new("t", &mut catalog, &txn, &locks, 1, &mut held).unwrap();
        table.insert(vec![Value::Integer(1), Value::Null]).unwrap();
        let err = table.insert(vec![Value::Integer(1), Value::Null]).unwrap_err();
        assert!(matches!(err, Error::Constraint(_)));
    }

    #[test]
    fn iterate_yields_rows_in_primary_key_order() {
        let (mvcc, mut catalog, locks) = setup();
        let txn = mvcc.begin().unwrap();
        let mut held = Vec::new();
        let mut table = Table::new("t", &mut catalog, &txn, &locks, 1, &mut held).unwrap();
        table.insert(vec![Value::Integer(3), Value::Null]).unwrap();
        table.insert(vec![Value::Integer(1), Value::Null]).unwrap();
        table.insert(vec![Value::Integer(2), Value::Null]).unwrap();

        let mut seen = Vec::new();
        table
            .iterate(.., false, |_, row| {
                seen.push(row.values()[0].clone());
                Ok(true)
            })
            .unwrap();
        assert_eq!(seen, vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
    }

    #[test]
    fn iterate_interruption_surfaces_as_interrupted() {
        let (mvcc, mut catalog, locks) = setup();
        let txn = mvcc.begin().unwrap();
        let mut held = Vec::new();
        let mut table = Table::new("t", &mut catalog, &txn, &locks, 1, &mut held).unwrap();
        table.insert(vec![Value::Integer(1), Value::Null]).unwrap();
        table.insert(vec![Value::Integer(2), Value::Null]).unwrap();

        let err = table.iterate(.., false, |_, _| Ok(false)).unwrap_err();
        assert!(matches!(err, Error::Interrupted));
    }

    #[test]
    fn replace_rejects_changing_the_primary_key() {
        let (mvcc, mut catalog, locks) = setup();
        let txn = mvcc.begin().unwrap();
        let mut held = Vec::new();
        let mut table = Table::new("t", &mut catalog, &txn, &locks, 1, &mut held).unwrap();
        let key = table.insert(vec![Value::Integer(1), Value::Null]).unwrap();
        let err = table.replace(&key, vec![Value::Integer(2), Value::Null]).unwrap_err();
        assert!(matches!(err, Error::Constraint(_)));
    }

    #[test]
    fn replace_updates_index_only_when_value_changes() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let mut catalog = CatalogState::empty();
        catalog
            .create_table(
                &txn,
                NewTable {
                    name: "t".into(),
                    columns: vec![
                        ColumnDef::new("a", DataType::Integer, false),
                        ColumnDef::new("b", DataType::Text, true),
                    ],
                    primary_key: vec!["a".into()],
                },
            )
            .unwrap();
        catalog
            .create_index(
                &txn,
                NewIndex {
                    name: "t_b".into(),
                    table: "t".into(),
                    columns: vec!["b".into()],
                    unique: true,
                    numeric: false,
                },
            )
            .unwrap();
        txn.commit().unwrap();

        let locks = LockManager::new();
        let txn2 = mvcc.begin().unwrap();
        let mut held = Vec::new();
        let mut table = Table::new("t", &mut catalog, &txn2, &locks, 1, &mut held).unwrap();
        let key = table.insert(vec![Value::Integer(1), Value::Text("x".into())]).unwrap();

        // Unchanged indexed column: replace succeeds and the old index
        // entry is still the only one present.
        table.replace(&key, vec![Value::Integer(1), Value::Text("x".into())]).unwrap();

        // Changed indexed column: old entry removed, new entry inserted --
        // a second row could now reuse "x" without hitting a stale
        // uniqueness conflict.
        table.replace(&key, vec![Value::Integer(1), Value::Text("y".into())]).unwrap();
        let idx_schema = catalog.get_index("t_b").unwrap().clone();
        let index = Index::new(&idx_schema, &txn2);
        let mut seen = Vec::new();
        index
            .ascend(None, |(v, k, _)| {
                seen.push((v, k));
                Ok(true)
            })
            .unwrap();
        assert_eq!(seen, vec![(Value::Text("y".into()), key)]);
    }
}
