//! Persistent metadata: tables, columns, indexes, sequences (spec.md §4.4,
//! component C4). The catalog lives in its own namespace of the shared
//! keyspace, `0x01 <kind-byte> <name-bytes>` exactly as spec.md §6
//! describes, and is loaded in full into an in-memory snapshot on database
//! open (spec.md §4.4: "The catalog is loaded on database open into an
//! in-memory snapshot; writes update both the snapshot and the persistent
//! store. Readers see a consistent snapshot for the lifetime of their
//! transaction.").
//!
//! Persisted through the ordinary versioned mvcc path (`Transaction::set`/
//! `get`/`delete`), not `mvcc::Key::Unversioned` -- an `Unversioned` write
//! would be globally visible the instant it lands, bypassing the
//! transaction's own rollback bookkeeping, which would violate spec.md
//! §4.7's "Rollback MUST restore the catalog snapshot". Routing catalog
//! rows through the same `TxnWrite`-tracked path as table/index data means
//! a rolled-back `CREATE TABLE` vanishes for free.

use std::collections::HashMap;
use std::sync::Arc;

use serde_derive::{Deserialize, Serialize};

use crate::encoding::keycode;
use crate::error::{CResult, Error};
use crate::mvcc::transaction::TransactionDef;
use crate::mvcc::Transaction;
use crate::storage::engine::Engine;
use crate::value::{DataType, Value};

const NS_CATALOG: u8 = 0x01;
/// Namespace byte for all table/index row data (spec.md §6's
/// `0x02..0x7F user table and index data` range, collapsed to a single
/// prefix byte since per-object separation is already carried by the
/// 8-byte object id that follows it).
pub const NS_DATA: u8 = 0x02;

const KIND_TABLE: u8 = 1;
const KIND_INDEX: u8 = 2;
const KIND_META: u8 = 0xFF;

fn catalog_key(kind: u8, name: &str) -> Vec<u8> {
    let mut key = vec![NS_CATALOG, kind];
    key.extend_from_slice(name.as_bytes());
    key
}

fn catalog_prefix() -> Vec<u8> {
    vec![NS_CATALOG]
}

fn meta_key() -> Vec<u8> {
    vec![NS_CATALOG, KIND_META]
}

/// The byte prefix every key belonging to `object_id`'s namespace shares
/// (spec.md §6: "keys inside are `<id big-endian 8 bytes> <object-local-key>`").
pub fn object_prefix(object_id: u64) -> Vec<u8> {
    let mut prefix = vec![NS_DATA];
    prefix.extend_from_slice(&object_id.to_be_bytes());
    prefix
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub datatype: DataType,
    pub nullable: bool,
    /// The column's default value, tagged-encoded via `encoding::keycode`
    /// rather than carried as a plain `Value`, since `Value` itself has no
    /// `Serialize` impl (spec.md §3: "Values: immutable once constructed",
    /// not metadata needing a wire format of their own).
    default_encoded: Option<Vec<u8>>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, datatype: DataType, nullable: bool) -> Self {
        Self { name: name.into(), datatype, nullable, default_encoded: None }
    }

    pub fn with_default(mut self, default: &Value) -> Self {
        self.default_encoded = Some(keycode::encode_value(default));
        self
    }

    pub fn default_value(&self) -> CResult<Option<Value>> {
        match &self.default_encoded {
            Some(bytes) => Ok(Some(keycode::decode_value(bytes)?.0)),
            None => Ok(None),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Names of the declared primary-key columns, in key order. Empty
    /// means the table has no declared primary key and row identity comes
    /// from `sequence` instead (spec.md §4.5).
    pub primary_key: Vec<String>,
    pub sequence: u64,
    pub object_id: u64,
}

impl TableSchema {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn primary_key_indices(&self) -> CResult<Vec<usize>> {
        self.primary_key
            .iter()
            .map(|name| {
                self.column_index(name)
                    .ok_or_else(|| Error::Corruption(format!("primary key column {name} missing from schema")))
            })
            .collect()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
    /// Whether this index coerces integer columns to `Double` for ordering
    /// and equality (spec.md §4.1 "mixed integer/double comparability").
    pub numeric: bool,
    pub object_id: u64,
}

pub struct NewTable {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
}

pub struct NewIndex {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub numeric: bool,
}

/// The in-memory catalog snapshot (spec.md §5: "The catalog snapshot is
/// copy-on-write: writers clone the affected portion, readers dereference a
/// stable pointer for the life of the transaction."). A transaction clones
/// the `Arc<CatalogState>` it's handed at `begin`, mutates its own private
/// clone across any DDL it performs, and only that mutated state is
/// published back (replacing the `Arc`) at commit.
#[derive(Clone, Debug, Default)]
pub struct CatalogState {
    pub tables: HashMap<String, TableSchema>,
    pub indexes: HashMap<String, IndexSchema>,
    next_object_id: u64,
}

impl CatalogState {
    pub fn empty() -> Self {
        Self { tables: HashMap::new(), indexes: HashMap::new(), next_object_id: 1 }
    }

    /// Loads every catalog row into a fresh snapshot, for use at database
    /// open (spec.md §4.4).
    pub fn bootstrap<E: Engine>(txn: &Transaction<E>) -> CResult<Arc<Self>> {
        let mut state = Self::empty();
        for item in txn.scan_prefix(&catalog_prefix())? {
            let (key, value) = item;
            match key.get(1) {
                Some(&KIND_TABLE) => {
                    let schema: TableSchema = bincode::deserialize(&value)?;
                    state.tables.insert(schema.name.clone(), schema);
                }
                Some(&KIND_INDEX) => {
                    let schema: IndexSchema = bincode::deserialize(&value)?;
                    state.indexes.insert(schema.name.clone(), schema);
                }
                Some(&KIND_META) => {
                    state.next_object_id = bincode::deserialize(&value)?;
                }
                _ => return Err(Error::Corruption("unrecognised catalog row kind".into())),
            }
        }
        Ok(Arc::new(state))
    }

    pub fn get_table(&self, name: &str) -> CResult<&TableSchema> {
        self.tables.get(name).ok_or_else(|| Error::NotFound(format!("table {name}")))
    }

    pub fn list_tables(&self, prefix: Option<&str>) -> Vec<&TableSchema> {
        let mut tables: Vec<&TableSchema> = self
            .tables
            .values()
            .filter(|t| prefix.map_or(true, |p| t.name.starts_with(p)))
            .collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        tables
    }

    pub fn get_index(&self, name: &str) -> CResult<&IndexSchema> {
        self.indexes.get(name).ok_or_else(|| Error::NotFound(format!("index {name}")))
    }

    pub fn list_indexes(&self, prefix: Option<&str>) -> Vec<&IndexSchema> {
        let mut indexes: Vec<&IndexSchema> = self
            .indexes
            .values()
            .filter(|i| prefix.map_or(true, |p| i.name.starts_with(p)))
            .collect();
        indexes.sort_by(|a, b| a.name.cmp(&b.name));
        indexes
    }

    pub fn indexes_on_table<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a IndexSchema> {
        self.indexes.values().filter(move |i| i.table == table)
    }

    fn allocate_object_id<E: Engine>(&mut self, txn: &Transaction<E>) -> CResult<u64> {
        let id = self.next_object_id;
        self.next_object_id += 1;
        txn.set(&meta_key(), bincode::serialize(&self.next_object_id)?)?;
        Ok(id)
    }

    pub fn create_table<E: Engine>(&mut self, txn: &Transaction<E>, def: NewTable) -> CResult<TableSchema> {
        if self.tables.contains_key(&def.name) {
            return Err(Error::AlreadyExists(format!("table {}", def.name)));
        }
        for name in &def.primary_key {
            if !def.columns.iter().any(|c| c.name == *name) {
                return Err(Error::Corruption(format!("primary key column {name} not declared")));
            }
        }
        let object_id = self.allocate_object_id(txn)?;
        let schema = TableSchema {
            name: def.name,
            columns: def.columns,
            primary_key: def.primary_key,
            sequence: 0,
            object_id,
        };
        txn.set(&catalog_key(KIND_TABLE, &schema.name), bincode::serialize(&schema)?)?;
        self.tables.insert(schema.name.clone(), schema.clone());
        Ok(schema)
    }

    pub fn drop_table<E: Engine>(&mut self, txn: &Transaction<E>, name: &str) -> CResult<TableSchema> {
        let schema = self.tables.remove(name).ok_or_else(|| Error::NotFound(format!("table {name}")))?;
        // Dropping a table and all its indexes is atomic with the namespace
        // drop (spec.md §3 invariant 7: "dropping is equally atomic").
        let owned: Vec<String> =
            self.indexes.values().filter(|i| i.table == name).map(|i| i.name.clone()).collect();
        for index_name in owned {
            self.drop_index(txn, &index_name)?;
        }
        txn.delete(&catalog_key(KIND_TABLE, name))?;
        Ok(schema)
    }

    pub fn create_index<E: Engine>(&mut self, txn: &Transaction<E>, def: NewIndex) -> CResult<IndexSchema> {
        if self.indexes.contains_key(&def.name) {
            return Err(Error::AlreadyExists(format!("index {}", def.name)));
        }
        if def.columns.len() != 1 {
            // Every index operation in spec.md §4.6 (`set`, `ascend`,
            // `descend`...) is phrased in terms of a single "indexed
            // value"; a composite entry-key scheme is never described, so
            // multi-column indexes are rejected here rather than silently
            // indexing only the first column.
            return Err(Error::Corruption("indexes must name exactly one column".into()));
        }
        let table = self.get_table(&def.table)?;
        for name in &def.columns {
            if table.column_index(name).is_none() {
                return Err(Error::Corruption(format!("index column {name} not declared on {}", def.table)));
            }
        }
        let object_id = self.allocate_object_id(txn)?;
        let schema = IndexSchema {
            name: def.name,
            table: def.table,
            columns: def.columns,
            unique: def.unique,
            numeric: def.numeric,
            object_id,
        };
        txn.set(&catalog_key(KIND_INDEX, &schema.name), bincode::serialize(&schema)?)?;
        self.indexes.insert(schema.name.clone(), schema.clone());
        Ok(schema)
    }

    pub fn drop_index<E: Engine>(&mut self, txn: &Transaction<E>, name: &str) -> CResult<IndexSchema> {
        let schema = self.indexes.remove(name).ok_or_else(|| Error::NotFound(format!("index {name}")))?;
        txn.delete(&catalog_key(KIND_INDEX, name))?;
        Ok(schema)
    }

    /// Allocates the next row-id for a table with no declared primary key,
    /// persisting the advanced sequence so it "never decreases across
    /// commits, including across restarts" (spec.md §3 invariant 6).
    pub fn advance_sequence<E: Engine>(&mut self, txn: &Transaction<E>, table: &str) -> CResult<u64> {
        let schema = self.tables.get_mut(table).ok_or_else(|| Error::NotFound(format!("table {table}")))?;
        let allocated = schema.sequence;
        schema.sequence += 1;
        let updated = schema.clone();
        txn.set(&catalog_key(KIND_TABLE, table), bincode::serialize(&updated)?)?;
        Ok(allocated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvcc::{MVCCDef, MVCC};
    use crate::storage::memory::Memory;

    fn new_mvcc() -> MVCC<Memory> {
        MVCC::new(Memory::new())
    }

    #[test]
    fn create_and_bootstrap_round_trips() {
        let mvcc = new_mvcc();
        let txn = mvcc.begin().unwrap();
        let mut state = CatalogState::empty();
        state
            .create_table(
                &txn,
                NewTable {
                    name: "t".into(),
                    columns: vec![ColumnDef::new("a", DataType::Integer, false)],
                    primary_key: vec!["a".into()],
                },
            )
            .unwrap();
        txn.commit().unwrap();

        let txn2 = mvcc.begin().unwrap();
        let loaded = CatalogState::bootstrap(&txn2).unwrap();
        assert!(loaded.get_table("t").is_ok());
    }

    #[test]
    fn duplicate_table_is_already_exists() {
        let mvcc = new_mvcc();
        let txn = mvcc.begin().unwrap();
        let mut state = CatalogState::empty();
        let def = || NewTable { name: "t".into(), columns: vec![], primary_key: vec![] };
        state.create_table(&txn, def()).unwrap();
        let err = state.create_table(&txn, def()).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn dropping_a_table_cascades_to_its_indexes() {
        let mvcc = new_mvcc();
        let txn = mvcc.begin().unwrap();
        let mut state = CatalogState::empty();
        state
            .create_table(
                &txn,
                NewTable {
                    name: "t".into(),
                    columns: vec![ColumnDef::new("a", DataType::Integer, false)],
                    primary_key: vec!["a".into()],
                },
            )
            .unwrap();
        state
            .create_index(
                &txn,
                NewIndex { name: "t_a_idx".into(), table: "t".into(), columns: vec!["a".into()], unique: false, numeric: true },
            )
            .unwrap();

        state.drop_table(&txn, "t").unwrap();
        assert!(state.get_index("t_a_idx").is_err());
    }

    #[test]
    fn sequence_advances_monotonically() {
        let mvcc = new_mvcc();
        let txn = mvcc.begin().unwrap();
        let mut state = CatalogState::empty();
        state.create_table(&txn, NewTable { name: "t".into(), columns: vec![], primary_key: vec![] }).unwrap();
        assert_eq!(state.advance_sequence(&txn, "t").unwrap(), 0);
        assert_eq!(state.advance_sequence(&txn, "t").unwrap(), 1);
    }
}
