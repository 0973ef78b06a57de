//! Secondary indexes: ordered maps from an indexed `Value` to one or more
//! row keys (spec.md §4.6, component C6). Each index owns its own
//! namespace in the shared keyspace (`catalog::object_prefix`); this module
//! only encodes/decodes entries and walks them in order, leaving locking
//! and the decision of *which* indexes to touch to `table.rs`.

use crate::catalog::{object_prefix, IndexSchema};
use crate::encoding::keycode::{self, SEPARATOR};
use crate::error::{CResult, Error};
use crate::mvcc::transaction::TransactionDef;
use crate::mvcc::Transaction;
use crate::storage::engine::Engine;
use crate::value::Value;

/// A handle onto one index's entries for the duration of a transaction.
pub struct Index<'a, E: Engine> {
    schema: &'a IndexSchema,
    txn: &'a Transaction<E>,
}

/// `(indexed-value, row-key, is_equal_to_pivot)`, handed to an `ascend`/
/// `descend` visitor (spec.md §4.6).
pub type IndexEntry = (Value, Vec<u8>, bool);

impl<'a, E: Engine> Index<'a, E> {
    pub fn new(schema: &'a IndexSchema, txn: &'a Transaction<E>) -> Self {
        Self { schema, txn }
    }

    fn prefix(&self) -> Vec<u8> {
        object_prefix(self.schema.object_id)
    }

    /// Coerces the value the way this index's declared numeric discipline
    /// requires (spec.md §4.1/§4.6: integer columns normalised to `Double`
    /// so `10 == 10.0` for ordering and equality).
    fn normalize(&self, value: &Value) -> Value {
        if self.schema.numeric {
            value.to_numeric()
        } else {
            value.clone()
        }
    }

    fn encoded_value(&self, value: &Value) -> Vec<u8> {
        keycode::encode_value(&self.normalize(value))
    }

    fn entry_key(&self, value: &Value, row_key: &[u8]) -> Vec<u8> {
        let mut key = self.prefix();
        key.extend_from_slice(&self.encoded_value(value));
        if !self.schema.unique {
            key.push(SEPARATOR);
            key.extend_from_slice(row_key);
        }
        key
    }

    /// Writes an entry for `(value, row_key)` (spec.md §4.6 `set`). Fails
    /// with `Constraint` if `value` is already present in a unique index.
    pub fn set(&self, value: &Value, row_key: &[u8]) -> CResult<()> {
        let key = self.entry_key(value, row_key);
        if self.schema.unique {
            if self.txn.get(&key)?.is_some() {
                return Err(Error::Constraint(format!(
                    "duplicate value in unique index {}",
                    self.schema.name
                )));
            }
            self.txn.set(&key, row_key.to_vec())
        } else {
            self.txn.set(&key, Vec::new())
        }
    }

    /// Removes the entry for `(value, row_key)`. Missing entry is
    /// `NotFound` (spec.md §4.6 `delete`).
    pub fn delete(&self, value: &Value, row_key: &[u8]) -> CResult<()> {
        let key = self.entry_key(value, row_key);
        if self.txn.get(&key)?.is_none() {
            return Err(Error::NotFound(format!("index entry in {}", self.schema.name)));
        }
        self.txn.delete(&key)
    }

    /// Drops every entry in the index (spec.md §4.6 `truncate`).
    pub fn truncate(&self) -> CResult<()> {
        let prefix = self.prefix();
        for (key, _) in self.txn.scan_prefix(&prefix)? {
            self.txn.delete(&key)?;
        }
        Ok(())
    }

    fn decode_entry(&self, key: &[u8], value: Vec<u8>) -> CResult<(Value, usize, Vec<u8>)> {
        let prefix_len = self.prefix().len();
        let local = &key[prefix_len..];
        let (indexed_value, consumed) = keycode::decode_value(local)?;
        let row_key = if self.schema.unique {
            value
        } else {
            if local.get(consumed) != Some(&SEPARATOR) {
                return Err(Error::Corruption(format!(
                    "malformed list-index entry in {}",
                    self.schema.name
                )));
            }
            local[consumed + 1..].to_vec()
        };
        Ok((indexed_value, consumed, row_key))
    }

    fn entries(&self) -> CResult<Vec<(Vec<u8>, Value, Vec<u8>)>> {
        let prefix = self.prefix();
        self.txn
            .scan_prefix(&prefix)?
            .into_iter()
            .map(|(key, value)| {
                let (indexed_value, _, row_key) = self.decode_entry(&key, value)?;
                Ok((key[prefix.len()..].to_vec(), indexed_value, row_key))
            })
            .collect()
    }

    /// Visits entries with encoded-value ≥ pivot in increasing order
    /// (spec.md §4.6 `ascend`). `pivot = None` iterates the whole index.
    /// The visitor returns `Ok(true)` to continue, `Ok(false)` to stop
    /// cleanly, or an error to abort with `Interrupted`-style propagation.
    pub fn ascend(
        &self,
        pivot: Option<&Value>,
        mut visitor: impl FnMut(IndexEntry) -> CResult<bool>,
    ) -> CResult<()> {
        let seek = pivot.map(|v| self.encoded_value(v));
        for (local_key, value, row_key) in self.entries()? {
            if let Some(seek) = &seek {
                if local_key < *seek {
                    continue;
                }
            }
            let is_pivot = seek.as_ref().is_some_and(|seek| local_key.starts_with(seek.as_slice()));
            if !visitor((value, row_key, is_pivot))? {
                break;
            }
        }
        Ok(())
    }

    /// Visits entries ≤ pivot in decreasing order (spec.md §4.6 `descend`).
    /// A non-empty pivot gets a high-sentinel appended to its seek target
    /// (`separator, 0xFF`) so the pivot's own entries aren't skipped.
    pub fn descend(
        &self,
        pivot: Option<&Value>,
        mut visitor: impl FnMut(IndexEntry) -> CResult<bool>,
    ) -> CResult<()> {
        let seek = pivot.map(|v| {
            let mut bytes = self.encoded_value(v);
            bytes.push(SEPARATOR);
            bytes.push(0xFF);
            bytes
        });
        let exact = pivot.map(|v| self.encoded_value(v));
        let mut entries = self.entries()?;
        if let Some(seek) = &seek {
            entries.retain(|(local_key, _, _)| local_key <= seek);
        }
        for (local_key, value, row_key) in entries.into_iter().rev() {
            let is_pivot = exact.as_ref().is_some_and(|exact| local_key.starts_with(exact.as_slice()));
            if !visitor((value, row_key, is_pivot))? {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvcc::{MVCCDef, MVCC};
    use crate::storage::memory::Memory;

    fn schema(unique: bool, numeric: bool) -> IndexSchema {
        IndexSchema {
            name: "idx".into(),
            table: "t".into(),
            columns: vec!["a".into()],
            unique,
            numeric,
            object_id: 7,
        }
    }

    #[test]
    fn list_index_allows_duplicate_values_at_distinct_row_keys() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let schema = schema(false, false);
        let index = Index::new(&schema, &txn);
        index.set(&Value::Integer(5), b"row1").unwrap();
        index.set(&Value::Integer(5), b"row2").unwrap();

        let mut seen = Vec::new();
        index
            .ascend(None, |(v, k, _)| {
                seen.push((v, k));
                Ok(true)
            })
            .unwrap();
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn unique_index_rejects_duplicate_value() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let schema = schema(true, false);
        let index = Index::new(&schema, &txn);
        index.set(&Value::Integer(5), b"row1").unwrap();
        let err = index.set(&Value::Integer(5), b"row2").unwrap_err();
        assert!(matches!(err, Error::Constraint(_)));
    }

    #[test]
    fn numeric_index_coerces_integer_and_double_together() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let schema = schema(false, true);
        let index = Index::new(&schema, &txn);
        index.set(&Value::Integer(10), b"row1").unwrap();
        let err = Index::new(&schema, &txn).set(&Value::Double(10.0), b"row2");
        assert!(err.is_ok());

        let mut seen = Vec::new();
        index
            .ascend(Some(&Value::Double(10.0)), |(v, k, is_pivot)| {
                seen.push((v, k, is_pivot));
                Ok(true)
            })
            .unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|(_, _, is_pivot)| *is_pivot));
    }

    #[test]
    fn descend_includes_pivot_row_via_high_sentinel() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let schema = schema(false, false);
        let index = Index::new(&schema, &txn);
        index.set(&Value::Integer(1), b"a").unwrap();
        index.set(&Value::Integer(2), b"b").unwrap();
        index.set(&Value::Integer(3), b"c").unwrap();

        let mut seen = Vec::new();
        index
            .descend(Some(&Value::Integer(2)), |(v, _, _)| {
                seen.push(v);
                Ok(true)
            })
            .unwrap();
        assert_eq!(seen, vec![Value::Integer(2), Value::Integer(1)]);
    }

    #[test]
    fn unique_index_rejects_a_second_null() {
        // Resolves spec.md §9's open question ("tie-breaking when a unique
        // index's indexed value is Null") in favour of treating Null like
        // any other value: a unique index holds at most one entry whose
        // encoded value is equal, and Null's encoding is no exception.
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let schema = schema(true, false);
        let index = Index::new(&schema, &txn);
        index.set(&Value::Null, b"row1").unwrap();
        let err = index.set(&Value::Null, b"row2").unwrap_err();
        assert!(matches!(err, Error::Constraint(_)));
    }

    #[test]
    fn delete_of_missing_entry_is_not_found() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let schema = schema(true, false);
        let index = Index::new(&schema, &txn);
        let err = index.delete(&Value::Integer(1), b"row").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
