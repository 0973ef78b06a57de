#![allow(non_camel_case_types)]

//! `kv` is an embeddable transactional key-value engine with a relational
//! veneer on top: a single ordered byte-string keyspace (`storage`,
//! `encoding::keycode`), multi-version concurrency control (`mvcc`), a
//! hierarchical lock manager (`lock`), a persisted catalog of tables and
//! indexes (`catalog`), row storage and secondary indexing (`table`,
//! `index`), and a transaction coordinator (`txn`) tying all of it together
//! behind one `Database`/`Transaction` API.
//!
//! ## Getting started
//!
//! ```rust
//! use kv::catalog::{ColumnDef, NewTable};
//! use kv::storage::memory::Memory;
//! use kv::txn::Database;
//! use kv::value::{DataType, Value};
//!
//! # fn run() -> kv::error::CResult<()> {
//! let db = Database::new(Memory::new())?;
//!
//! let mut txn = db.begin()?;
//! txn.create_table(NewTable {
//!     name: "users".into(),
//!     columns: vec![
//!         ColumnDef::new("id", DataType::Integer, false),
//!         ColumnDef::new("name", DataType::Text, false),
//!     ],
//!     primary_key: vec!["id".into()],
//! })?;
//! let key = txn.table("users")?.insert(vec![Value::Integer(1), Value::Text("ada".into())])?;
//! txn.commit()?;
//!
//! let mut txn = db.begin_read_only()?;
//! let row = txn.table("users")?.get(&key)?;
//! assert_eq!(row.values()[1], Value::Text("ada".into()));
//! # Ok(())
//! # }
//! # run().unwrap();
//! ```

pub mod catalog;
pub mod encoding;
pub mod error;
pub mod index;
pub mod lock;
pub mod mvcc;
pub mod row;
pub mod storage;
pub mod table;
pub mod txn;
pub mod value;

pub use catalog::{ColumnDef, IndexSchema, NewIndex, NewTable, TableSchema};
pub use error::{CResult, Error};
pub use index::Index;
pub use row::Row;
pub use table::Table;
pub use txn::{Database, Transaction};
pub use value::{DataType, Value};
