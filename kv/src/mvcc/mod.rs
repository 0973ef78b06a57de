pub mod mvcc;
pub mod transaction;
mod scan;
#[cfg(test)]
mod transaction_test;

/// An MVCC version represents a logical timestamp. The latest version is incremented
/// when beginning each read-write transaction.
pub type Version = u64;

pub use mvcc::{Status, MVCC, MVCCDef};
pub use transaction::{Transaction, TransactionState};
