//! The error taxonomy shared by every layer of the engine: storage, mvcc,
//! locking, catalog, table and index. Kept as kinds rather than a grab-bag
//! of string variants so callers can match on what actually went wrong.

use std::fmt::{self, Display, Formatter};

/// The crate-wide result alias. Used throughout `kv` instead of spelling out
/// `Result<T, Error>` at every call site.
pub type CResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// A row, key, table, index, or store does not exist.
    NotFound(String),

    /// Table, index, or store creation collided with an existing object.
    AlreadyExists(String),

    /// Primary-key violation, unique-index duplicate, or nullability
    /// violation.
    Constraint(String),

    /// A value cannot be encoded as, or decoded to, the requested type.
    TypeMismatch(String),

    /// A write was attempted on a read-only transaction.
    ReadOnly,

    /// The transaction has already committed or rolled back.
    TransactionClosed,

    /// The caller cancelled a lock acquisition while waiting.
    LockTimeout,

    /// Iteration was aborted by the visitor, or by caller cancellation.
    Interrupted,

    /// Persistent data failed an invariant on decode. Fatal for the
    /// transaction that observed it.
    Corruption(String),

    /// Wraps `std::io::Error` from the underlying storage medium.
    Io(String),

    /// Catch-all for conditions the other variants don't name precisely
    /// (parse failures, internal invariant violations raised by `bincode`
    /// or `serde_json`, and the like).
    Internal(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound(what) => write!(f, "not found: {what}"),
            Error::AlreadyExists(what) => write!(f, "already exists: {what}"),
            Error::Constraint(what) => write!(f, "constraint violation: {what}"),
            Error::TypeMismatch(what) => write!(f, "type mismatch: {what}"),
            Error::ReadOnly => write!(f, "transaction is read-only"),
            Error::TransactionClosed => write!(f, "transaction is closed"),
            Error::LockTimeout => write!(f, "lock acquisition cancelled"),
            Error::Interrupted => write!(f, "iteration interrupted"),
            Error::Corruption(what) => write!(f, "data corruption: {what}"),
            Error::Io(what) => write!(f, "I/O error: {what}"),
            Error::Internal(what) => write!(f, "internal error: {what}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::Corruption(err.to_string())
    }
}
