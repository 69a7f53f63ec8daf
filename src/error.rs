use std::fmt::Display;

use crate::common::{PageId, TableId};

/// Conditions callers need to tell apart. They travel inside an `anyhow::Error`
/// and can be recovered with `err.downcast_ref::<DbError>()`.
#[derive(Debug)]
pub enum DbError {
    /// A lock could not be acquired in time. The transaction has to abort.
    TransactionAborted,
    /// The buffer pool is full and every cached page is dirty.
    AllPagesDirty,
    /// The page has no free slot left.
    PageFull(PageId),
    InvalidReference(String),
    SchemaMismatch(String),
    UnknownTable(TableId),
    Io(std::io::Error),
}

impl DbError {
    /// Returns the DbError carried by an error chain, if there is one.
    pub fn from_anyhow(err: &anyhow::Error) -> Option<&DbError> {
        err.downcast_ref::<DbError>()
    }

    pub fn is_abort(err: &anyhow::Error) -> bool {
        matches!(Self::from_anyhow(err), Some(DbError::TransactionAborted))
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbError::TransactionAborted => write!(f, "Transaction aborted"),
            DbError::AllPagesDirty => write!(f, "All pages are dirty, cannot evict"),
            DbError::PageFull(page_id) => write!(f, "Page {page_id} is full"),
            DbError::InvalidReference(msg) => write!(f, "Invalid reference: {msg}"),
            DbError::SchemaMismatch(msg) => write!(f, "Schema mismatch: {msg}"),
            DbError::UnknownTable(table_id) => write!(f, "No table with id {table_id}"),
            DbError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DbError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DbError {
    fn from(e: std::io::Error) -> Self {
        DbError::Io(e)
    }
}
