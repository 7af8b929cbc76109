//! rollcall-store — SQLite persistence for the attendance system.
//!
//! The employee roster (with embeddings encrypted at rest) and the daily
//! attendance ledger share one schema; the ledger's uniqueness discipline
//! over (employee_id, date) is backed by a database constraint.

pub mod crypto;
pub mod db;
pub mod ledger;
pub mod roster;

pub use crypto::{CryptoError, EmbeddingCipher};
pub use ledger::{AttendanceLedger, Contact, MarkOutcome, ReportRow};
pub use roster::{EmployeeRow, NewEmployee, RosterStore};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("employee code already registered: {0}")]
    CodeExists(String),
    #[error("face already registered to {name} (employee {id})")]
    DuplicateFace { id: i64, name: String },
    #[error("employee not found: {0}")]
    NotFound(i64),
    #[error("employee {id} has a {got}-dim embedding, engine produces {expected}")]
    EmbeddingLength { id: i64, got: usize, expected: usize },
    #[error("malformed attendance record: {0}")]
    BadRecord(String),
}
