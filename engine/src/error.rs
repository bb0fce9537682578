//! Error types for the points ledger.
//!
//! Every processor operation that can fail returns a [`LedgerError`]. The
//! first seven variants are the domain failures callers are expected to
//! handle; [`LedgerError::Store`] wraps whatever the persistence backend
//! reported. [`ErrorKind`] is the flat, serializable view of the same thing
//! that the gateway maps onto HTTP status codes.

use serde::{Deserialize, Serialize};
use sled::transaction::UnabortableTransactionError;
use thiserror::Error;

/// Crate-wide result alias.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Failures raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Raised inside a sled transaction. A conflict here is not a failure:
    /// the backend hands it back to sled, which re-runs the unit of work.
    #[error("transactional storage error: {0}")]
    Transaction(#[from] UnabortableTransactionError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors returned by wallet, ledger and processor operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Transfer, burn and mint amounts must be positive (mints may be zero).
    #[error("amount must be greater than 0, got {0}")]
    InvalidAmount(i64),

    /// A wallet id that the operation needs was absent or blank.
    #[error("{0} wallet id is required")]
    MissingWallet(&'static str),

    /// Source and recipient are the same wallet.
    #[error("cannot transfer to the same wallet ({0})")]
    SameWalletTransfer(String),

    #[error("source wallet not found: {0}")]
    SourceNotFound(String),

    #[error("recipient wallet not found: {0}")]
    RecipientNotFound(String),

    /// The source wallet's balance is below the requested amount.
    #[error("insufficient funds in {wallet_id}: available {available}, requested {requested}")]
    InsufficientFunds {
        wallet_id: String,
        available: i64,
        requested: i64,
    },

    /// The cached balance disagrees with the ledger's unspent total, or an
    /// allocation tried to spend past an entry's amount. Never expected in
    /// correct operation.
    #[error("ledger inconsistency: {0}")]
    LedgerInconsistency(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Stable, serializable classification of a [`LedgerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    InvalidAmount,
    MissingWallet,
    SameWalletTransfer,
    SourceNotFound,
    RecipientNotFound,
    InsufficientFunds,
    LedgerInconsistency,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidAmount => "invalidAmount",
            ErrorKind::MissingWallet => "missingWallet",
            ErrorKind::SameWalletTransfer => "sameWalletTransfer",
            ErrorKind::SourceNotFound => "sourceNotFound",
            ErrorKind::RecipientNotFound => "recipientNotFound",
            ErrorKind::InsufficientFunds => "insufficientFunds",
            ErrorKind::LedgerInconsistency => "ledgerInconsistency",
            ErrorKind::Storage => "storage",
        }
    }

    /// `true` for failures caused by the request rather than by the system.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ErrorKind::LedgerInconsistency | ErrorKind::Storage)
    }
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidAmount(_) => ErrorKind::InvalidAmount,
            LedgerError::MissingWallet(_) => ErrorKind::MissingWallet,
            LedgerError::SameWalletTransfer(_) => ErrorKind::SameWalletTransfer,
            LedgerError::SourceNotFound(_) => ErrorKind::SourceNotFound,
            LedgerError::RecipientNotFound(_) => ErrorKind::RecipientNotFound,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::LedgerInconsistency(_) => ErrorKind::LedgerInconsistency,
            LedgerError::Store(_) => ErrorKind::Storage,
        }
    }
}

impl From<sled::Error> for LedgerError {
    fn from(e: sled::Error) -> Self {
        LedgerError::Store(StoreError::Sled(e))
    }
}

impl From<UnabortableTransactionError> for LedgerError {
    fn from(e: UnabortableTransactionError) -> Self {
        LedgerError::Store(StoreError::Transaction(e))
    }
}

impl From<bincode::Error> for LedgerError {
    fn from(e: bincode::Error) -> Self {
        LedgerError::Store(StoreError::Serialization(e.to_string()))
    }
}
