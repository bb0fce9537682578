// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Tally: Points Ledger Engine
//!
//! Tally keeps per-wallet point balances and an append-only ledger of every
//! grant, transfer and burn. The interesting part is that points are not
//! fungible inside a wallet: every point that leaves a wallet is drawn from a
//! specific earlier grant, oldest grant first, and each grant carries a
//! running `spent_amount` that records how much of it has been consumed.
//!
//! ## Architecture
//!
//! - **wallet**: wallet records and the wallet-store view of a commit scope.
//! - **ledger**: ledger entries, point deductions, the per-recipient credit
//!   queue, and the ledger view of a commit scope.
//! - **storage**: the `Store` / `UnitOfWork` seam plus the memory and sled
//!   backends.
//! - **processor**: validation, FIFO allocation, audit, and the public operations
//!   (transfer, mint, burn) that tie everything together atomically.
//! - **config**: defaults shared with the node binary.
//!
//! ## Invariants
//!
//! 1. A wallet's balance equals the sum of unspent remainders of the entries
//!    that credit it, after every committed operation.
//! 2. `0 <= spent_amount <= amount` for every entry, and `spent_amount` only
//!    grows.
//! 3. An operation either commits all of its writes or none of them.

pub mod config;
pub mod error;
pub mod ledger;
pub mod processor;
pub mod storage;
pub mod wallet;

pub use error::{ErrorKind, LedgerError, LedgerResult, StoreError};
pub use ledger::{PointDeduction, Transaction};
pub use processor::{AuditReport, Transfer, TransactionProcessor};
pub use storage::{MemoryStore, SledStore, Store, UnitOfWork};
pub use wallet::Wallet;
