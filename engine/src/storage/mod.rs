//! # Storage Module
//!
//! The processor never talks to a database directly. It asks a [`Store`] to
//! run a closure as one atomic unit, and inside that closure it sees a
//! [`UnitOfWork`]: typed get/put access to wallets, ledger entries and
//! credit queues, plus a sequence generator.
//!
//! ## Architecture
//!
//! ```text
//! mod.rs    Store / UnitOfWork contracts
//! memory.rs in-process backend: one mutex, staged overlay
//! db.rs     sled backend: multi-tree serializable transactions
//! ```
//!
//! ## Isolation Contract
//!
//! Conflicting concurrent units of work on overlapping wallets must
//! serialize or abort. A unit that returns `Err` leaves no trace. A backend
//! may run the closure more than once (sled does, on conflict), so the
//! closure must only depend on what it reads through the unit of work.

pub mod db;
pub mod memory;

pub use db::SledStore;
pub use memory::MemoryStore;

use crate::error::LedgerResult;
use crate::ledger::{CreditQueue, Transaction};
use crate::wallet::Wallet;

/// Raw access to the three collections inside a commit scope.
///
/// Higher-level operations live on the [`WalletStore`](crate::wallet::WalletStore)
/// and [`Ledger`](crate::ledger::Ledger) extension traits, which every
/// `UnitOfWork` gets for free.
pub trait UnitOfWork {
    fn load_wallet(&self, wallet_id: &str) -> LedgerResult<Option<Wallet>>;
    fn save_wallet(&mut self, wallet: &Wallet) -> LedgerResult<()>;

    fn load_entry(&self, entry_id: &str) -> LedgerResult<Option<Transaction>>;
    fn save_entry(&mut self, entry: &Transaction) -> LedgerResult<()>;

    /// The recipient's credit queue; empty if none was ever saved.
    fn load_queue(&self, wallet_id: &str) -> LedgerResult<CreditQueue>;
    fn save_queue(&mut self, wallet_id: &str, queue: &CreditQueue) -> LedgerResult<()>;

    /// Next insertion sequence number. Strictly increasing per store.
    fn next_sequence(&mut self) -> LedgerResult<u64>;
}

/// A persistence backend able to run units of work atomically.
pub trait Store: Send + Sync {
    /// Runs `op` as a single atomic commit. Writes become visible only if
    /// `op` returns `Ok`.
    fn atomically<R, F>(&self, op: F) -> LedgerResult<R>
    where
        F: Fn(&mut dyn UnitOfWork) -> LedgerResult<R>;

    /// Committed state of one wallet.
    fn wallet(&self, wallet_id: &str) -> LedgerResult<Option<Wallet>>;

    /// Committed state of every wallet, in id order.
    fn wallets(&self) -> LedgerResult<Vec<Wallet>>;

    /// Every committed ledger entry, newest first.
    fn entries(&self) -> LedgerResult<Vec<Transaction>>;

    fn wallet_count(&self) -> LedgerResult<usize> {
        Ok(self.wallets()?.len())
    }

    /// Blocks until every committed write is durable. A no-op for backends
    /// without durability.
    fn flush(&self) -> LedgerResult<()> {
        Ok(())
    }
}

/// Sorts entries newest first: descending `(timestamp, sequence)`.
pub(crate) fn newest_first(entries: &mut [Transaction]) {
    entries.sort_by(|a, b| b.order_key().cmp(&a.order_key()));
}
