//! # Wallets
//!
//! A [`Wallet`] is a cached projection of the ledger: its `balance` must
//! always equal the unspent remainder of every entry that credits it. The
//! projection is only ever changed through [`WalletStore::apply_delta`],
//! and that method is only reachable through a [`UnitOfWork`], so balance
//! changes cannot escape a commit scope.
//!
//! The store deliberately enforces no balance floor. Refusing to overdraw
//! is the processor's job, done before any delta is applied.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::storage::UnitOfWork;

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

/// A points wallet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    /// Opaque, externally assigned identifier.
    pub id: String,
    /// Points currently available to the wallet.
    pub balance: i64,
    /// When the wallet was first created.
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    /// Creates an empty wallet.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            balance: 0,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// WalletStore
// ---------------------------------------------------------------------------

/// Wallet operations available inside a commit scope.
pub trait WalletStore {
    /// Looks up a wallet. `None` means the id has never been created.
    fn get_wallet(&self, wallet_id: &str) -> LedgerResult<Option<Wallet>>;

    /// Returns the wallet, creating an empty one if it does not exist yet.
    ///
    /// Idempotent: an existing wallet is returned unchanged.
    fn create_if_absent(&mut self, wallet_id: &str) -> LedgerResult<Wallet>;

    /// Adds `delta` (which may be negative) to the wallet's balance and
    /// returns the updated wallet.
    fn apply_delta(&mut self, wallet_id: &str, delta: i64) -> LedgerResult<Wallet>;
}

impl<U: UnitOfWork + ?Sized> WalletStore for U {
    fn get_wallet(&self, wallet_id: &str) -> LedgerResult<Option<Wallet>> {
        self.load_wallet(wallet_id)
    }

    fn create_if_absent(&mut self, wallet_id: &str) -> LedgerResult<Wallet> {
        if let Some(existing) = self.load_wallet(wallet_id)? {
            return Ok(existing);
        }
        let wallet = Wallet::new(wallet_id);
        self.save_wallet(&wallet)?;
        tracing::debug!(wallet = wallet_id, "wallet created");
        Ok(wallet)
    }

    fn apply_delta(&mut self, wallet_id: &str, delta: i64) -> LedgerResult<Wallet> {
        let mut wallet = self.load_wallet(wallet_id)?.ok_or_else(|| {
            LedgerError::LedgerInconsistency(format!(
                "balance delta {delta} applied to unknown wallet {wallet_id}"
            ))
        })?;

        wallet.balance = wallet
            .balance
            .checked_add(delta)
            .ok_or(LedgerError::InvalidAmount(delta))?;
        self.save_wallet(&wallet)?;
        Ok(wallet)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
