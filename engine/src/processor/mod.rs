//! # Transaction Processor
//!
//! The only entry point that mutates state. Each public operation runs as a
//! single unit of work on the configured [`Store`]: it either commits every
//! balance change and ledger write it made, or none of them.
//!
//! ## Transfer Pipeline
//!
//! ```text
//! validate_transfer ─► [ unit of work:                                   ]
//!                      [   validate_wallets ─► allocate ─► coverage check ]
//!                      [   ─► source -amount ─► recipient +amount        ]
//!                      [   ─► append entry                               ]
//!                      [ commit ]
//! ```
//!
//! Request shape is checked before the unit of work starts. Wallet existence
//! and funds are checked inside it, against the same state the allocation
//! reads, so two transfers racing for the same credits cannot both pass.
//!
//! Entry ids and timestamps are fixed before the unit of work begins. A
//! backend may run the closure more than once, and every run must produce
//! the same entry.

pub mod allocation;
pub mod audit;
pub mod validation;

pub use allocation::{allocate, covered};
pub use audit::{AuditReport, BalanceDrift};
pub use validation::{validate_transfer, validate_wallets, CheckedTransfer, Transfer};

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{Ledger, PointDeduction, Transaction};
use crate::storage::{Store, UnitOfWork};
use crate::wallet::{Wallet, WalletStore};

use validation::{require_wallet_id, validate_amount, validate_source};

/// Runs mints, transfers and burns against a [`Store`].
#[derive(Debug)]
pub struct TransactionProcessor<S: Store> {
    store: S,
}

impl<S: Store> TransactionProcessor<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Creates an empty wallet. Existing wallets are returned unchanged.
    pub fn create_wallet(&self, wallet_id: &str) -> LedgerResult<Wallet> {
        let wallet_id = require_wallet_id(Some(wallet_id), "wallet")?;
        self.store.atomically(|uow| uow.create_if_absent(wallet_id))
    }

    /// Moves `transfer.amount` points from the source to the recipient,
    /// drawing the source's oldest credits down first. Returns the
    /// deductions made.
    pub fn process_transfer(&self, transfer: &Transfer) -> LedgerResult<Vec<PointDeduction>> {
        let started = Instant::now();
        let result = validate_transfer(transfer).and_then(|checked| {
            let entry = Transaction::transfer(
                checked.source,
                checked.recipient,
                checked.amount,
                checked.timestamp,
            );

            self.store.atomically(|uow| {
                let source = uow.get_wallet(checked.source)?;
                let recipient = uow.get_wallet(checked.recipient)?;
                validate_wallets(&checked, source, recipient)?;
                settle(uow, checked.source, Some(checked.recipient), entry.clone())
            })
        });

        match &result {
            Ok(deductions) => tracing::info!(
                source = transfer.source_wallet_id.as_deref().unwrap_or_default(),
                recipient = transfer.recipient_wallet_id.as_deref().unwrap_or_default(),
                amount = transfer.amount,
                deductions = deductions.len(),
                elapsed_us = started.elapsed().as_micros() as u64,
                "transfer committed"
            ),
            Err(e) => log_rejection("transfer", e),
        }
        result
    }

    /// Grants `amount` new points to `recipient_wallet_id`, creating the
    /// wallet if needed. A zero amount only creates the wallet.
    pub fn mint_points(
        &self,
        recipient_wallet_id: &str,
        amount: i64,
        timestamp: Option<DateTime<Utc>>,
    ) -> LedgerResult<Wallet> {
        let result = self.mint_inner(recipient_wallet_id, amount, timestamp);
        match &result {
            Ok(wallet) => tracing::info!(
                recipient = %wallet.id,
                amount,
                balance = wallet.balance,
                "mint committed"
            ),
            Err(e) => log_rejection("mint", e),
        }
        result
    }

    fn mint_inner(
        &self,
        recipient_wallet_id: &str,
        amount: i64,
        timestamp: Option<DateTime<Utc>>,
    ) -> LedgerResult<Wallet> {
        let recipient = require_wallet_id(Some(recipient_wallet_id), "recipient")?;
        if amount < 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let entry = (amount > 0)
            .then(|| Transaction::mint(recipient, amount, timestamp.unwrap_or_else(Utc::now)));

        self.store.atomically(|uow| {
            let wallet = uow.create_if_absent(recipient)?;
            match &entry {
                Some(entry) => {
                    let wallet = uow.apply_delta(recipient, amount)?;
                    uow.append(entry.clone())?;
                    Ok(wallet)
                }
                None => Ok(wallet),
            }
        })
    }

    /// Destroys `amount` points from `source_wallet_id`, oldest credits
    /// first. Returns the deductions made.
    pub fn burn_points(
        &self,
        source_wallet_id: &str,
        amount: i64,
    ) -> LedgerResult<Vec<PointDeduction>> {
        let result = validate_amount(amount)
            .and_then(|()| require_wallet_id(Some(source_wallet_id), "source"))
            .and_then(|source| {
                let entry = Transaction::burn(source, amount, Utc::now());
                self.store.atomically(|uow| {
                    let wallet = uow.get_wallet(source)?;
                    validate_source(source, wallet, amount)?;
                    settle(uow, source, None, entry.clone())
                })
            });

        match &result {
            Ok(deductions) => tracing::info!(
                source = source_wallet_id,
                amount,
                deductions = deductions.len(),
                "burn committed"
            ),
            Err(e) => log_rejection("burn", e),
        }
        result
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Every wallet's balance, keyed by wallet id.
    pub fn balances(&self) -> LedgerResult<BTreeMap<String, i64>> {
        Ok(self
            .store
            .wallets()?
            .into_iter()
            .map(|w| (w.id, w.balance))
            .collect())
    }

    pub fn wallet_count(&self) -> LedgerResult<usize> {
        self.store.wallet_count()
    }

    pub fn wallet(&self, wallet_id: &str) -> LedgerResult<Option<Wallet>> {
        self.store.wallet(wallet_id)
    }

    /// The whole ledger, newest first.
    pub fn ledger(&self) -> LedgerResult<Vec<Transaction>> {
        self.store.entries()
    }

    /// Recomputes every balance from the ledger and reports disagreements.
    ///
    /// Wallets and entries are read one after the other, not as a single
    /// snapshot, so a report taken while writes are in flight may show
    /// transient drift.
    pub fn audit(&self) -> LedgerResult<AuditReport> {
        let wallets = self.store.wallets()?;
        let entries = self.store.entries()?;
        let report = audit::audit(&wallets, &entries);

        if report.is_consistent() {
            tracing::debug!(
                wallets = report.wallets_checked,
                entries = report.entries_checked,
                "audit clean"
            );
        } else {
            tracing::error!(
                drifts = report.balance_drifts.len(),
                invalid_entries = report.invalid_entries.len(),
                "audit found inconsistencies"
            );
        }
        Ok(report)
    }
}

/// Allocates `entry.amount` from `source`, moves the balances and appends
/// the entry. Fails with `LedgerInconsistency` when the source's unspent
/// credits do not cover the amount its balance claims to hold.
fn settle(
    uow: &mut dyn UnitOfWork,
    source: &str,
    recipient: Option<&str>,
    entry: Transaction,
) -> LedgerResult<Vec<PointDeduction>> {
    let amount = entry.amount;
    let deductions = allocate(uow, source, amount)?;

    let drawn = covered(&deductions);
    if drawn != amount {
        return Err(LedgerError::LedgerInconsistency(format!(
            "wallet {source} covers {drawn} of {amount} from its unspent credits"
        )));
    }

    uow.apply_delta(source, -amount)?;
    if let Some(recipient) = recipient {
        uow.apply_delta(recipient, amount)?;
    }
    uow.append(entry)?;

    Ok(deductions)
}

fn log_rejection(operation: &'static str, err: &LedgerError) {
    if err.kind().is_client_error() {
        tracing::warn!(operation, kind = err.kind().as_str(), error = %err, "operation rejected");
    } else {
        tracing::error!(operation, kind = err.kind().as_str(), error = %err, "operation failed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
