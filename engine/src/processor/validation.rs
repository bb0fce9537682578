//! Request and wallet validation.
//!
//! Everything here is side-effect free and runs before the first write of a
//! unit of work, so a rejected request never leaves anything to roll back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::wallet::Wallet;

/// A wallet-to-wallet transfer request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    #[serde(default)]
    pub source_wallet_id: Option<String>,
    #[serde(default)]
    pub recipient_wallet_id: Option<String>,
    pub amount: i64,
    pub timestamp: DateTime<Utc>,
}

impl Transfer {
    pub fn new(source: &str, recipient: &str, amount: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            source_wallet_id: Some(source.to_string()),
            recipient_wallet_id: Some(recipient.to_string()),
            amount,
            timestamp,
        }
    }
}

/// A transfer whose shape has been checked: both ids present and distinct,
/// amount positive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckedTransfer<'a> {
    pub source: &'a str,
    pub recipient: &'a str,
    pub amount: i64,
    pub timestamp: DateTime<Utc>,
}

/// Rejects non-positive amounts.
pub fn validate_amount(amount: i64) -> LedgerResult<()> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(())
}

/// Returns the id if it is present and not blank.
pub fn require_wallet_id<'a>(id: Option<&'a str>, role: &'static str) -> LedgerResult<&'a str> {
    match id {
        Some(id) if !id.trim().is_empty() => Ok(id),
        _ => Err(LedgerError::MissingWallet(role)),
    }
}

/// Checks the transfer's shape. Wallet existence and funds are checked
/// later, against state read inside the unit of work.
pub fn validate_transfer(transfer: &Transfer) -> LedgerResult<CheckedTransfer<'_>> {
    validate_amount(transfer.amount)?;
    let recipient = require_wallet_id(transfer.recipient_wallet_id.as_deref(), "recipient")?;
    let source = require_wallet_id(transfer.source_wallet_id.as_deref(), "source")?;

    if source == recipient {
        return Err(LedgerError::SameWalletTransfer(source.to_string()));
    }

    Ok(CheckedTransfer {
        source,
        recipient,
        amount: transfer.amount,
        timestamp: transfer.timestamp,
    })
}

fn ensure_funds(source: &Wallet, amount: i64) -> LedgerResult<()> {
    if source.balance < amount {
        return Err(LedgerError::InsufficientFunds {
            wallet_id: source.id.clone(),
            available: source.balance,
            requested: amount,
        });
    }
    Ok(())
}

/// Checks that both wallets exist and the source can cover `amount`.
pub fn validate_wallets(
    transfer: &CheckedTransfer<'_>,
    source: Option<Wallet>,
    recipient: Option<Wallet>,
) -> LedgerResult<(Wallet, Wallet)> {
    let source = source.ok_or_else(|| LedgerError::SourceNotFound(transfer.source.to_string()))?;
    let recipient =
        recipient.ok_or_else(|| LedgerError::RecipientNotFound(transfer.recipient.to_string()))?;
    ensure_funds(&source, transfer.amount)?;
    Ok((source, recipient))
}

/// Checks that the spending wallet exists and can cover `amount`.
pub fn validate_source(source_id: &str, source: Option<Wallet>, amount: i64) -> LedgerResult<Wallet> {
    let source = source.ok_or_else(|| LedgerError::SourceNotFound(source_id.to_string()))?;
    ensure_funds(&source, amount)?;
    Ok(source)
}
