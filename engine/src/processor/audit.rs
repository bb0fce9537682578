//! Ledger audit: recomputes every balance from the ledger and compares it
//! with the cached wallet balances.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ledger::Transaction;
use crate::wallet::Wallet;

/// A wallet whose cached balance disagrees with the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceDrift {
    pub wallet_id: String,
    /// Balance stored on the wallet record. `None` if the ledger credits a
    /// wallet that has no record at all.
    pub cached_balance: Option<i64>,
    /// Sum of unspent remainders of entries crediting the wallet.
    pub ledger_balance: i64,
}

/// Result of [`audit`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub wallets_checked: usize,
    pub entries_checked: usize,
    pub balance_drifts: Vec<BalanceDrift>,
    /// Ids of entries with `spent_amount` outside `0..=amount`.
    pub invalid_entries: Vec<String>,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.balance_drifts.is_empty() && self.invalid_entries.is_empty()
    }
}

/// Audits a set of wallets against a set of entries.
pub fn audit(wallets: &[Wallet], entries: &[Transaction]) -> AuditReport {
    let mut expected: BTreeMap<&str, i64> = BTreeMap::new();
    let mut invalid_entries = Vec::new();

    for entry in entries {
        if entry.spent_amount < 0 || entry.spent_amount > entry.amount {
            invalid_entries.push(entry.id.clone());
        }
        if let Some(recipient) = entry.debit_wallet_id.as_deref() {
            *expected.entry(recipient).or_default() += entry.remaining();
        }
    }

    let mut balance_drifts = Vec::new();
    for wallet in wallets {
        let ledger_balance = expected.remove(wallet.id.as_str()).unwrap_or(0);
        if ledger_balance != wallet.balance {
            balance_drifts.push(BalanceDrift {
                wallet_id: wallet.id.clone(),
                cached_balance: Some(wallet.balance),
                ledger_balance,
            });
        }
    }

    // Whatever is left is credited on the ledger but has no wallet record.
    balance_drifts.extend(
        expected
            .into_iter()
            .filter(|(_, balance)| *balance != 0)
            .map(|(wallet_id, ledger_balance)| BalanceDrift {
                wallet_id: wallet_id.to_string(),
                cached_balance: None,
                ledger_balance,
            }),
    );

    AuditReport {
        wallets_checked: wallets.len(),
        entries_checked: entries.len(),
        balance_drifts,
        invalid_entries,
    }
}
