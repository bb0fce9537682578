//! FIFO allocation.
//!
//! Given a wallet and an amount, walk the wallet's unspent credits oldest
//! first and draw each one down until the amount is covered. The entry that
//! completes coverage is consumed only by what is still needed; entries
//! after it are not even loaded.

use crate::error::LedgerResult;
use crate::ledger::{Ledger, PointDeduction};
use crate::storage::UnitOfWork;

/// Marks just enough of `source_wallet_id`'s unspent credits as spent to
/// cover `amount`, and reports what was drawn from where.
///
/// If the wallet's credits run out first, the returned deductions sum to
/// less than `amount`. Detecting that (and aborting) is the caller's job;
/// see [`covered`].
pub fn allocate<U: UnitOfWork + ?Sized>(
    uow: &mut U,
    source_wallet_id: &str,
    amount: i64,
) -> LedgerResult<Vec<PointDeduction>> {
    // Snapshot: `mark_spent` rewrites the stored queue as entries run dry.
    let queue = uow.load_queue(source_wallet_id)?;
    let mut remaining = amount;
    let mut deductions = Vec::new();

    for queued in queue.iter() {
        if remaining == 0 {
            break;
        }

        let entry = uow.queued_entry(source_wallet_id, queued)?;
        if entry.is_exhausted() {
            continue;
        }

        let take = entry.remaining().min(remaining);
        uow.mark_spent(&entry.id, take)?;
        remaining -= take;

        tracing::debug!(
            wallet = source_wallet_id,
            entry = %entry.id,
            take,
            remaining,
            "credit drawn down"
        );

        deductions.push(PointDeduction {
            wallet_id: entry
                .credit_wallet_id
                .clone()
                .unwrap_or_else(|| source_wallet_id.to_string()),
            points: take,
        });
    }

    Ok(deductions)
}

/// Total points covered by a set of deductions.
pub fn covered(deductions: &[PointDeduction]) -> i64 {
    deductions.iter().map(|d| d.points).sum()
}
