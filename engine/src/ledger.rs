//! # Ledger
//!
//! The ledger is the source of truth. Every mint, transfer and burn appends
//! exactly one [`Transaction`]; nothing is ever deleted, and the only field
//! that changes after an entry is appended is `spent_amount`.
//!
//! ## Naming
//!
//! The field names follow the points program's vocabulary, which reads
//! backwards to an accountant: `credit_wallet_id` is the wallet that *gives*
//! points (its balance goes down) and `debit_wallet_id` is the wallet that
//! *receives* them (its balance goes up).
//!
//! | Entry    | `credit_wallet_id` | `debit_wallet_id` |
//! |----------|--------------------|-------------------|
//! | mint     | `None`             | recipient         |
//! | transfer | source             | recipient         |
//! | burn     | source             | `None`            |
//!
//! ## Credit Queue
//!
//! Each recipient wallet owns a [`CreditQueue`]: the entries crediting it
//! that still have an unspent remainder, sorted by `(timestamp, sequence)`.
//! It is the index the FIFO allocator walks. Entries join the queue in
//! [`Ledger::append`] and leave it in [`Ledger::mark_spent`] once exhausted,
//! always inside the same commit scope as the write that caused it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::storage::UnitOfWork;

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A single ledger entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// UUID v4, assigned at construction.
    pub id: String,
    /// Ordering key for FIFO allocation.
    pub timestamp: DateTime<Utc>,
    /// Insertion counter, assigned on append. Breaks timestamp ties.
    pub sequence: u64,
    /// Total points moved by this entry.
    pub amount: i64,
    /// Portion of `amount` already allocated to later outgoing transfers
    /// from the recipient wallet.
    pub spent_amount: i64,
    /// Source wallet (balance decreases). `None` for mints.
    pub credit_wallet_id: Option<String>,
    /// Recipient wallet (balance increases). `None` for burns.
    pub debit_wallet_id: Option<String>,
}

impl Transaction {
    fn new(
        credit_wallet_id: Option<&str>,
        debit_wallet_id: Option<&str>,
        amount: i64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            sequence: 0,
            amount,
            spent_amount: 0,
            credit_wallet_id: credit_wallet_id.map(str::to_string),
            debit_wallet_id: debit_wallet_id.map(str::to_string),
        }
    }

    /// A grant of new points to `recipient`.
    pub fn mint(recipient: &str, amount: i64, timestamp: DateTime<Utc>) -> Self {
        Self::new(None, Some(recipient), amount, timestamp)
    }

    /// A wallet-to-wallet transfer.
    pub fn transfer(source: &str, recipient: &str, amount: i64, timestamp: DateTime<Utc>) -> Self {
        Self::new(Some(source), Some(recipient), amount, timestamp)
    }

    /// Points destroyed from `source`.
    pub fn burn(source: &str, amount: i64, timestamp: DateTime<Utc>) -> Self {
        Self::new(Some(source), None, amount, timestamp)
    }

    /// Points of this entry not yet allocated.
    pub fn remaining(&self) -> i64 {
        self.amount - self.spent_amount
    }

    pub fn is_exhausted(&self) -> bool {
        self.spent_amount >= self.amount
    }

    /// `(timestamp, sequence)`, the FIFO sort key.
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.sequence)
    }
}

// ---------------------------------------------------------------------------
// PointDeduction
// ---------------------------------------------------------------------------

/// One draw-down made by an allocation, reported back to the caller.
///
/// `wallet_id` names where the consumed points originally came from: the
/// source of the drawn-down entry, or the spending wallet itself when the
/// entry was a mint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointDeduction {
    pub wallet_id: String,
    pub points: i64,
}

// ---------------------------------------------------------------------------
// CreditQueue
// ---------------------------------------------------------------------------

/// Position of an unspent entry in a recipient's credit queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedCredit {
    pub entry_id: String,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
}

impl QueuedCredit {
    fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.sequence)
    }
}

/// Unspent entries crediting one wallet, oldest first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditQueue {
    credits: Vec<QueuedCredit>,
}

impl CreditQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry at its `(timestamp, sequence)` position. Entries
    /// with equal keys keep insertion order.
    pub fn insert(&mut self, entry: &Transaction) {
        let key = entry.order_key();
        let at = self.credits.partition_point(|c| c.order_key() <= key);
        self.credits.insert(
            at,
            QueuedCredit {
                entry_id: entry.id.clone(),
                timestamp: entry.timestamp,
                sequence: entry.sequence,
            },
        );
    }

    /// Removes an entry. Returns `false` if it was not queued.
    pub fn remove(&mut self, entry_id: &str) -> bool {
        match self.credits.iter().position(|c| c.entry_id == entry_id) {
            Some(i) => {
                self.credits.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedCredit> {
        self.credits.iter()
    }

    pub fn len(&self) -> usize {
        self.credits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credits.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Ledger operations available inside a commit scope.
pub trait Ledger {
    /// Appends a fully formed entry, assigning its sequence number, and
    /// returns the stored entry.
    fn append(&mut self, entry: Transaction) -> LedgerResult<Transaction>;

    /// Every entry crediting `wallet_id` with an unspent remainder, oldest
    /// first. Sees writes made earlier in the same scope.
    fn unspent_credits_for(&self, wallet_id: &str) -> LedgerResult<Vec<Transaction>>;

    /// Loads the entry behind one position of `wallet_id`'s credit queue.
    fn queued_entry(&self, wallet_id: &str, queued: &QueuedCredit) -> LedgerResult<Transaction>;

    /// Raises an entry's `spent_amount` by `additional`. Fails if the entry
    /// would end up spending more than its amount.
    fn mark_spent(&mut self, entry_id: &str, additional: i64) -> LedgerResult<Transaction>;
}

impl<U: UnitOfWork + ?Sized> Ledger for U {
    fn append(&mut self, mut entry: Transaction) -> LedgerResult<Transaction> {
        if entry.amount <= 0 {
            return Err(LedgerError::InvalidAmount(entry.amount));
        }
        if entry.spent_amount < 0 || entry.spent_amount > entry.amount {
            return Err(LedgerError::LedgerInconsistency(format!(
                "entry {} appended with spent {} of {}",
                entry.id, entry.spent_amount, entry.amount
            )));
        }

        entry.sequence = self.next_sequence()?;
        self.save_entry(&entry)?;

        if let Some(recipient) = entry.debit_wallet_id.as_deref() {
            if !entry.is_exhausted() {
                let mut queue = self.load_queue(recipient)?;
                queue.insert(&entry);
                self.save_queue(recipient, &queue)?;
            }
        }

        Ok(entry)
    }

    fn unspent_credits_for(&self, wallet_id: &str) -> LedgerResult<Vec<Transaction>> {
        let queue = self.load_queue(wallet_id)?;
        let mut credits = Vec::with_capacity(queue.len());

        for queued in queue.iter() {
            let entry = self.queued_entry(wallet_id, queued)?;
            if !entry.is_exhausted() {
                credits.push(entry);
            }
        }

        Ok(credits)
    }

    fn queued_entry(&self, wallet_id: &str, queued: &QueuedCredit) -> LedgerResult<Transaction> {
        self.load_entry(&queued.entry_id)?.ok_or_else(|| {
            LedgerError::LedgerInconsistency(format!(
                "credit queue of {wallet_id} references missing entry {}",
                queued.entry_id
            ))
        })
    }

    fn mark_spent(&mut self, entry_id: &str, additional: i64) -> LedgerResult<Transaction> {
        if additional < 0 {
            return Err(LedgerError::InvalidAmount(additional));
        }

        let mut entry = self.load_entry(entry_id)?.ok_or_else(|| {
            LedgerError::LedgerInconsistency(format!("cannot spend unknown entry {entry_id}"))
        })?;

        let spent = entry.spent_amount + additional;
        if spent > entry.amount {
            return Err(LedgerError::LedgerInconsistency(format!(
                "entry {entry_id} would be spent {spent} of {}",
                entry.amount
            )));
        }

        entry.spent_amount = spent;
        self.save_entry(&entry)?;

        if entry.is_exhausted() {
            if let Some(recipient) = entry.debit_wallet_id.as_deref() {
                let mut queue = self.load_queue(recipient)?;
                queue.remove(entry_id);
                self.save_queue(recipient, &queue)?;
            }
        }

        Ok(entry)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
