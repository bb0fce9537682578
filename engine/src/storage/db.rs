//! # SledStore: Durable Storage Engine
//!
//! The durable backend, built on sled's embedded key-value store.
//!
//! ## Tree Layout
//!
//! | Tree            | Key                  | Value                 |
//! |-----------------|----------------------|-----------------------|
//! | `wallets`       | wallet id (UTF-8)    | `bincode(Wallet)`     |
//! | `entries`       | entry id (UTF-8)     | `bincode(Transaction)`|
//! | `credit_queues` | wallet id (UTF-8)    | `bincode(CreditQueue)`|
//!
//! ## Atomicity
//!
//! A unit of work runs as one sled transaction spanning all three trees.
//! sled tracks what the transaction read; if a concurrent transaction
//! committed a conflicting write first, sled discards the attempt and runs
//! the closure again against fresh data. Two transfers racing for the same
//! unspent entry therefore serialize, and the loser re-validates against the
//! winner's result.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::{Db, Transactional, Tree};

use super::{newest_first, Store, UnitOfWork};
use crate::config::{CREDIT_QUEUES_TREE, ENTRIES_TREE, WALLETS_TREE};
use crate::error::{LedgerError, LedgerResult, StoreError};
use crate::ledger::{CreditQueue, Transaction};
use crate::wallet::Wallet;

fn encode<T: Serialize>(value: &T) -> LedgerResult<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> LedgerResult<T> {
    Ok(bincode::deserialize(bytes)?)
}

// ---------------------------------------------------------------------------
// SledStore
// ---------------------------------------------------------------------------

/// sled-backed [`Store`].
///
/// Cheap to clone; every clone shares the same database handle.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
    wallets: Tree,
    entries: Tree,
    queues: Tree,
}

impl SledStore {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> LedgerResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a database that is removed when the store is dropped.
    pub fn open_temporary() -> LedgerResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> LedgerResult<Self> {
        let wallets = db.open_tree(WALLETS_TREE)?;
        let entries = db.open_tree(ENTRIES_TREE)?;
        let queues = db.open_tree(CREDIT_QUEUES_TREE)?;

        Ok(Self {
            db,
            wallets,
            entries,
            queues,
        })
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

// ---------------------------------------------------------------------------
// Unit of work
// ---------------------------------------------------------------------------

struct SledUnit<'a> {
    wallets: &'a TransactionalTree,
    entries: &'a TransactionalTree,
    queues: &'a TransactionalTree,
}

impl UnitOfWork for SledUnit<'_> {
    fn load_wallet(&self, wallet_id: &str) -> LedgerResult<Option<Wallet>> {
        self.wallets
            .get(wallet_id.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn save_wallet(&mut self, wallet: &Wallet) -> LedgerResult<()> {
        self.wallets.insert(wallet.id.as_bytes(), encode(wallet)?)?;
        Ok(())
    }

    fn load_entry(&self, entry_id: &str) -> LedgerResult<Option<Transaction>> {
        self.entries
            .get(entry_id.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn save_entry(&mut self, entry: &Transaction) -> LedgerResult<()> {
        self.entries.insert(entry.id.as_bytes(), encode(entry)?)?;
        Ok(())
    }

    fn load_queue(&self, wallet_id: &str) -> LedgerResult<CreditQueue> {
        match self.queues.get(wallet_id.as_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Ok(CreditQueue::new()),
        }
    }

    fn save_queue(&mut self, wallet_id: &str, queue: &CreditQueue) -> LedgerResult<()> {
        self.queues.insert(wallet_id.as_bytes(), encode(queue)?)?;
        Ok(())
    }

    fn next_sequence(&mut self) -> LedgerResult<u64> {
        Ok(self.entries.generate_id()?)
    }
}

/// Hands transactional storage errors (conflicts in particular) back to
/// sled so it can retry; everything else aborts the transaction.
fn into_conflictable(err: LedgerError) -> ConflictableTransactionError<LedgerError> {
    match err {
        LedgerError::Store(StoreError::Transaction(e)) => e.into(),
        other => ConflictableTransactionError::Abort(other),
    }
}

impl Store for SledStore {
    fn atomically<R, F>(&self, op: F) -> LedgerResult<R>
    where
        F: Fn(&mut dyn UnitOfWork) -> LedgerResult<R>,
    {
        let result = (&self.wallets, &self.entries, &self.queues).transaction(
            |(wallets, entries, queues)| {
                let mut unit = SledUnit {
                    wallets,
                    entries,
                    queues,
                };
                op(&mut unit).map_err(into_conflictable)
            },
        );

        match result {
            Ok(value) => Ok(value),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    fn wallet(&self, wallet_id: &str) -> LedgerResult<Option<Wallet>> {
        self.wallets
            .get(wallet_id.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn wallets(&self) -> LedgerResult<Vec<Wallet>> {
        let mut wallets = Vec::with_capacity(self.wallets.len());
        for item in self.wallets.iter() {
            let (_key, value) = item?;
            wallets.push(decode(&value)?);
        }
        Ok(wallets)
    }

    fn entries(&self) -> LedgerResult<Vec<Transaction>> {
        let mut entries = Vec::with_capacity(self.entries.len());
        for item in self.entries.iter() {
            let (_key, value) = item?;
            entries.push(decode(&value)?);
        }
        newest_first(&mut entries);
        Ok(entries)
    }

    fn wallet_count(&self) -> LedgerResult<usize> {
        Ok(self.wallets.len())
    }

    fn flush(&self) -> LedgerResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use crate::wallet::WalletStore;
    use chrono::Utc;

    #[test]
    fn open_temporary_database() {
        let store = SledStore::open_temporary().expect("should create temp db");
        assert_eq!(store.wallet_count().unwrap(), 0);
        assert_eq!(store.entry_count(), 0);
    }

    #[test]
    fn committed_unit_writes_all_trees() {
        let store = SledStore::open_temporary().unwrap();
        store
            .atomically(|uow| {
                uow.create_if_absent("alice")?;
                uow.apply_delta("alice", 250)?;
                uow.append(Transaction::mint("alice", 250, Utc::now()))?;
                Ok(())
            })
            .unwrap();

        assert_eq!(store.wallet("alice").unwrap().unwrap().balance, 250);
        assert_eq!(store.entry_count(), 1);

        let queued = store.atomically(|uow| uow.unspent_credits_for("alice")).unwrap();
        assert_eq!(queued.len(), 1);
    }

    #[test]
    fn aborted_unit_leaves_no_trace() {
        let store = SledStore::open_temporary().unwrap();
        let result: LedgerResult<()> = store.atomically(|uow| {
            uow.create_if_absent("alice")?;
            uow.append(Transaction::mint("alice", 10, Utc::now()))?;
            Err(LedgerError::InvalidAmount(-1))
        });

        assert!(matches!(result, Err(LedgerError::InvalidAmount(-1))));
        assert_eq!(store.wallet_count().unwrap(), 0);
        assert_eq!(store.entry_count(), 0);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = SledStore::open(dir.path()).expect("should open db");
            store
                .atomically(|uow| {
                    uow.create_if_absent("alice")?;
                    uow.apply_delta("alice", 99)
                })
                .unwrap();
            store.flush().unwrap();
        }

        let reopened = SledStore::open(dir.path()).expect("should reopen db");
        assert_eq!(reopened.wallet("alice").unwrap().unwrap().balance, 99);
    }

    #[test]
    fn sequences_increase_across_units() {
        let store = SledStore::open_temporary().unwrap();
        let a = store.atomically(|uow| uow.next_sequence()).unwrap();
        let b = store.atomically(|uow| uow.next_sequence()).unwrap();
        assert!(b > a);
    }

    #[test]
    fn entries_listed_newest_first() {
        let store = SledStore::open_temporary().unwrap();
        let now = Utc::now();
        store
            .atomically(|uow| {
                uow.append(Transaction::mint("a", 1, now - chrono::Duration::hours(2)))?;
                uow.append(Transaction::mint("a", 2, now))?;
                uow.append(Transaction::mint("a", 3, now - chrono::Duration::hours(1)))?;
                Ok(())
            })
            .unwrap();

        let amounts: Vec<i64> = store.entries().unwrap().iter().map(|e| e.amount).collect();
        assert_eq!(amounts, vec![2, 3, 1]);
    }

    #[test]
    fn concurrent_units_serialize() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(SledStore::open_temporary().unwrap());
        store.atomically(|uow| uow.create_if_absent("counter")).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..25 {
                        store.atomically(|uow| uow.apply_delta("counter", 1)).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("writer thread should not panic");
        }

        assert_eq!(store.wallet("counter").unwrap().unwrap().balance, 100);
    }
}
