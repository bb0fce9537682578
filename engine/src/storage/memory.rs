//! In-process store.
//!
//! All state sits behind one `parking_lot::Mutex`. A unit of work holds the
//! lock for its whole lifetime and writes into a staged overlay; the overlay
//! is folded into the committed maps only when the closure succeeds. Units
//! therefore run strictly one at a time, which is the strongest isolation
//! there is.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use super::{newest_first, Store, UnitOfWork};
use crate::error::LedgerResult;
use crate::ledger::{CreditQueue, Transaction};
use crate::wallet::Wallet;

#[derive(Debug, Default)]
struct Collections {
    wallets: BTreeMap<String, Wallet>,
    entries: HashMap<String, Transaction>,
    queues: HashMap<String, CreditQueue>,
}

#[derive(Debug, Default)]
struct MemoryState {
    committed: Collections,
    sequence: u64,
}

/// Memory-backed [`Store`]. Cheap to create; used by tests and by the node
/// when no data directory is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Overlay of uncommitted writes on top of the committed collections.
struct MemoryUnit<'a> {
    committed: &'a Collections,
    staged: Collections,
    sequence: u64,
}

impl UnitOfWork for MemoryUnit<'_> {
    fn load_wallet(&self, wallet_id: &str) -> LedgerResult<Option<Wallet>> {
        Ok(self
            .staged
            .wallets
            .get(wallet_id)
            .or_else(|| self.committed.wallets.get(wallet_id))
            .cloned())
    }

    fn save_wallet(&mut self, wallet: &Wallet) -> LedgerResult<()> {
        self.staged.wallets.insert(wallet.id.clone(), wallet.clone());
        Ok(())
    }

    fn load_entry(&self, entry_id: &str) -> LedgerResult<Option<Transaction>> {
        Ok(self
            .staged
            .entries
            .get(entry_id)
            .or_else(|| self.committed.entries.get(entry_id))
            .cloned())
    }

    fn save_entry(&mut self, entry: &Transaction) -> LedgerResult<()> {
        self.staged.entries.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    fn load_queue(&self, wallet_id: &str) -> LedgerResult<CreditQueue> {
        Ok(self
            .staged
            .queues
            .get(wallet_id)
            .or_else(|| self.committed.queues.get(wallet_id))
            .cloned()
            .unwrap_or_default())
    }

    fn save_queue(&mut self, wallet_id: &str, queue: &CreditQueue) -> LedgerResult<()> {
        self.staged.queues.insert(wallet_id.to_string(), queue.clone());
        Ok(())
    }

    fn next_sequence(&mut self) -> LedgerResult<u64> {
        self.sequence += 1;
        Ok(self.sequence)
    }
}

impl Store for MemoryStore {
    fn atomically<R, F>(&self, op: F) -> LedgerResult<R>
    where
        F: Fn(&mut dyn UnitOfWork) -> LedgerResult<R>,
    {
        let mut state = self.state.lock();

        let (result, staged, sequence) = {
            let mut unit = MemoryUnit {
                committed: &state.committed,
                staged: Collections::default(),
                sequence: state.sequence,
            };
            let result = op(&mut unit);
            (result, unit.staged, unit.sequence)
        };

        let value = result?;
        state.sequence = sequence;
        state.committed.wallets.extend(staged.wallets);
        state.committed.entries.extend(staged.entries);
        state.committed.queues.extend(staged.queues);
        Ok(value)
    }

    fn wallet(&self, wallet_id: &str) -> LedgerResult<Option<Wallet>> {
        Ok(self.state.lock().committed.wallets.get(wallet_id).cloned())
    }

    fn wallets(&self) -> LedgerResult<Vec<Wallet>> {
        Ok(self.state.lock().committed.wallets.values().cloned().collect())
    }

    fn entries(&self) -> LedgerResult<Vec<Transaction>> {
        let mut entries: Vec<Transaction> = self
            .state
            .lock()
            .committed
            .entries
            .values()
            .cloned()
            .collect();
        newest_first(&mut entries);
        Ok(entries)
    }

    fn wallet_count(&self) -> LedgerResult<usize> {
        Ok(self.state.lock().committed.wallets.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use chrono::Utc;

    #[test]
    fn empty_store_has_nothing() {
        let store = MemoryStore::new();
        assert!(store.wallets().unwrap().is_empty());
        assert!(store.entries().unwrap().is_empty());
        assert!(store.wallet("a").unwrap().is_none());
        assert_eq!(store.wallet_count().unwrap(), 0);
    }

    #[test]
    fn committed_writes_are_visible() {
        let store = MemoryStore::new();
        store
            .atomically(|uow| uow.save_wallet(&Wallet::new("a")))
            .unwrap();
        assert_eq!(store.wallet("a").unwrap().unwrap().id, "a");
    }

    #[test]
    fn failed_unit_leaves_no_trace() {
        let store = MemoryStore::new();
        let result: LedgerResult<()> = store.atomically(|uow| {
            uow.save_wallet(&Wallet::new("a"))?;
            uow.save_entry(&Transaction::mint("a", 5, Utc::now()))?;
            uow.next_sequence()?;
            Err(LedgerError::InvalidAmount(0))
        });
        assert!(result.is_err());
        assert!(store.wallets().unwrap().is_empty());
        assert!(store.entries().unwrap().is_empty());

        // The sequence counter was not advanced either.
        let seq = store.atomically(|uow| uow.next_sequence()).unwrap();
        assert_eq!(seq, 1);
    }

    #[test]
    fn reads_see_staged_writes() {
        let store = MemoryStore::new();
        let seen = store
            .atomically(|uow| {
                let mut wallet = Wallet::new("a");
                wallet.balance = 42;
                uow.save_wallet(&wallet)?;
                uow.load_wallet("a")
            })
            .unwrap();
        assert_eq!(seen.unwrap().balance, 42);
    }

    #[test]
    fn wallets_listed_in_id_order() {
        let store = MemoryStore::new();
        store
            .atomically(|uow| {
                uow.save_wallet(&Wallet::new("c"))?;
                uow.save_wallet(&Wallet::new("a"))?;
                uow.save_wallet(&Wallet::new("b"))
            })
            .unwrap();
        let ids: Vec<String> = store.wallets().unwrap().into_iter().map(|w| w.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
