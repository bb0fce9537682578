//! End-to-end tests for the Tally engine.
//!
//! Every scenario runs twice: once on the in-process `MemoryStore` and once
//! on a temporary `SledStore`. Each test builds its own store, so there is
//! no shared state and no ordering dependency between tests.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{DateTime, Duration, TimeZone, Utc};

use tally_engine::config::{DEMO_GRANTS, DEMO_REPLAY};
use tally_engine::processor::covered;
use tally_engine::{
    LedgerError, MemoryStore, PointDeduction, SledStore, Store, Transaction, Transfer,
    TransactionProcessor,
};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const A: &str = DEMO_GRANTS[0].0;
const B: &str = DEMO_GRANTS[1].0;
const C: &str = DEMO_GRANTS[2].0;
const D: &str = DEMO_GRANTS[3].0;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 10, 1, 11, 0, 0).unwrap()
}

fn memory_processor() -> TransactionProcessor<MemoryStore> {
    TransactionProcessor::new(MemoryStore::new())
}

fn sled_processor() -> TransactionProcessor<SledStore> {
    TransactionProcessor::new(SledStore::open_temporary().expect("temp db"))
}

/// Mints the four demo grants at `t0`.
fn seed<S: Store>(p: &TransactionProcessor<S>) {
    for (wallet, amount) in DEMO_GRANTS {
        p.mint_points(wallet, amount, Some(t0())).unwrap();
    }
}

fn balance<S: Store>(p: &TransactionProcessor<S>, id: &str) -> i64 {
    p.wallet(id).unwrap().expect("wallet should exist").balance
}

fn entry<S: Store>(p: &TransactionProcessor<S>, id: &str) -> Transaction {
    p.ledger()
        .unwrap()
        .into_iter()
        .find(|e| e.id == id)
        .expect("entry should exist")
}

fn assert_consistent<S: Store>(p: &TransactionProcessor<S>) {
    let report = p.audit().unwrap();
    assert!(report.is_consistent(), "audit failed: {report:?}");
}

/// Runs a scenario on both backends.
macro_rules! on_both_backends {
    ($scenario:ident) => {
        mod $scenario {
            #[test]
            fn memory() {
                super::$scenario(super::memory_processor());
            }

            #[test]
            fn sled() {
                super::$scenario(super::sled_processor());
            }
        }
    };
}

// ---------------------------------------------------------------------------
// 1. Seeding
// ---------------------------------------------------------------------------

fn seeding_sets_balances<S: Store>(p: TransactionProcessor<S>) {
    seed(&p);

    assert_eq!(balance(&p, A), 2_500);
    assert_eq!(balance(&p, B), 200);
    assert_eq!(balance(&p, C), 15_300);
    assert_eq!(balance(&p, D), 0);

    // The zero grant creates a wallet but no entry.
    assert_eq!(p.ledger().unwrap().len(), 3);
    assert_eq!(p.balances().unwrap().len(), 4);
    assert_consistent(&p);
}
on_both_backends!(seeding_sets_balances);

// ---------------------------------------------------------------------------
// 2. Simple Transfer
// ---------------------------------------------------------------------------

fn transfer_draws_down_grant<S: Store>(p: TransactionProcessor<S>) {
    seed(&p);
    let mint_id = p
        .ledger()
        .unwrap()
        .into_iter()
        .find(|e| e.debit_wallet_id.as_deref() == Some(A))
        .unwrap()
        .id;

    let deductions = p
        .process_transfer(&Transfer::new(A, D, 1_000, t0() + Duration::days(31)))
        .unwrap();

    assert_eq!(
        deductions,
        vec![PointDeduction {
            wallet_id: A.to_string(),
            points: 1_000
        }]
    );
    assert_eq!(balance(&p, A), 1_500);
    assert_eq!(balance(&p, D), 1_000);

    let newest = &p.ledger().unwrap()[0];
    assert_eq!(newest.credit_wallet_id.as_deref(), Some(A));
    assert_eq!(newest.debit_wallet_id.as_deref(), Some(D));
    assert_eq!(newest.amount, 1_000);
    assert_eq!(newest.spent_amount, 0);

    assert_eq!(entry(&p, &mint_id).spent_amount, 1_000);
    assert_consistent(&p);
}
on_both_backends!(transfer_draws_down_grant);

// ---------------------------------------------------------------------------
// 3. Insufficient Funds
// ---------------------------------------------------------------------------

fn overdraft_rejected_without_effect<S: Store>(p: TransactionProcessor<S>) {
    seed(&p);
    let ledger_before = p.ledger().unwrap();
    let balances_before = p.balances().unwrap();

    let result = p.process_transfer(&Transfer::new(B, D, 5_000, t0() + Duration::days(1)));

    assert!(matches!(
        result,
        Err(LedgerError::InsufficientFunds {
            available: 200,
            requested: 5_000,
            ..
        })
    ));
    assert_eq!(p.ledger().unwrap(), ledger_before);
    assert_eq!(p.balances().unwrap(), balances_before);
}
on_both_backends!(overdraft_rejected_without_effect);

// ---------------------------------------------------------------------------
// 4. FIFO Across Several Grants
// ---------------------------------------------------------------------------

fn oldest_grant_exhausted_first<S: Store>(p: TransactionProcessor<S>) {
    p.create_wallet(D).unwrap();
    p.mint_points(A, 1_000, Some(t0())).unwrap();
    p.mint_points(A, 1_000, Some(t0() + Duration::days(1))).unwrap();
    p.mint_points(A, 1_000, Some(t0() + Duration::days(2))).unwrap();

    let mut grants: Vec<Transaction> = p.ledger().unwrap();
    grants.reverse();
    let ids: Vec<String> = grants.iter().map(|g| g.id.clone()).collect();

    let first = p
        .process_transfer(&Transfer::new(A, D, 300, t0() + Duration::days(3)))
        .unwrap();
    assert_eq!(covered(&first), 300);
    assert_eq!(entry(&p, &ids[0]).spent_amount, 300);
    assert_eq!(entry(&p, &ids[1]).spent_amount, 0);

    let second = p
        .process_transfer(&Transfer::new(A, D, 1_500, t0() + Duration::days(4)))
        .unwrap();
    let points: Vec<i64> = second.iter().map(|d| d.points).collect();
    assert_eq!(points, vec![700, 800]);

    // The completing grant is drawn only as far as needed.
    assert_eq!(entry(&p, &ids[0]).spent_amount, 1_000);
    assert_eq!(entry(&p, &ids[1]).spent_amount, 800);
    assert_eq!(entry(&p, &ids[2]).spent_amount, 0);

    assert_eq!(balance(&p, A), 1_200);
    assert_eq!(balance(&p, D), 1_800);
    assert_consistent(&p);
}
on_both_backends!(oldest_grant_exhausted_first);

fn equal_timestamps_follow_insertion_order<S: Store>(p: TransactionProcessor<S>) {
    p.create_wallet(D).unwrap();
    p.mint_points(A, 100, Some(t0())).unwrap();
    p.mint_points(A, 200, Some(t0())).unwrap();

    let mut grants = p.ledger().unwrap();
    grants.sort_by_key(|g| g.sequence);

    p.process_transfer(&Transfer::new(A, D, 150, t0() + Duration::hours(1)))
        .unwrap();

    assert_eq!(entry(&p, &grants[0].id).spent_amount, 100);
    assert_eq!(entry(&p, &grants[1].id).spent_amount, 50);
}
on_both_backends!(equal_timestamps_follow_insertion_order);

fn received_transfers_are_spent_in_order<S: Store>(p: TransactionProcessor<S>) {
    seed(&p);
    p.process_transfer(&Transfer::new(C, D, 400, t0() + Duration::days(1)))
        .unwrap();
    p.process_transfer(&Transfer::new(A, D, 600, t0() + Duration::days(2)))
        .unwrap();

    let deductions = p
        .process_transfer(&Transfer::new(D, B, 700, t0() + Duration::days(3)))
        .unwrap();

    assert_eq!(
        deductions,
        vec![
            PointDeduction {
                wallet_id: C.to_string(),
                points: 400
            },
            PointDeduction {
                wallet_id: A.to_string(),
                points: 300
            },
        ]
    );
    assert_eq!(balance(&p, D), 300);
    assert_eq!(balance(&p, B), 900);
    assert_consistent(&p);
}
on_both_backends!(received_transfers_are_spent_in_order);

fn out_of_order_arrivals_are_spent_by_timestamp<S: Store>(p: TransactionProcessor<S>) {
    seed(&p);
    for (source, recipient, points, timestamp) in DEMO_REPLAY {
        let timestamp = DateTime::parse_from_rfc3339(timestamp)
            .unwrap()
            .with_timezone(&Utc);
        p.process_transfer(&Transfer::new(source, recipient, points, timestamp))
            .unwrap();
    }

    assert_eq!(balance(&p, A), 1_000);
    assert_eq!(balance(&p, B), 0);
    assert_eq!(balance(&p, C), 5_300);
    assert_eq!(balance(&p, D), 11_700);

    // The 10-31T10:00 credit from A arrived last but is the oldest.
    let oldest = Utc.with_ymd_and_hms(2021, 10, 31, 10, 0, 0).unwrap();
    let oldest_id = p
        .ledger()
        .unwrap()
        .into_iter()
        .find(|e| e.timestamp == oldest)
        .expect("replayed credit")
        .id;

    let deductions = p.burn_points(D, 400).unwrap();
    assert_eq!(
        deductions,
        vec![
            PointDeduction {
                wallet_id: A.to_string(),
                points: 300
            },
            PointDeduction {
                wallet_id: B.to_string(),
                points: 100
            },
        ]
    );
    assert_eq!(entry(&p, &oldest_id).spent_amount, 300);
    assert_eq!(balance(&p, D), 11_300);
    assert_consistent(&p);
}
on_both_backends!(out_of_order_arrivals_are_spent_by_timestamp);

// ---------------------------------------------------------------------------
// 5. Concurrency
// ---------------------------------------------------------------------------

fn racing_transfers_one_wins<S: Store + 'static>(p: TransactionProcessor<S>) {
    p.mint_points(A, 1_500, Some(t0())).unwrap();
    p.create_wallet(B).unwrap();
    p.create_wallet(D).unwrap();

    let p = Arc::new(p);
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = [B, D]
        .into_iter()
        .map(|recipient| {
            let p = Arc::clone(&p);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                p.process_transfer(&Transfer::new(A, recipient, 1_500, t0() + Duration::days(1)))
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("transfer thread should not panic"))
        .collect();

    let wins = results.iter().filter(|r| r.is_ok()).count();
    let losses = results
        .iter()
        .filter(|r| matches!(r, Err(LedgerError::InsufficientFunds { .. })))
        .count();
    assert_eq!(wins, 1);
    assert_eq!(losses, 1);

    assert_eq!(balance(&p, A), 0);
    assert_eq!(balance(&p, B) + balance(&p, D), 1_500);
    assert_consistent(&p);
}
on_both_backends!(racing_transfers_one_wins);

fn concurrent_traffic_conserves_points<S: Store + 'static>(p: TransactionProcessor<S>) {
    const WALLETS: [&str; 4] = ["w0", "w1", "w2", "w3"];
    for wallet in WALLETS {
        p.mint_points(wallet, 1_000, Some(t0())).unwrap();
    }

    let p = Arc::new(p);
    let handles: Vec<_> = (0..WALLETS.len())
        .map(|i| {
            let p = Arc::clone(&p);
            thread::spawn(move || {
                for round in 0..20i64 {
                    let source = WALLETS[i];
                    let recipient = WALLETS[(i + 1 + round as usize) % WALLETS.len()];
                    if source == recipient {
                        continue;
                    }
                    let ts = t0() + Duration::minutes(round);
                    // Overdrafts are expected under contention; anything else is a bug.
                    match p.process_transfer(&Transfer::new(source, recipient, 37 + round, ts)) {
                        Ok(_) | Err(LedgerError::InsufficientFunds { .. }) => {}
                        Err(e) => panic!("unexpected failure: {e}"),
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("traffic thread should not panic");
    }

    let total: i64 = p.balances().unwrap().values().sum();
    assert_eq!(total, 4_000);
    assert!(p.balances().unwrap().values().all(|b| *b >= 0));
    assert_consistent(&p);
}
on_both_backends!(concurrent_traffic_conserves_points);

// ---------------------------------------------------------------------------
// 6. Burns and Idempotent Wallet Creation
// ---------------------------------------------------------------------------

fn burn_then_transfer<S: Store>(p: TransactionProcessor<S>) {
    seed(&p);
    let burned = p.burn_points(C, 15_000).unwrap();
    assert_eq!(covered(&burned), 15_000);
    assert_eq!(balance(&p, C), 300);

    let result = p.process_transfer(&Transfer::new(C, D, 301, t0() + Duration::days(1)));
    assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));

    p.process_transfer(&Transfer::new(C, D, 300, t0() + Duration::days(1)))
        .unwrap();
    assert_eq!(balance(&p, C), 0);
    assert_consistent(&p);
}
on_both_backends!(burn_then_transfer);

fn create_wallet_twice_is_harmless<S: Store>(p: TransactionProcessor<S>) {
    let first = p.create_wallet("fresh").unwrap();
    p.mint_points("fresh", 10, None).unwrap();
    let second = p.create_wallet("fresh").unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.created_at, second.created_at);
    assert_eq!(second.balance, 10);
}
on_both_backends!(create_wallet_twice_is_harmless);

// ---------------------------------------------------------------------------
// 7. Persistence
// ---------------------------------------------------------------------------

#[test]
fn sled_ledger_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let p = TransactionProcessor::new(SledStore::open(dir.path()).expect("open db"));
        seed(&p);
        p.process_transfer(&Transfer::new(A, D, 1_000, t0() + Duration::days(1)))
            .unwrap();
        p.store().flush().unwrap();
    }

    let p = TransactionProcessor::new(SledStore::open(dir.path()).expect("reopen db"));
    assert_eq!(balance(&p, A), 1_500);
    assert_eq!(balance(&p, D), 1_000);
    assert_consistent(&p);

    // FIFO state was persisted too: the next spend continues the same grant.
    let deductions = p
        .process_transfer(&Transfer::new(A, B, 1_500, t0() + Duration::days(2)))
        .unwrap();
    assert_eq!(covered(&deductions), 1_500);
    assert_eq!(balance(&p, A), 0);
}
