//! # Engine Configuration & Defaults
//!
//! Constants shared between the engine and the node binary. Network ports,
//! storage tree names, the trusted-mint header and the demo data all
//! live here so nobody has to grep for magic numbers.

/// Version of the engine crate, reported by `tally-node version`.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// Network Parameters
// ---------------------------------------------------------------------------

/// Default port for the REST gateway.
pub const DEFAULT_API_PORT: u16 = 9840;

/// Default port for the Prometheus metrics endpoint.
pub const DEFAULT_METRICS_PORT: u16 = 9842;

/// Header a trusted caller must present to mint points through the gateway.
pub const MINT_KEY_HEADER: &str = "x-mint-key";

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// sled tree holding `bincode(Wallet)` keyed by wallet id.
pub const WALLETS_TREE: &str = "wallets";

/// sled tree holding `bincode(Transaction)` keyed by entry id.
pub const ENTRIES_TREE: &str = "entries";

/// sled tree holding `bincode(CreditQueue)` keyed by recipient wallet id.
pub const CREDIT_QUEUES_TREE: &str = "credit_queues";

// ---------------------------------------------------------------------------
// Demo Seed
// ---------------------------------------------------------------------------

/// Timestamp (RFC 3339) of the demo grants minted by `tally-node run --seed-demo`.
pub const DEMO_SEED_TIMESTAMP: &str = "2021-10-01T11:00:00Z";

/// Wallets and grant sizes minted by `--seed-demo`.
pub const DEMO_GRANTS: [(&str, i64); 4] = [
    ("8c18b5bf-0171-4918-a611-bde754382f7a", 2_500),
    ("21f51c05-e556-41f1-9cc9-0a314bb2ebcc", 200),
    ("d5af01f0-515a-4834-ab4e-a2f54aeaedbf", 15_300),
    ("363a3f19-7fa9-4e34-851d-6e42ef92a285", 0),
];

/// Transfers replayed by `--replay-demo` after the seed, as
/// `(source, recipient, points, timestamp)`. Deliberately submitted out of
/// timestamp order: the earliest credit arrives last.
pub const DEMO_REPLAY: [(&str, &str, i64, &str); 5] = [
    (DEMO_GRANTS[0].0, DEMO_GRANTS[3].0, 1_000, "2021-11-02T14:00:00Z"),
    (DEMO_GRANTS[1].0, DEMO_GRANTS[3].0, 200, "2021-10-31T11:00:00Z"),
    (DEMO_GRANTS[0].0, DEMO_GRANTS[3].0, 200, "2021-10-31T15:00:00Z"),
    (DEMO_GRANTS[2].0, DEMO_GRANTS[3].0, 10_000, "2021-11-01T14:00:00Z"),
    (DEMO_GRANTS[0].0, DEMO_GRANTS[3].0, 300, "2021-10-31T10:00:00Z"),
];
