// swap-core: peer-to-peer goods-exchange marketplace core.
// integrity-first architecture: no trade settles without the ledger, no cycle of pending
// trades is ever admitted, and every price is reproducible from its inputs.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: UserId, ItemId, Points, Condition, Timestamp
//   2.x  item.rs: items and their custody history
//   3.x  valuation.rs: valuation formula: condition, demand, rarity
//   3.5  oracle.rs: optional pricing oracle, time-bounded
//   4.x  cycle.rs: obligation graph and cycle guard
//   5.x  ledger.rs: append-only point ledger, summaries, audit
//   6.x  exchange.rs: exchange lifecycle table, disputes
//   7.x  config.rs: valuation params, rewards, env presets, TOML loading
//   8.x  engine/: core engine: listing, exchanges, settlement, points
//   9.x  store.rs: transactional tables, in-memory store
//   10.x notify.rs: availability alerts
//   11.x events.rs: state transition events for audit

// domain modules
pub mod cycle;
pub mod engine;
pub mod events;
pub mod exchange;
pub mod item;
pub mod ledger;
pub mod types;
pub mod valuation;

// integration modules
pub mod config;
pub mod notify;
pub mod oracle;
pub mod store;

// re exports for convenience
pub use config::{ConfigError, Environment, MarketplaceConfig, RewardConfig};
pub use cycle::*;
pub use engine::*;
pub use events::*;
pub use exchange::*;
pub use item::*;
pub use ledger::*;
pub use notify::{AlertLog, AvailabilityAlert, Notifier, NullNotifier};
pub use oracle::{BoundedOracle, OracleConfig, OracleError, PricingOracle, PricingQuery, StaticOracle};
pub use store::{Fault, MemoryStore, Store, StoreError, Tables, UserRecord};
pub use types::*;
pub use valuation::{BaseSource, ConditionTable, DemandSignals, Valuation, ValuationParams};
