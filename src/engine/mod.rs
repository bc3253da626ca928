// 8.0: marketplace engine. coordinates listing and valuation, exchange requests, settlement
// through the ledger, and disputes. every state change is one store transaction; collaborators
// (oracle, notifier) are only called outside it.

mod config;
mod core;
mod exchanges;
mod points;
mod results;
mod valuation;

pub use config::EngineConfig;
pub use core::Engine;
pub use results::{EngineError, Entity, ErrorKind, ExchangePage, Revaluation};
