// 8.0.2: result types and errors for engine operations.

use crate::config::ConfigError;
use crate::exchange::{ExchangeRequest, TransitionError};
use crate::ledger::LedgerError;
use crate::store::StoreError;
use crate::types::{DisputeId, ExchangeId, ItemId, Points, UserId};
use crate::valuation::Valuation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of an owner-triggered recalculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revaluation {
    pub item_id: ItemId,
    pub previous: Points,
    pub current: Points,
    pub valuation: Valuation,
}

impl Revaluation {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangePage {
    /// newest first
    pub exchanges: Vec<ExchangeRequest>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

/// The record a lookup failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Entity {
    User(UserId),
    Item(ItemId),
    Exchange(ExchangeId),
    Dispute(DisputeId),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::User(id) => write!(f, "{id}"),
            Entity::Item(id) => write!(f, "{id}"),
            Entity::Exchange(id) => write!(f, "{id}"),
            Entity::Dispute(id) => write!(f, "{id}"),
        }
    }
}

/// Flat error category, for callers that only branch on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    Unavailable,
    Forbidden,
    InvalidState,
    InsufficientFunds,
    CircularExchange,
    SelfTrade,
    DuplicateDispute,
    StorageUnavailable,
    DuplicateListing,
    InvalidAmount,
    InvalidConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(Entity),

    #[error("Item {0} is not available for exchange")]
    Unavailable(ItemId),

    #[error("{actor} may not {action}")]
    Forbidden { actor: UserId, action: &'static str },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Insufficient funds for {user_id}: required {required}, available {available}")]
    InsufficientFunds {
        user_id: UserId,
        required: Points,
        available: Points,
    },

    #[error("Request {requester} -> {owner} would close a cycle of pending exchanges")]
    CircularExchange { requester: UserId, owner: UserId },

    #[error("{0} cannot request their own item")]
    SelfTrade(UserId),

    #[error("Exchange {0} already has an open dispute")]
    DuplicateDispute(ExchangeId),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("{owner} already listed '{title}'")]
    DuplicateListing { owner: UserId, title: String },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Unavailable(_) => ErrorKind::Unavailable,
            EngineError::Forbidden { .. } => ErrorKind::Forbidden,
            EngineError::InvalidState(_) => ErrorKind::InvalidState,
            EngineError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            EngineError::CircularExchange { .. } => ErrorKind::CircularExchange,
            EngineError::SelfTrade(_) => ErrorKind::SelfTrade,
            EngineError::DuplicateDispute(_) => ErrorKind::DuplicateDispute,
            EngineError::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            EngineError::DuplicateListing { .. } => ErrorKind::DuplicateListing,
            EngineError::InvalidAmount(_) => ErrorKind::InvalidAmount,
            EngineError::Config(_) => ErrorKind::InvalidConfig,
        }
    }

    /// Storage failures are the only ones worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::StorageUnavailable
    }
}

impl From<LedgerError> for EngineError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds {
                user_id,
                required,
                available,
            } => EngineError::InsufficientFunds {
                user_id,
                required,
                available,
            },
            LedgerError::ZeroAmount | LedgerError::Overflow { .. } => EngineError::InvalidAmount(e.to_string()),
        }
    }
}

impl From<TransitionError> for EngineError {
    fn from(e: TransitionError) -> Self {
        EngineError::InvalidState(e.to_string())
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::StorageUnavailable(e.to_string())
    }
}
