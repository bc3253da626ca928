// 6.0: exchange requests and disputes. the status enum is the whole lifecycle; every move goes
// through the transition table below, nothing flips a status field directly.
//
//   PENDING ──approve──▶ APPROVED ──settle──▶ COMPLETED
//      │                    │                    │
//      ├──reject──▶ REJECTED└──────dispute───────┴──▶ DISPUTED
//      └──cancel──▶ CANCELLED

use crate::types::{DisputeId, ExchangeId, ItemId, Points, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeStatus {
    Pending,
    Approved,
    Completed,
    Rejected,
    Cancelled,
    Disputed,
}

/// 6.1: every legal (from, to) pair. anything not listed is an invalid transition.
const TRANSITIONS: &[(ExchangeStatus, ExchangeStatus)] = &[
    (ExchangeStatus::Pending, ExchangeStatus::Approved),
    (ExchangeStatus::Pending, ExchangeStatus::Rejected),
    (ExchangeStatus::Pending, ExchangeStatus::Cancelled),
    (ExchangeStatus::Approved, ExchangeStatus::Completed),
    (ExchangeStatus::Approved, ExchangeStatus::Disputed),
    (ExchangeStatus::Completed, ExchangeStatus::Disputed),
];

impl ExchangeStatus {
    pub fn can_transition_to(self, next: ExchangeStatus) -> bool {
        TRANSITIONS.iter().any(|&(from, to)| from == self && to == next)
    }

    pub fn transition(self, next: ExchangeStatus) -> Result<ExchangeStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError { from: self, to: next })
        }
    }

    /// Active requests hold their item and count as obligation edges.
    pub fn is_active(self) -> bool {
        matches!(self, ExchangeStatus::Pending | ExchangeStatus::Approved)
    }

    pub fn is_terminal(self) -> bool {
        !TRANSITIONS.iter().any(|&(from, _)| from == self)
    }

    pub fn label(self) -> &'static str {
        match self {
            ExchangeStatus::Pending => "pending",
            ExchangeStatus::Approved => "approved",
            ExchangeStatus::Completed => "completed",
            ExchangeStatus::Rejected => "rejected",
            ExchangeStatus::Cancelled => "cancelled",
            ExchangeStatus::Disputed => "disputed",
        }
    }
}

impl fmt::Display for ExchangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot move exchange from {from} to {to}")]
pub struct TransitionError {
    pub from: ExchangeStatus,
    pub to: ExchangeStatus,
}

/// 6.2: a request by `requester` for `owner`'s item. `points_cost` is frozen at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRequest {
    pub id: ExchangeId,
    pub item_id: ItemId,
    pub requester_id: UserId,
    pub owner_id: UserId,
    pub status: ExchangeStatus,
    pub points_cost: Points,
    pub message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl ExchangeRequest {
    pub fn new(
        id: ExchangeId,
        item_id: ItemId,
        requester_id: UserId,
        owner_id: UserId,
        points_cost: Points,
        message: Option<String>,
        at: Timestamp,
    ) -> Self {
        Self {
            id,
            item_id,
            requester_id,
            owner_id,
            status: ExchangeStatus::Pending,
            points_cost,
            message,
            created_at: at,
            updated_at: at,
            completed_at: None,
        }
    }

    pub fn advance(&mut self, next: ExchangeStatus, at: Timestamp) -> Result<(), TransitionError> {
        self.status = self.status.transition(next)?;
        self.updated_at = at;
        if next == ExchangeStatus::Completed {
            self.completed_at = Some(at);
        }
        Ok(())
    }

    pub fn involves(&self, user_id: UserId) -> bool {
        self.requester_id == user_id || self.owner_id == user_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    Resolved,
    Closed,
}

/// 6.3: a participant's complaint about a settled or approved exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    pub id: DisputeId,
    pub exchange_id: ExchangeId,
    pub reporter_id: UserId,
    pub reason: String,
    pub description: String,
    pub status: DisputeStatus,
    pub created_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
}

impl Dispute {
    pub fn open(
        id: DisputeId,
        exchange_id: ExchangeId,
        reporter_id: UserId,
        reason: &str,
        description: &str,
        at: Timestamp,
    ) -> Self {
        Self {
            id,
            exchange_id,
            reporter_id,
            reason: reason.to_string(),
            description: description.to_string(),
            status: DisputeStatus::Open,
            created_at: at,
            resolved_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == DisputeStatus::Open
    }

    /// Moderation outcome. Only an open dispute can be closed, and only to a final status.
    pub fn close(&mut self, outcome: DisputeStatus, at: Timestamp) -> bool {
        if !self.is_open() || outcome == DisputeStatus::Open {
            return false;
        }
        self.status = outcome;
        self.resolved_at = Some(at);
        true
    }
}
