//! Items and their custody history.
//!
//! An item has exactly one owner at a time. Its `available` flag is false while
//! a trade on it is active, and its `point_value` is only rewritten while it is
//! available, so an in-flight trade always settles at the price it was opened at.

use crate::types::{Condition, ItemId, Points, Timestamp, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub owner_id: UserId,
    pub title: String,
    pub author: String,
    pub condition: Condition,
    pub point_value: Points,
    pub available: bool,
    pub listed_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Item {
    pub fn new(
        id: ItemId,
        owner_id: UserId,
        title: &str,
        author: &str,
        condition: Condition,
        point_value: Points,
        at: Timestamp,
    ) -> Self {
        Self {
            id,
            owner_id,
            title: title.trim().to_string(),
            author: author.trim().to_string(),
            condition,
            point_value,
            available: true,
            listed_at: at,
            updated_at: at,
        }
    }

    /// Same work: title and author match ignoring case and surrounding spaces.
    pub fn same_work(&self, title: &str, author: &str) -> bool {
        self.title.eq_ignore_ascii_case(title.trim()) && self.author.eq_ignore_ascii_case(author.trim())
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.owner_id == user_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemAction {
    Listed,
    ExchangeRequested,
    OwnershipTransferred,
    ExchangeRejected,
    ExchangeCancelled,
    Revalued,
}

/// One line of an item's history. Survives ownership transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub item_id: ItemId,
    pub user_id: UserId,
    pub action: ItemAction,
    pub notes: String,
    pub at: Timestamp,
}
