//! Point ledger.
//!
//! Append-only record of signed point movements. A user's balance is the sum of
//! their entries; the ledger keeps a cached counter per user for fast reads and
//! refuses any debit that would take that sum below zero. Entries are never
//! edited or removed. Corrections are new, offsetting entries.

use crate::store::{AppendLog, Rows};
use crate::types::{EntryId, ExchangeId, PageRequest, Points, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryCategory {
    Earned,
    Redeemed,
    Purchased,
    Refunded,
    Bonus,
}

impl EntryCategory {
    /// Categories counted as income in a points summary.
    pub fn is_income(&self) -> bool {
        matches!(self, EntryCategory::Earned | EntryCategory::Purchased | EntryCategory::Bonus)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub user_id: UserId,
    pub amount: Points,
    pub category: EntryCategory,
    pub description: String,
    pub related_exchange: Option<ExchangeId>,
    pub created_at: Timestamp,
}

/// A posting request. The ledger assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub user_id: UserId,
    pub amount: Points,
    pub category: EntryCategory,
    pub description: String,
    pub related_exchange: Option<ExchangeId>,
}

impl Posting {
    pub fn new(user_id: UserId, amount: Points, category: EntryCategory, description: impl Into<String>) -> Self {
        Self {
            user_id,
            amount,
            category,
            description: description.into(),
            related_exchange: None,
        }
    }

    pub fn for_exchange(mut self, exchange_id: ExchangeId) -> Self {
        self.related_exchange = Some(exchange_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerFilter {
    pub category: Option<EntryCategory>,
    pub page: PageRequest,
}

impl Default for LedgerFilter {
    fn default() -> Self {
        Self {
            category: None,
            page: PageRequest::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerPage {
    /// newest first
    pub entries: Vec<LedgerEntry>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub current_balance: Points,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsSummary {
    pub user_id: UserId,
    pub balance: Points,
    /// earned + purchased + bonus
    pub total_earned: Points,
    /// absolute value of all redemptions
    pub total_redeemed: Points,
    pub total_purchased: Points,
}

/// A user whose cached balance disagrees with the sum of their entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDivergence {
    pub user_id: UserId,
    pub cached: Points,
    pub derived: Points,
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    entries: AppendLog<LedgerEntry>,
    balances: Rows<UserId, Points>,
    next_entry_id: u64,
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            entries: AppendLog::default(),
            balances: Rows::default(),
            next_entry_id: 1,
        }
    }

    /// Append one entry. Debits that would overdraw the user are refused.
    pub fn post(&mut self, posting: Posting, at: Timestamp) -> Result<LedgerEntry, LedgerError> {
        if posting.amount.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }

        let current = self.balance(posting.user_id);
        let next = current.checked_add(posting.amount).ok_or(LedgerError::Overflow {
            user_id: posting.user_id,
            balance: current,
            amount: posting.amount,
        })?;
        if next.is_negative() {
            return Err(LedgerError::InsufficientFunds {
                user_id: posting.user_id,
                required: posting.amount.abs(),
                available: current,
            });
        }

        let entry = LedgerEntry {
            id: EntryId(self.next_entry_id.max(1)),
            user_id: posting.user_id,
            amount: posting.amount,
            category: posting.category,
            description: posting.description,
            related_exchange: posting.related_exchange,
            created_at: at,
        };
        self.next_entry_id = entry.id.0 + 1;
        self.balances.insert(posting.user_id, next);
        self.entries.push(entry.clone());
        Ok(entry)
    }

    pub fn balance(&self, user_id: UserId) -> Points {
        self.balances.get(&user_id).copied().unwrap_or_default()
    }

    /// Balance recomputed from entries, ignoring the cache.
    pub fn derived_balance(&self, user_id: UserId) -> Points {
        self.entries_for(user_id).map(|e| e.amount).sum()
    }

    pub fn entries_for(&self, user_id: UserId) -> impl Iterator<Item = &LedgerEntry> + '_ {
        self.entries.iter().filter(move |e| e.user_id == user_id)
    }

    pub fn entries_for_exchange(&self, exchange_id: ExchangeId) -> impl Iterator<Item = &LedgerEntry> + '_ {
        self.entries
            .iter()
            .filter(move |e| e.related_exchange == Some(exchange_id))
    }

    /// Oldest first.
    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &LedgerEntry> + '_ {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn history(&self, user_id: UserId, filter: &LedgerFilter) -> LedgerPage {
        let matching: Vec<&LedgerEntry> = self
            .entries_for(user_id)
            .filter(|e| filter.category.map_or(true, |c| e.category == c))
            .collect();
        let total = matching.len();

        // entries are appended in time order, so reverse iteration is newest first
        let entries = matching
            .into_iter()
            .rev()
            .skip(filter.page.offset())
            .take(filter.page.page_size)
            .cloned()
            .collect();

        LedgerPage {
            entries,
            total,
            page: filter.page.page,
            page_size: filter.page.page_size,
            total_pages: filter.page.total_pages(total),
            current_balance: self.balance(user_id),
        }
    }

    pub fn summary(&self, user_id: UserId) -> PointsSummary {
        let mut total_earned = Points::zero();
        let mut total_redeemed = Points::zero();
        let mut total_purchased = Points::zero();

        for entry in self.entries_for(user_id) {
            if entry.category.is_income() {
                total_earned = total_earned.saturating_add(entry.amount);
            }
            match entry.category {
                EntryCategory::Redeemed => total_redeemed = total_redeemed.saturating_add(entry.amount),
                EntryCategory::Purchased => total_purchased = total_purchased.saturating_add(entry.amount),
                _ => {}
            }
        }

        PointsSummary {
            user_id,
            balance: self.balance(user_id),
            total_earned,
            total_redeemed: total_redeemed.abs(),
            total_purchased,
        }
    }

    /// Commits staged postings. Called by the store when a transaction commits.
    pub fn seal(&mut self) {
        self.entries.seal();
        self.balances.seal();
    }

    /// Users whose cached counter drifted from their entry sum. Empty when healthy.
    pub fn verify(&self) -> Vec<BalanceDivergence> {
        let mut derived: HashMap<UserId, Points> = HashMap::new();
        for entry in self.entries.iter() {
            let slot = derived.entry(entry.user_id).or_default();
            *slot = slot.saturating_add(entry.amount);
        }

        let mut users: Vec<UserId> = derived.keys().chain(self.balances.keys()).copied().collect();
        users.sort();
        users.dedup();

        users
            .into_iter()
            .filter_map(|user_id| {
                let cached = self.balance(user_id);
                let sum = derived.get(&user_id).copied().unwrap_or_default();
                (cached != sum).then_some(BalanceDivergence {
                    user_id,
                    cached,
                    derived: sum,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient funds for {user_id}: required {required}, available {available}")]
    InsufficientFunds {
        user_id: UserId,
        required: Points,
        available: Points,
    },

    #[error("Ledger entries must move a non-zero amount")]
    ZeroAmount,

    #[error("Posting {amount} to {user_id} overflows balance {balance}")]
    Overflow {
        user_id: UserId,
        balance: Points,
        amount: Points,
    },
}
