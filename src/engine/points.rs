// 8.4 engine/points.rs: read side of the ledger plus the credit paths used by payment and
// moderation collaborators. every posting goes through Ledger::post, so the non-negative
// balance rule has exactly one enforcement point.

use super::core::{require_exchange, require_user, Engine};
use super::results::EngineError;
use crate::events::{EventPayload, PointsPostedEvent};
use crate::ledger::{BalanceDivergence, EntryCategory, LedgerEntry, LedgerFilter, LedgerPage, Posting, PointsSummary};
use crate::store::Store;
use crate::types::{ExchangeId, Points, UserId};

impl<S: Store> Engine<S> {
    pub fn balance(&self, user_id: UserId) -> Result<Points, EngineError> {
        self.store.read(|t| {
            require_user(t, user_id)?;
            Ok::<_, EngineError>(t.ledger().balance(user_id))
        })?
    }

    /// Newest first, optionally narrowed to one category.
    pub fn ledger_history(&self, user_id: UserId, filter: &LedgerFilter) -> Result<LedgerPage, EngineError> {
        let filter = LedgerFilter {
            category: filter.category,
            page: self.page_or_default(Some(filter.page)),
        };
        self.store.read(|t| {
            require_user(t, user_id)?;
            Ok::<_, EngineError>(t.ledger().history(user_id, &filter))
        })?
    }

    pub fn points_summary(&self, user_id: UserId) -> Result<PointsSummary, EngineError> {
        self.store.read(|t| {
            require_user(t, user_id)?;
            Ok::<_, EngineError>(t.ledger().summary(user_id))
        })?
    }

    /// Positive credit from outside the trade flow: a purchase, a bonus, a refund.
    pub fn credit_points(
        &self,
        user_id: UserId,
        amount: Points,
        category: EntryCategory,
        description: &str,
    ) -> Result<LedgerEntry, EngineError> {
        if !amount.is_negative() && !amount.is_zero() && category != EntryCategory::Redeemed {
            return self.post(Posting::new(user_id, amount, category, description));
        }
        Err(EngineError::InvalidAmount(format!(
            "credits must be positive and not redeemed, got {amount} as {category:?}"
        )))
    }

    /// Signed entry, e.g. a compensating adjustment after a dispute. Debits are still
    /// refused when they would overdraw the user.
    pub fn post_entry(
        &self,
        user_id: UserId,
        amount: Points,
        category: EntryCategory,
        description: &str,
        related_exchange: Option<ExchangeId>,
    ) -> Result<LedgerEntry, EngineError> {
        let mut posting = Posting::new(user_id, amount, category, description);
        if let Some(exchange_id) = related_exchange {
            posting = posting.for_exchange(exchange_id);
        }
        self.post(posting)
    }

    /// Users whose cached balance disagrees with the sum of their entries.
    pub fn verify_ledger(&self) -> Result<Vec<BalanceDivergence>, EngineError> {
        let divergences = self.store.read(|t| t.ledger().verify())?;
        for d in &divergences {
            tracing::error!(user = %d.user_id, cached = %d.cached, derived = %d.derived, "ledger divergence");
        }
        Ok(divergences)
    }

    fn post(&self, posting: Posting) -> Result<LedgerEntry, EngineError> {
        let now = self.time();
        let user_id = posting.user_id;

        let (entry, new_balance) = self.store.transact(|t| {
            require_user(t, user_id)?;
            if let Some(exchange_id) = posting.related_exchange {
                require_exchange(t, exchange_id)?;
            }
            let entry = t.ledger_mut().post(posting, now)?;
            Ok::<_, EngineError>((entry, t.ledger().balance(user_id)))
        })?;

        self.emit_event(EventPayload::PointsPosted(PointsPostedEvent {
            entry_id: entry.id,
            user_id,
            amount: entry.amount,
            category: entry.category,
            new_balance,
        }));
        tracing::info!(
            user = %user_id,
            amount = %entry.amount,
            category = ?entry.category,
            balance = %new_balance,
            "points posted"
        );
        Ok(entry)
    }
}
