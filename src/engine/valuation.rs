// 8.3 engine/valuation.rs: listing, pricing and the wishlist that feeds demand.
// the oracle is always consulted before a transaction opens, never while the store is locked.

use super::core::{require_item, require_user, Engine};
use super::results::{EngineError, Entity, Revaluation};
use crate::events::{EventPayload, ItemListedEvent, ItemRevaluedEvent, PointsPostedEvent};
use crate::item::{HistoryRecord, Item, ItemAction};
use crate::ledger::{EntryCategory, Posting};
use crate::oracle::{suggestion_or_fallback, PricingQuery};
use crate::store::Store;
use crate::types::{Condition, ItemId, Points, UserId};
use crate::valuation::{self, Valuation};

impl<S: Store> Engine<S> {
    pub fn item(&self, item_id: ItemId) -> Result<Item, EngineError> {
        self.store.read(|t| require_item(t, item_id).cloned())?
    }

    /// Oldest first. History survives ownership transfers.
    pub fn item_history(&self, item_id: ItemId) -> Result<Vec<HistoryRecord>, EngineError> {
        self.store.read(|t| {
            require_item(t, item_id)?;
            Ok::<_, EngineError>(t.history_for(item_id).cloned().collect())
        })?
    }

    fn oracle_suggestion(&self, title: &str, author: &str, condition: Condition) -> Option<i64> {
        let query = PricingQuery {
            title: title.to_string(),
            author: author.to_string(),
            condition,
        };
        suggestion_or_fallback(self.oracle.as_ref(), &query)
    }

    /// Price an item as the market stands now. Nothing is written.
    pub fn valuate(&self, item_id: ItemId) -> Result<Valuation, EngineError> {
        let (item, signals) = self.store.read(|t| {
            let item = require_item(t, item_id)?.clone();
            let signals = t.demand_signals(&item);
            Ok::<_, EngineError>((item, signals))
        })??;

        let suggestion = self.oracle_suggestion(&item.title, &item.author, item.condition);
        let result = valuation::valuate(&self.config.valuation, item.condition, &signals, suggestion);
        tracing::debug!(
            item = %item_id,
            points = %result.points,
            demand = %result.demand_score,
            rarity = %result.rarity_score,
            source = ?result.base_source,
            "valuation"
        );
        Ok(result)
    }

    /// List a new item for `owner`. The owner is paid the listing reward and the
    /// item gets its first valuation in the same transaction.
    pub fn list_item(
        &self,
        owner: UserId,
        title: &str,
        author: &str,
        condition: Condition,
    ) -> Result<Item, EngineError> {
        let suggestion = self.oracle_suggestion(title.trim(), author.trim(), condition);
        let reward = self.config.rewards.listing_reward;
        let now = self.time();

        let (item, valuation, reward_entry) = self.store.transact(|t| {
            require_user(t, owner)?;
            if t.items_owned_by(owner).any(|i| i.same_work(title, author)) {
                return Err(EngineError::DuplicateListing {
                    owner,
                    title: title.trim().to_string(),
                });
            }

            let item_id = t.next_item_id();
            let mut item = Item::new(item_id, owner, title, author, condition, Points::new(1), now);
            t.insert_item(item.clone());

            // copies are counted with the new item in place
            let signals = t.demand_signals(&item);
            let valuation = valuation::valuate(&self.config.valuation, condition, &signals, suggestion);
            item.point_value = valuation.points;
            t.insert_item(item.clone());

            t.record_history(HistoryRecord {
                item_id,
                user_id: owner,
                action: ItemAction::Listed,
                notes: format!("'{}' by {} listed", item.title, item.author),
                at: now,
            });

            let reward_entry = if reward.is_zero() {
                None
            } else {
                let posting = Posting::new(
                    owner,
                    reward,
                    EntryCategory::Earned,
                    format!("Earned {} for listing: {}", reward, item.title),
                );
                let entry = t.ledger_mut().post(posting, now)?;
                Some((entry, t.ledger().balance(owner)))
            };

            Ok::<_, EngineError>((item, valuation, reward_entry))
        })?;

        self.emit_event(EventPayload::ItemListed(ItemListedEvent {
            item_id: item.id,
            owner_id: owner,
            condition,
            point_value: item.point_value,
        }));
        if let Some((entry, new_balance)) = reward_entry {
            self.emit_event(EventPayload::PointsPosted(PointsPostedEvent {
                entry_id: entry.id,
                user_id: owner,
                amount: entry.amount,
                category: entry.category,
                new_balance,
            }));
        }
        tracing::info!(
            item = %item.id,
            owner = %owner,
            points = %item.point_value,
            source = ?valuation.base_source,
            "item listed"
        );
        Ok(item)
    }

    /// Owner-requested recalculation. Refused while a trade holds the item, so an
    /// in-flight request always settles at its snapshot price.
    pub fn recalculate(&self, item_id: ItemId, actor: UserId) -> Result<Revaluation, EngineError> {
        let item = self.item(item_id)?;
        check_revaluable(&item, actor)?;

        let suggestion = self.oracle_suggestion(&item.title, &item.author, item.condition);
        let now = self.time();

        let revaluation = self.store.transact(|t| {
            // re-check under the write lock: a request may have landed since the read
            let item = require_item(t, item_id)?.clone();
            check_revaluable(&item, actor)?;

            let signals = t.demand_signals(&item);
            let valuation = valuation::valuate(&self.config.valuation, item.condition, &signals, suggestion);
            let revaluation = Revaluation {
                item_id,
                previous: item.point_value,
                current: valuation.points,
                valuation,
            };

            if revaluation.changed() {
                let stored = t
                    .item_mut(item_id)
                    .ok_or(EngineError::NotFound(Entity::Item(item_id)))?;
                stored.point_value = revaluation.current;
                stored.updated_at = now;
                t.record_history(HistoryRecord {
                    item_id,
                    user_id: actor,
                    action: ItemAction::Revalued,
                    notes: format!("{} -> {}", revaluation.previous, revaluation.current),
                    at: now,
                });
            }
            Ok::<_, EngineError>(revaluation)
        })?;

        if revaluation.changed() {
            self.emit_event(EventPayload::ItemRevalued(ItemRevaluedEvent {
                item_id,
                old_value: revaluation.previous,
                new_value: revaluation.current,
                base_source: revaluation.valuation.base_source,
            }));
            tracing::info!(
                item = %item_id,
                from = %revaluation.previous,
                to = %revaluation.current,
                "item revalued"
            );
        }
        Ok(revaluation)
    }

    /// Returns false if the item was already on the user's wishlist.
    pub fn add_to_wishlist(&self, user_id: UserId, item_id: ItemId) -> Result<bool, EngineError> {
        self.store.transact(|t| {
            require_user(t, user_id)?;
            let item = require_item(t, item_id)?;
            if item.is_owned_by(user_id) {
                return Err(EngineError::Forbidden {
                    actor: user_id,
                    action: "wishlist their own item",
                });
            }
            Ok::<_, EngineError>(t.add_wish(user_id, item_id))
        })
    }

    pub fn remove_from_wishlist(&self, user_id: UserId, item_id: ItemId) -> Result<bool, EngineError> {
        self.store.transact(|t| {
            require_item(t, item_id)?;
            Ok::<_, EngineError>(t.remove_wish(user_id, item_id))
        })
    }
}

fn check_revaluable(item: &Item, actor: UserId) -> Result<(), EngineError> {
    if !item.is_owned_by(actor) {
        return Err(EngineError::Forbidden {
            actor,
            action: "revalue an item they do not own",
        });
    }
    if !item.available {
        return Err(EngineError::InvalidState(format!(
            "{} is held by an active exchange and cannot be revalued",
            item.id
        )));
    }
    Ok(())
}
