// 8.2 engine/exchanges.rs: the exchange lifecycle. every transition is one store transaction:
// validate, then mutate. the cycle check reads its snapshot inside the same transaction that
// inserts the PENDING row, so two mutually-referencing requests cannot both pass.

use super::core::{require_exchange, require_item, require_user, Engine};
use super::results::{EngineError, Entity, ExchangePage};
use crate::cycle::ObligationGraph;
use crate::events::{
    DisputeClosedEvent, DisputeFiledEvent, EventPayload, ExchangeClosedEvent, ExchangeCompletedEvent,
    ExchangeCreatedEvent, ExchangeRefusedEvent, PointsPostedEvent, RefusalReason,
};
use crate::exchange::{Dispute, DisputeStatus, ExchangeRequest, ExchangeStatus};
use crate::item::{HistoryRecord, Item, ItemAction};
use crate::ledger::{EntryCategory, LedgerEntry, Posting};
use crate::store::{Store, Tables};
use crate::types::{DisputeId, ExchangeId, ItemId, PageRequest, Points, Timestamp, UserId};

/// What a committed release (reject or cancel) hands to the post-commit phase.
struct Release {
    exchange: ExchangeRequest,
    item: Item,
    interested: Vec<UserId>,
}

struct Settlement {
    exchange: ExchangeRequest,
    debit: LedgerEntry,
    credit: LedgerEntry,
    requester_balance: Points,
    owner_balance: Points,
}

enum Decision {
    Approved(Settlement),
    Rejected(Release),
}

impl<S: Store> Engine<S> {
    /// Request `item_id` on behalf of `requester`. The item is held (unavailable) and its
    /// current value is frozen as the cost. No points move until approval.
    pub fn create_exchange(
        &self,
        item_id: ItemId,
        requester: UserId,
        message: Option<&str>,
    ) -> Result<ExchangeRequest, EngineError> {
        let now = self.time();

        let result = self.store.transact(|t| {
            require_user(t, requester)?;
            let item = require_item(t, item_id)?.clone();
            if !item.available {
                return Err(EngineError::Unavailable(item_id));
            }
            if item.is_owned_by(requester) {
                return Err(EngineError::SelfTrade(requester));
            }

            let graph = ObligationGraph::from_obligations(&t.active_obligations(None));
            if graph.would_create_cycle(requester, item.owner_id) {
                return Err(EngineError::CircularExchange {
                    requester,
                    owner: item.owner_id,
                });
            }

            let available = t.ledger().balance(requester);
            if available < item.point_value {
                return Err(EngineError::InsufficientFunds {
                    user_id: requester,
                    required: item.point_value,
                    available,
                });
            }

            let held = t
                .item_mut(item_id)
                .ok_or(EngineError::NotFound(Entity::Item(item_id)))?;
            held.available = false;
            held.updated_at = now;

            let exchange = t
                .insert_exchange(|id| {
                    ExchangeRequest::new(
                        id,
                        item_id,
                        requester,
                        item.owner_id,
                        item.point_value,
                        message.map(str::to_string),
                        now,
                    )
                })
                .clone();

            t.record_history(HistoryRecord {
                item_id,
                user_id: requester,
                action: ItemAction::ExchangeRequested,
                notes: format!("{} requested by {} for {}", exchange.id, requester, exchange.points_cost),
                at: now,
            });
            Ok(exchange)
        });

        let exchange = match result {
            Ok(exchange) => exchange,
            Err(e) => {
                self.record_refusal(item_id, requester, &e);
                return Err(e);
            }
        };

        self.emit_event(EventPayload::ExchangeCreated(ExchangeCreatedEvent {
            exchange_id: exchange.id,
            item_id,
            requester_id: requester,
            owner_id: exchange.owner_id,
            points_cost: exchange.points_cost,
        }));
        tracing::info!(
            exchange = %exchange.id,
            item = %item_id,
            requester = %requester,
            owner = %exchange.owner_id,
            cost = %exchange.points_cost,
            "exchange requested"
        );
        Ok(exchange)
    }

    /// Owner's answer to a PENDING request. Approval settles immediately: the requester
    /// is debited, the owner credited, ownership moves and the request is COMPLETED, all in
    /// one transaction. A failed funds re-check leaves the request PENDING.
    pub fn decide_exchange(
        &self,
        exchange_id: ExchangeId,
        actor: UserId,
        approve: bool,
    ) -> Result<ExchangeRequest, EngineError> {
        let now = self.time();

        let result = self.store.transact(|t| {
            let mut exchange = require_exchange(t, exchange_id)?.clone();
            let item = require_item(t, exchange.item_id)?.clone();
            if !item.is_owned_by(actor) {
                return Err(EngineError::Forbidden {
                    actor,
                    action: "decide on a request for an item they do not own",
                });
            }

            if approve {
                settle(t, &mut exchange, now).map(Decision::Approved)
            } else {
                exchange.advance(ExchangeStatus::Rejected, now)?;
                let release = release_item(t, exchange, ItemAction::ExchangeRejected, actor, now)?;
                Ok(Decision::Rejected(release))
            }
        });

        let decision = match result {
            Ok(decision) => decision,
            Err(e) => {
                if let Ok(Some(exchange)) = self.store.read(|t| t.exchange(exchange_id).cloned()) {
                    self.record_refusal(exchange.item_id, exchange.requester_id, &e);
                }
                return Err(e);
            }
        };

        match decision {
            Decision::Approved(settlement) => {
                let exchange = settlement.exchange;
                self.emit_event(EventPayload::PointsPosted(PointsPostedEvent {
                    entry_id: settlement.debit.id,
                    user_id: exchange.requester_id,
                    amount: settlement.debit.amount,
                    category: settlement.debit.category,
                    new_balance: settlement.requester_balance,
                }));
                self.emit_event(EventPayload::PointsPosted(PointsPostedEvent {
                    entry_id: settlement.credit.id,
                    user_id: exchange.owner_id,
                    amount: settlement.credit.amount,
                    category: settlement.credit.category,
                    new_balance: settlement.owner_balance,
                }));
                self.emit_event(EventPayload::ExchangeCompleted(ExchangeCompletedEvent {
                    exchange_id,
                    item_id: exchange.item_id,
                    previous_owner: exchange.owner_id,
                    new_owner: exchange.requester_id,
                    points_cost: exchange.points_cost,
                    debit_entry: settlement.debit.id,
                    credit_entry: settlement.credit.id,
                }));
                tracing::info!(
                    exchange = %exchange_id,
                    item = %exchange.item_id,
                    from = %exchange.owner_id,
                    to = %exchange.requester_id,
                    cost = %exchange.points_cost,
                    "exchange completed"
                );
                Ok(exchange)
            }
            Decision::Rejected(release) => {
                self.emit_event(EventPayload::ExchangeRejected(ExchangeClosedEvent {
                    exchange_id,
                    item_id: release.item.id,
                    actor_id: actor,
                }));
                tracing::info!(exchange = %exchange_id, item = %release.item.id, "exchange rejected");
                self.send_availability_alerts(&release.item, &release.interested);
                Ok(release.exchange)
            }
        }
    }

    /// Withdraw a PENDING request. Either participant may cancel.
    pub fn cancel_exchange(&self, exchange_id: ExchangeId, actor: UserId) -> Result<ExchangeRequest, EngineError> {
        let now = self.time();

        let release = self.store.transact(|t| {
            let mut exchange = require_exchange(t, exchange_id)?.clone();
            if !exchange.involves(actor) {
                return Err(EngineError::Forbidden {
                    actor,
                    action: "cancel an exchange they are not part of",
                });
            }
            exchange.advance(ExchangeStatus::Cancelled, now)?;
            release_item(t, exchange, ItemAction::ExchangeCancelled, actor, now)
        })?;

        self.emit_event(EventPayload::ExchangeCancelled(ExchangeClosedEvent {
            exchange_id,
            item_id: release.item.id,
            actor_id: actor,
        }));
        tracing::info!(exchange = %exchange_id, actor = %actor, "exchange cancelled");
        self.send_availability_alerts(&release.item, &release.interested);
        Ok(release.exchange)
    }

    /// Open a dispute on an APPROVED or COMPLETED exchange. At most one dispute per
    /// exchange may be open; the exchange moves to DISPUTED.
    pub fn file_dispute(
        &self,
        exchange_id: ExchangeId,
        actor: UserId,
        reason: &str,
        description: &str,
    ) -> Result<Dispute, EngineError> {
        let now = self.time();

        let dispute = self.store.transact(|t| {
            let mut exchange = require_exchange(t, exchange_id)?.clone();
            if !exchange.involves(actor) {
                return Err(EngineError::Forbidden {
                    actor,
                    action: "dispute an exchange they are not part of",
                });
            }
            if t.open_dispute_for(exchange_id).is_some() {
                return Err(EngineError::DuplicateDispute(exchange_id));
            }

            let was_active = exchange.status.is_active();
            exchange.advance(ExchangeStatus::Disputed, now)?;
            if was_active {
                // an approved request no longer holds its item once disputed
                if let Some(item) = t.item_mut(exchange.item_id) {
                    item.available = true;
                    item.updated_at = now;
                }
            }
            if let Some(stored) = t.exchange_mut(exchange_id) {
                *stored = exchange;
            }

            let dispute = t
                .insert_dispute(|id| Dispute::open(id, exchange_id, actor, reason, description, now))
                .clone();
            Ok::<_, EngineError>(dispute)
        })?;

        self.emit_event(EventPayload::DisputeFiled(DisputeFiledEvent {
            dispute_id: dispute.id,
            exchange_id,
            reporter_id: actor,
            reason: dispute.reason.clone(),
        }));
        tracing::info!(dispute = %dispute.id, exchange = %exchange_id, reporter = %actor, "dispute filed");
        Ok(dispute)
    }

    /// Moderation outcome for an open dispute. The exchange itself stays DISPUTED;
    /// any compensation goes through the ledger as separate entries.
    pub fn close_dispute(&self, dispute_id: DisputeId, outcome: DisputeStatus) -> Result<Dispute, EngineError> {
        let now = self.time();

        let dispute = self.store.transact(|t| {
            let dispute = t
                .dispute_mut(dispute_id)
                .ok_or(EngineError::NotFound(Entity::Dispute(dispute_id)))?;
            if !dispute.close(outcome, now) {
                return Err(EngineError::InvalidState(format!(
                    "{dispute_id} is {:?} and cannot move to {outcome:?}",
                    dispute.status
                )));
            }
            Ok(dispute.clone())
        })?;

        self.emit_event(EventPayload::DisputeClosed(DisputeClosedEvent {
            dispute_id,
            exchange_id: dispute.exchange_id,
            outcome,
        }));
        tracing::info!(dispute = %dispute_id, outcome = ?outcome, "dispute closed");
        Ok(dispute)
    }

    pub fn dispute(&self, dispute_id: DisputeId) -> Result<Dispute, EngineError> {
        self.store.read(|t| {
            t.dispute(dispute_id)
                .cloned()
                .ok_or(EngineError::NotFound(Entity::Dispute(dispute_id)))
        })?
    }

    /// Visible to the two participants only.
    pub fn get_exchange(&self, exchange_id: ExchangeId, actor: UserId) -> Result<ExchangeRequest, EngineError> {
        self.store.read(|t| {
            let exchange = require_exchange(t, exchange_id)?;
            if !exchange.involves(actor) {
                return Err(EngineError::Forbidden {
                    actor,
                    action: "view an exchange they are not part of",
                });
            }
            Ok(exchange.clone())
        })?
    }

    /// Exchanges where `user_id` is requester or owner, newest first.
    pub fn exchanges_for_user(
        &self,
        user_id: UserId,
        status: Option<ExchangeStatus>,
        page: Option<PageRequest>,
    ) -> Result<ExchangePage, EngineError> {
        let page = self.page_or_default(page);
        self.store.read(|t| {
            require_user(t, user_id)?;
            let mut matching: Vec<&ExchangeRequest> = t
                .exchanges_involving(user_id)
                .filter(|e| status.map_or(true, |s| e.status == s))
                .collect();
            matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

            let total = matching.len();
            Ok::<_, EngineError>(ExchangePage {
                exchanges: matching
                    .into_iter()
                    .skip(page.offset())
                    .take(page.page_size)
                    .cloned()
                    .collect(),
                total,
                page: page.page,
                page_size: page.page_size,
                total_pages: page.total_pages(total),
            })
        })?
    }

    /// The completed record, for a participant confirming the hand-over.
    pub fn confirm_completion(&self, exchange_id: ExchangeId, actor: UserId) -> Result<ExchangeRequest, EngineError> {
        let exchange = self.get_exchange(exchange_id, actor)?;
        if exchange.status != ExchangeStatus::Completed {
            return Err(EngineError::InvalidState(format!(
                "{exchange_id} is {}, not completed",
                exchange.status
            )));
        }
        Ok(exchange)
    }

    /// Every cycle in the live obligation graph. Empty while the guard holds.
    pub fn active_cycles(&self) -> Result<Vec<Vec<UserId>>, EngineError> {
        let cycles = self
            .store
            .read(|t| ObligationGraph::from_obligations(&t.active_obligations(None)).find_cycles())?;
        if !cycles.is_empty() {
            tracing::warn!(count = cycles.len(), "obligation cycles present");
        }
        Ok(cycles)
    }

    fn record_refusal(&self, item_id: ItemId, requester_id: UserId, error: &EngineError) {
        let reason = match error {
            EngineError::CircularExchange { .. } => RefusalReason::CircularExchange,
            EngineError::InsufficientFunds { .. } => RefusalReason::InsufficientFunds,
            _ => return,
        };
        tracing::warn!(item = %item_id, requester = %requester_id, error = %error, "exchange refused");
        self.emit_event(EventPayload::ExchangeRefused(ExchangeRefusedEvent {
            item_id,
            requester_id,
            reason,
        }));
    }
}

/// Approve-path transfer. Runs inside the caller's transaction.
fn settle(t: &mut Tables, exchange: &mut ExchangeRequest, now: Timestamp) -> Result<Settlement, EngineError> {
    exchange.advance(ExchangeStatus::Approved, now)?;

    let available = t.ledger().balance(exchange.requester_id);
    if available < exchange.points_cost {
        return Err(EngineError::InsufficientFunds {
            user_id: exchange.requester_id,
            required: exchange.points_cost,
            available,
        });
    }

    let cost = exchange.points_cost;
    let debit = t.ledger_mut().post(
        Posting::new(
            exchange.requester_id,
            cost.negate(),
            EntryCategory::Redeemed,
            format!("Redeemed {cost} for {}", exchange.item_id),
        )
        .for_exchange(exchange.id),
        now,
    )?;
    let credit = t.ledger_mut().post(
        Posting::new(
            exchange.owner_id,
            cost,
            EntryCategory::Earned,
            format!("Earned {cost} for {}", exchange.item_id),
        )
        .for_exchange(exchange.id),
        now,
    )?;

    let item = t
        .item_mut(exchange.item_id)
        .ok_or(EngineError::NotFound(Entity::Item(exchange.item_id)))?;
    item.owner_id = exchange.requester_id;
    item.available = true;
    item.updated_at = now;

    exchange.advance(ExchangeStatus::Completed, now)?;
    let stored = t
        .exchange_mut(exchange.id)
        .ok_or(EngineError::NotFound(Entity::Exchange(exchange.id)))?;
    *stored = exchange.clone();

    t.record_history(HistoryRecord {
        item_id: exchange.item_id,
        user_id: exchange.requester_id,
        action: ItemAction::OwnershipTransferred,
        notes: format!(
            "{} -> {} via {} for {cost}",
            exchange.owner_id, exchange.requester_id, exchange.id
        ),
        at: now,
    });

    Ok(Settlement {
        exchange: exchange.clone(),
        requester_balance: t.ledger().balance(exchange.requester_id),
        owner_balance: t.ledger().balance(exchange.owner_id),
        debit,
        credit,
    })
}

/// Store a closed (rejected or cancelled) request and make its item available again.
fn release_item(
    t: &mut Tables,
    exchange: ExchangeRequest,
    action: ItemAction,
    actor: UserId,
    now: Timestamp,
) -> Result<Release, EngineError> {
    let stored = t
        .exchange_mut(exchange.id)
        .ok_or(EngineError::NotFound(Entity::Exchange(exchange.id)))?;
    *stored = exchange.clone();

    let item = t
        .item_mut(exchange.item_id)
        .ok_or(EngineError::NotFound(Entity::Item(exchange.item_id)))?;
    item.available = true;
    item.updated_at = now;
    let item = item.clone();

    t.record_history(HistoryRecord {
        item_id: item.id,
        user_id: actor,
        action,
        notes: format!("{} {}", exchange.id, exchange.status),
        at: now,
    });

    Ok(Release {
        interested: t.interested_users(item.id),
        exchange,
        item,
    })
}
