// 11.0: every committed transition produces an event, and so does every veto. used for audit
// trails and for answering "why was this request refused" after the fact. the EventPayload
// enum lists all event types.

use crate::exchange::DisputeStatus;
use crate::ledger::EntryCategory;
use crate::types::{Condition, DisputeId, EntryId, ExchangeId, ItemId, Points, Timestamp, UserId};
use crate::valuation::BaseSource;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // Catalog events
    ItemListed(ItemListedEvent),
    ItemRevalued(ItemRevaluedEvent),

    // Exchange lifecycle
    ExchangeCreated(ExchangeCreatedEvent),
    ExchangeCompleted(ExchangeCompletedEvent),
    ExchangeRejected(ExchangeClosedEvent),
    ExchangeCancelled(ExchangeClosedEvent),
    DisputeFiled(DisputeFiledEvent),
    DisputeClosed(DisputeClosedEvent),

    // Ledger
    PointsPosted(PointsPostedEvent),

    // Vetoes
    ExchangeRefused(ExchangeRefusedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemListedEvent {
    pub item_id: ItemId,
    pub owner_id: UserId,
    pub condition: Condition,
    pub point_value: Points,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRevaluedEvent {
    pub item_id: ItemId,
    pub old_value: Points,
    pub new_value: Points,
    pub base_source: BaseSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeCreatedEvent {
    pub exchange_id: ExchangeId,
    pub item_id: ItemId,
    pub requester_id: UserId,
    pub owner_id: UserId,
    pub points_cost: Points,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeCompletedEvent {
    pub exchange_id: ExchangeId,
    pub item_id: ItemId,
    pub previous_owner: UserId,
    pub new_owner: UserId,
    pub points_cost: Points,
    pub debit_entry: EntryId,
    pub credit_entry: EntryId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeClosedEvent {
    pub exchange_id: ExchangeId,
    pub item_id: ItemId,
    pub actor_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeFiledEvent {
    pub dispute_id: DisputeId,
    pub exchange_id: ExchangeId,
    pub reporter_id: UserId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeClosedEvent {
    pub dispute_id: DisputeId,
    pub exchange_id: ExchangeId,
    pub outcome: DisputeStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsPostedEvent {
    pub entry_id: EntryId,
    pub user_id: UserId,
    pub amount: Points,
    pub category: EntryCategory,
    pub new_balance: Points,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRefusedEvent {
    pub item_id: ItemId,
    pub requester_id: UserId,
    pub reason: RefusalReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefusalReason {
    CircularExchange,
    InsufficientFunds,
}

pub trait EventEmitter {
    fn emit(&mut self, event: Event);
}

/// Bounded in-memory event log; the oldest events fall off past `capacity`.
#[derive(Debug)]
pub struct EventCollector {
    events: VecDeque<Event>,
    next_id: u64,
    capacity: usize,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            next_id: 1,
            capacity: capacity.max(1),
        }
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> + '_ {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn recent(&self, count: usize) -> Vec<Event> {
        let start = self.events.len().saturating_sub(count);
        self.events.iter().skip(start).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn next_id(&mut self) -> EventId {
        let id = EventId(self.next_id.max(1));
        self.next_id = id.0 + 1;
        id
    }

    pub fn record(&mut self, timestamp: Timestamp, payload: EventPayload) -> EventId {
        let id = self.next_id();
        self.emit(Event::new(id, timestamp, payload));
        id
    }
}

impl Default for EventCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl EventEmitter for EventCollector {
    fn emit(&mut self, event: Event) {
        self.events.push_back(event);
        while self.events.len() > self.capacity {
            self.events.pop_front();
        }
    }
}
