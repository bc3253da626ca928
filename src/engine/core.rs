// 8.0 engine/core.rs: main engine. owns the store, the injected collaborators and the audit log.

use super::results::{EngineError, Entity};
use crate::config::MarketplaceConfig;
use crate::events::{Event, EventCollector, EventId, EventPayload};
use crate::exchange::ExchangeRequest;
use crate::item::Item;
use crate::notify::{AvailabilityAlert, Notifier, NullNotifier};
use crate::oracle::{BoundedOracle, PricingOracle};
use crate::store::{MemoryStore, Store, Tables, UserRecord};
use crate::types::{ExchangeId, ItemId, PageRequest, Timestamp, UserId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/** 8.1: main engine struct. every piece of marketplace state lives behind `store` */
pub struct Engine<S: Store = MemoryStore> {
    pub(super) store: S,
    pub(super) config: MarketplaceConfig,
    pub(super) oracle: Option<BoundedOracle>,
    pub(super) notifier: Arc<dyn Notifier>,
    pub(super) events: Mutex<EventCollector>,
    pub(super) current_time: AtomicI64,
}

impl Engine<MemoryStore> {
    pub fn new(config: MarketplaceConfig) -> Result<Self, EngineError> {
        Self::with_store(MemoryStore::new(), config)
    }
}

impl<S: Store> Engine<S> {
    pub fn with_store(store: S, config: MarketplaceConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let events = EventCollector::with_capacity(config.engine.max_events);
        Ok(Self {
            store,
            config,
            oracle: None,
            notifier: Arc::new(NullNotifier),
            events: Mutex::new(events),
            current_time: AtomicI64::new(0),
        })
    }

    /// Attach a pricing oracle, bounded by the configured timeout.
    pub fn with_oracle(mut self, oracle: Arc<dyn PricingOracle>) -> Self {
        self.oracle = Some(BoundedOracle::new(oracle, self.config.oracle.clone()));
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &MarketplaceConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn oracle(&self) -> Option<&BoundedOracle> {
        self.oracle.as_ref()
    }

    pub fn set_time(&self, timestamp: Timestamp) {
        self.current_time.store(timestamp.as_millis(), Ordering::SeqCst);
    }

    pub fn time(&self) -> Timestamp {
        Timestamp::from_millis(self.current_time.load(Ordering::SeqCst))
    }

    pub fn advance_time(&self, millis: i64) {
        self.current_time.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn register_user(&self, name: &str) -> Result<UserId, EngineError> {
        let now = self.time();
        let user_id = self
            .store
            .transact(|t| Ok::<_, EngineError>(t.insert_user(name, now)))?;
        tracing::info!(user = %user_id, name, "user registered");
        Ok(user_id)
    }

    pub fn user(&self, user_id: UserId) -> Result<UserRecord, EngineError> {
        self.store
            .read(|t| require_user(t, user_id).cloned())?
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().events().cloned().collect()
    }

    pub fn recent_events(&self, count: usize) -> Vec<Event> {
        self.events.lock().recent(count)
    }

    pub(super) fn emit_event(&self, payload: EventPayload) -> EventId {
        let now = self.time();
        self.events.lock().record(now, payload)
    }

    /// Clamp a caller's page request into the configured bounds.
    pub(super) fn page_or_default(&self, page: Option<PageRequest>) -> PageRequest {
        let limits = &self.config.engine;
        let requested = page.unwrap_or(PageRequest::first(limits.default_page_size));
        PageRequest::new(
            requested.page.max(1),
            requested.page_size.clamp(1, limits.max_page_size),
        )
    }

    /// Tell everyone who wished for `item` that it can be requested again.
    /// Runs after commit; a notifier cannot fail the transition that released the item.
    pub(super) fn send_availability_alerts(&self, item: &Item, recipients: &[UserId]) {
        let now = self.time();
        for &recipient in recipients {
            self.notifier.item_available(AvailabilityAlert {
                recipient,
                item_id: item.id,
                subject: format!("Item Available: {}", item.title),
                body: format!(
                    "'{}' by {} from your wishlist is now available for exchange.",
                    item.title, item.author
                ),
                at: now,
            });
        }
        if !recipients.is_empty() {
            tracing::debug!(item = %item.id, recipients = recipients.len(), "availability alerts sent");
        }
    }
}

pub(super) fn require_user(tables: &Tables, user_id: UserId) -> Result<&UserRecord, EngineError> {
    tables
        .user(user_id)
        .ok_or(EngineError::NotFound(Entity::User(user_id)))
}

pub(super) fn require_item(tables: &Tables, item_id: ItemId) -> Result<&Item, EngineError> {
    tables
        .item(item_id)
        .ok_or(EngineError::NotFound(Entity::Item(item_id)))
}

pub(super) fn require_exchange(tables: &Tables, exchange_id: ExchangeId) -> Result<&ExchangeRequest, EngineError> {
    tables
        .exchange(exchange_id)
        .ok_or(EngineError::NotFound(Entity::Exchange(exchange_id)))
}
