//! Notification sink.
//!
//! Fire-and-forget "item became available" alerts for users who wished for an
//! item. The engine calls the sink only after the releasing transaction has
//! committed, and a sink can never fail a transition.

use crate::types::{ItemId, Timestamp, UserId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityAlert {
    pub recipient: UserId,
    pub item_id: ItemId,
    pub subject: String,
    pub body: String,
    pub at: Timestamp,
}

pub trait Notifier: Send + Sync {
    fn item_available(&self, alert: AvailabilityAlert);
}

/// Drops every alert.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn item_available(&self, _alert: AvailabilityAlert) {}
}

/// Keeps alerts in memory, in delivery order.
#[derive(Debug, Default)]
pub struct AlertLog {
    alerts: Mutex<Vec<AvailabilityAlert>>,
}

impl AlertLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<AvailabilityAlert> {
        self.alerts.lock().clone()
    }

    pub fn alerts_for(&self, recipient: UserId) -> Vec<AvailabilityAlert> {
        self.alerts
            .lock()
            .iter()
            .filter(|a| a.recipient == recipient)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.lock().is_empty()
    }
}

impl Notifier for AlertLog {
    fn item_available(&self, alert: AvailabilityAlert) {
        self.alerts.lock().push(alert);
    }
}
