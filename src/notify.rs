use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use ulid::Ulid;

use crate::limits::EVENT_CHANNEL_CAPACITY;
use crate::model::{BookableStatus, BookingInfo, TypeId};
use crate::observability;
use crate::slot::Slot;
use crate::tenant::TenantRegistry;

/// What a booking event tells clients. Captured while the booking still exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingNotice {
    pub booking_id: Ulid,
    pub date: NaiveDate,
    pub time_slot: Slot,
    pub resource_type_id: TypeId,
    pub resource_name: String,
    pub user_id: String,
}

impl From<&BookingInfo> for BookingNotice {
    fn from(info: &BookingInfo) -> Self {
        Self {
            booking_id: info.booking_id,
            date: info.date,
            time_slot: info.time_slot,
            resource_type_id: info.resource_type_id,
            resource_name: info.resource_name.clone(),
            user_id: info.user_id.clone(),
        }
    }
}

/// Everything pushed over the realtime channel.
///
/// Serialized as `{"event": "booking-created", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum RealtimeEvent {
    BookingCreated(BookingNotice),
    BookingDeleted(BookingNotice),
    ResourceStatusChanged(BookableStatus),
    /// Upstream telemetry, forwarded untouched.
    MeasurementReceived(serde_json::Value),
    IotStatusChanged { online: bool },
}

impl RealtimeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RealtimeEvent::BookingCreated(_) => "booking-created",
            RealtimeEvent::BookingDeleted(_) => "booking-deleted",
            RealtimeEvent::ResourceStatusChanged(_) => "resource-status-changed",
            RealtimeEvent::MeasurementReceived(_) => "measurement-received",
            RealtimeEvent::IotStatusChanged { .. } => "iot-status-changed",
        }
    }
}

/// A live subscriber handle. Counted in the active-subscribers gauge until dropped.
pub struct Subscription {
    rx: broadcast::Receiver<RealtimeEvent>,
    scope: &'static str,
}

impl Subscription {
    pub(crate) fn new(rx: broadcast::Receiver<RealtimeEvent>, scope: &'static str) -> Self {
        metrics::gauge!(observability::REALTIME_SUBSCRIBERS_ACTIVE, "scope" => scope).increment(1.0);
        Self { rx, scope }
    }

    /// Next event in broadcast order. Events this subscriber fell too far
    /// behind on are skipped (and logged); `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<RealtimeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    metrics::counter!(observability::REALTIME_EVENTS_DROPPED_TOTAL, "scope" => self.scope)
                        .increment(skipped);
                    tracing::warn!("{} subscriber lagged, skipped {skipped} events", self.scope);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        metrics::gauge!(observability::REALTIME_SUBSCRIBERS_ACTIVE, "scope" => self.scope).decrement(1.0);
    }
}

/// Fan-out point for realtime events.
///
/// Booking-domain events go to every subscriber; telemetry goes to the
/// subscribers of one tenant group.
pub struct NotifyHub {
    bookings: broadcast::Sender<RealtimeEvent>,
    tenants: TenantRegistry,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            bookings: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            tenants: TenantRegistry::new(),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription::new(self.bookings.subscribe(), "booking")
    }

    /// Send a booking-domain event. No-op if nobody is listening.
    pub fn publish(&self, event: RealtimeEvent) {
        let name = event.name();
        match self.bookings.send(event) {
            Ok(n) => tracing::trace!("{name} delivered to {n} subscribers"),
            Err(_) => tracing::trace!("{name} dropped, no subscribers"),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.bookings.receiver_count()
    }

    pub fn tenants(&self) -> &TenantRegistry {
        &self.tenants
    }
}
