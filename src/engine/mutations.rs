use chrono::NaiveDate;
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::{BookingNotice, RealtimeEvent};
use crate::slot::Slot;

use super::{Engine, EngineError, Entity, WalCommand};

pub(crate) fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn validate_booking_request(date: NaiveDate, user_id: &str) -> Result<(), EngineError> {
    if user_id.trim().is_empty() {
        return Err(EngineError::LimitExceeded("user id is empty"));
    }
    if user_id.len() > MAX_USER_ID_LEN {
        return Err(EngineError::LimitExceeded("user id too long"));
    }
    if (date - today()).num_days() > MAX_DAYS_AHEAD {
        return Err(EngineError::LimitExceeded("date too far ahead"));
    }
    Ok(())
}

impl Engine {
    pub async fn create_resource_type(&self, id: TypeId, name: String) -> Result<(), EngineError> {
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("resource type name too long"));
        }
        if self.store.contains_type(&id) {
            return Err(EngineError::AlreadyExists(Entity::ResourceType, id.to_string()));
        }
        let event = Event::ResourceTypeCreated { id, name };
        self.wal_append(&event).await?;
        self.store.apply_catalog_event(&event);
        Ok(())
    }

    pub async fn create_instance(
        &self,
        id: InstanceId,
        type_id: TypeId,
        name: String,
        is_bookable: bool,
    ) -> Result<(), EngineError> {
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("resource name too long"));
        }
        if !self.store.contains_type(&type_id) {
            return Err(EngineError::not_found(Entity::ResourceType, type_id));
        }
        if self.store.contains_instance(&id) {
            return Err(EngineError::AlreadyExists(Entity::Instance, id.to_string()));
        }
        let event = Event::InstanceCreated { id, type_id, name, is_bookable };
        self.wal_append(&event).await?;
        self.store.apply_catalog_event(&event);
        Ok(())
    }

    /// Claim the lowest-id free instance of `type_id` for `(date, slot)`.
    ///
    /// Each candidate is checked and claimed under its own write guard, so two
    /// racing callers can never both get the same instance. When every
    /// candidate is taken (including by a racer) the result is `NoAvailability`.
    pub async fn create_booking(
        &self,
        type_id: TypeId,
        date: NaiveDate,
        slot: Slot,
        user_id: String,
    ) -> Result<BookingInfo, EngineError> {
        validate_booking_request(date, &user_id)?;
        // An unknown type has no bookable instances, same as a full one.
        let Some(type_name) = self.store.type_name(&type_id) else {
            return Err(no_availability(type_id, date, slot));
        };

        for instance_id in self.store.instances_of(&type_id) {
            let Some(rs) = self.store.get_instance(&instance_id) else {
                continue;
            };
            let mut guard = rs.write_owned().await;
            if !guard.is_free(date, slot) {
                continue;
            }

            let id = Ulid::new();
            let event = Event::BookingCreated {
                id,
                instance_id,
                type_id,
                date,
                slot,
                user_id: user_id.clone(),
            };
            self.persist_and_apply(&mut guard, &event).await?;

            let info = BookingInfo {
                booking_id: id,
                date,
                time_slot: slot,
                resource_type_id: type_id,
                resource_type: type_name,
                resource_instance_id: instance_id,
                resource_name: guard.name.clone(),
                user_id,
            };
            self.notify
                .publish(RealtimeEvent::BookingCreated(BookingNotice::from(&info)));
            drop(guard);

            metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
            tracing::info!(
                booking = %id,
                instance = instance_id,
                %date,
                %slot,
                "booked {} for {}",
                info.resource_name,
                info.user_id
            );
            return Ok(info);
        }

        Err(no_availability(type_id, date, slot))
    }

    /// Delete a booking and announce it with the booking's last state.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<BookingInfo, EngineError> {
        let mut guard = self.resolve_booking_write(&id).await?;
        // A concurrent cancel may have won between the index lookup and the lock.
        let booking = guard
            .bookings
            .values()
            .find(|b| b.id == id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(Entity::Booking, id))?;
        let info = self.describe(&guard, &booking);

        let event = Event::BookingDeleted {
            id,
            instance_id: guard.id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        self.notify
            .publish(RealtimeEvent::BookingDeleted(BookingNotice::from(&info)));
        drop(guard);

        metrics::counter!(crate::observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        tracing::info!(booking = %id, "cancelled {} {} on {}", info.resource_name, info.time_slot, info.date);
        Ok(info)
    }

    /// Flip an instance's bookable flag. Existing bookings are left in place.
    pub async fn toggle_bookable(&self, instance_id: InstanceId) -> Result<BookableStatus, EngineError> {
        let rs = self
            .store
            .get_instance(&instance_id)
            .ok_or_else(|| EngineError::not_found(Entity::Instance, instance_id))?;
        let mut guard = rs.write_owned().await;
        let event = Event::BookableSet {
            instance_id,
            is_bookable: !guard.is_bookable,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        let status = BookableStatus {
            resource_instance_id: instance_id,
            is_bookable: guard.is_bookable,
        };
        self.notify.publish(RealtimeEvent::ResourceStatusChanged(status));
        drop(guard);

        metrics::counter!(crate::observability::BOOKABLE_TOGGLES_TOTAL).increment(1);
        tracing::info!(instance = instance_id, is_bookable = status.is_bookable, "resource status changed");
        Ok(status)
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    ///
    /// Read guards on every instance are held until the swap completes, which
    /// keeps bookings from landing in the old log after the snapshot was taken.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        for t in self.store.types() {
            events.push(Event::ResourceTypeCreated { id: t.id, name: t.name });
        }

        let mut guards = Vec::new();
        for instance_id in self.store.instance_ids() {
            if let Some(rs) = self.store.get_instance(&instance_id) {
                guards.push(rs.read_owned().await);
            }
        }
        for rs in &guards {
            events.push(Event::InstanceCreated {
                id: rs.id,
                type_id: rs.type_id,
                name: rs.name.clone(),
                is_bookable: rs.is_bookable,
            });
            for b in rs.bookings.values() {
                events.push(Event::BookingCreated {
                    id: b.id,
                    instance_id: rs.id,
                    type_id: b.resource_type_id,
                    date: b.date,
                    slot: b.slot,
                    user_id: b.user_id.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(guards);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn no_availability(type_id: TypeId, date: NaiveDate, slot: Slot) -> EngineError {
    metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
    tracing::debug!(type_id, %date, %slot, "no free instance");
    EngineError::NoAvailability {
        resource_type_id: type_id,
        date,
        slot,
    }
}
