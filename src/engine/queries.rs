use chrono::NaiveDate;

use crate::model::*;

use super::{Engine, EngineError, Entity};

impl Engine {
    pub(super) fn describe(&self, rs: &InstanceState, b: &Booking) -> BookingInfo {
        BookingInfo {
            booking_id: b.id,
            date: b.date,
            time_slot: b.slot,
            resource_type_id: b.resource_type_id,
            resource_type: self.store.type_name(&b.resource_type_id).unwrap_or_default(),
            resource_instance_id: rs.id,
            resource_name: rs.name.clone(),
            user_id: b.user_id.clone(),
        }
    }

    /// Walk every instance (ascending id) and collect the bookings `keep` accepts,
    /// ordered by date, slot, then instance.
    async fn collect_bookings<F>(&self, instance_ids: Vec<InstanceId>, keep: F) -> Vec<BookingInfo>
    where
        F: Fn(&Booking) -> bool,
    {
        let mut out = Vec::new();
        for instance_id in instance_ids {
            let Some(rs) = self.store.get_instance(&instance_id) else {
                continue;
            };
            let guard = rs.read().await;
            out.extend(
                guard
                    .bookings
                    .values()
                    .filter(|b| keep(b))
                    .map(|b| self.describe(&guard, b)),
            );
        }
        out.sort_by(|a, b| {
            (a.date, a.time_slot, a.resource_instance_id).cmp(&(b.date, b.time_slot, b.resource_instance_id))
        });
        out
    }

    pub fn list_resource_types(&self) -> Vec<ResourceTypeInfo> {
        self.store
            .types()
            .into_iter()
            .map(|t| ResourceTypeInfo {
                id: t.id,
                name: t.name,
                instance_count: t.instances.len(),
            })
            .collect()
    }

    pub async fn list_instances(&self) -> Vec<InstanceInfo> {
        let mut out = Vec::new();
        for instance_id in self.store.instance_ids() {
            if let Some(info) = self.instance_info(instance_id).await {
                out.push(info);
            }
        }
        out
    }

    pub async fn get_instance(&self, instance_id: InstanceId) -> Result<InstanceInfo, EngineError> {
        self.instance_info(instance_id)
            .await
            .ok_or_else(|| EngineError::not_found(Entity::Instance, instance_id))
    }

    async fn instance_info(&self, instance_id: InstanceId) -> Option<InstanceInfo> {
        let rs = self.store.get_instance(&instance_id)?;
        let guard = rs.read().await;
        Some(InstanceInfo {
            id: guard.id,
            name: guard.name.clone(),
            resource_type_id: guard.type_id,
            is_bookable: guard.is_bookable,
        })
    }

    pub async fn get_booking(&self, id: ulid::Ulid) -> Result<BookingInfo, EngineError> {
        let instance_id = self
            .store
            .get_instance_for_booking(&id)
            .ok_or_else(|| EngineError::not_found(Entity::Booking, id))?;
        self.collect_bookings(vec![instance_id], |b| b.id == id)
            .await
            .pop()
            .ok_or_else(|| EngineError::not_found(Entity::Booking, id))
    }

    pub async fn bookings_for_user(&self, user_id: &str) -> Vec<BookingInfo> {
        self.collect_bookings(self.store.instance_ids(), |b| b.user_id == user_id)
            .await
    }

    pub async fn bookings_on(&self, date: NaiveDate) -> Vec<BookingInfo> {
        self.collect_day(self.store.instance_ids(), date).await
    }

    pub async fn bookings_for_type_on(&self, type_id: TypeId, date: NaiveDate) -> Vec<BookingInfo> {
        self.collect_day(self.store.instances_of(&type_id), date).await
    }

    async fn collect_day(&self, instance_ids: Vec<InstanceId>, date: NaiveDate) -> Vec<BookingInfo> {
        let mut out = Vec::new();
        for instance_id in instance_ids {
            if let Some(rs) = self.store.get_instance(&instance_id) {
                let guard = rs.read().await;
                out.extend(guard.bookings_on(date).map(|b| self.describe(&guard, b)));
            }
        }
        out.sort_by_key(|b| (b.time_slot, b.resource_instance_id));
        out
    }

    pub async fn all_bookings(&self) -> Vec<BookingInfo> {
        self.collect_bookings(self.store.instance_ids(), |_| true).await
    }
}
