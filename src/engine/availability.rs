use chrono::NaiveDate;

use crate::model::*;
use crate::slot::Slot;

use super::{Engine, EngineError};

/// Slots, in canonical order, for which at least one of `instances` is free.
///
/// Pure over a snapshot; each instance is checked independently per slot.
pub fn free_slots_among<'a, I>(instances: I, date: NaiveDate) -> Vec<Slot>
where
    I: IntoIterator<Item = &'a InstanceState> + Clone,
{
    Slot::ALL
        .into_iter()
        .filter(|slot| instances.clone().into_iter().any(|rs| rs.is_free(date, *slot)))
        .collect()
}

impl Engine {
    /// Free slots for a resource type on a day.
    ///
    /// Unknown types and types without bookable instances yield no slots.
    /// Reads take each instance's read lock in turn, so the answer can be
    /// stale by the time it reaches the caller; `create_booking` re-checks.
    pub async fn free_slots(&self, type_id: TypeId, date: NaiveDate) -> Result<Vec<Slot>, EngineError> {
        let mut guards = Vec::new();
        for instance_id in self.store.instances_of(&type_id) {
            if let Some(rs) = self.store.get_instance(&instance_id) {
                let guard = rs.read_owned().await;
                if guard.is_bookable {
                    guards.push(guard);
                }
            }
        }
        Ok(free_slots_among(guards.iter().map(|g| &**g), date))
    }

    /// Ids of the instances of a type that could take a booking for `(date, slot)`,
    /// in allocation order.
    pub async fn available_instances(
        &self,
        type_id: TypeId,
        date: NaiveDate,
        slot: Slot,
    ) -> Vec<InstanceId> {
        let mut free = Vec::new();
        for instance_id in self.store.instances_of(&type_id) {
            if let Some(rs) = self.store.get_instance(&instance_id)
                && rs.read().await.is_free(date, slot)
            {
                free.push(instance_id);
            }
        }
        free
    }
}
