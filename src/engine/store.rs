use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::SharedInstanceState;

pub struct InMemoryStore {
    types: DashMap<TypeId, ResourceTypeState>,
    instances: DashMap<InstanceId, SharedInstanceState>,
    booking_to_instance: DashMap<Ulid, InstanceId>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            types: DashMap::new(),
            instances: DashMap::new(),
            booking_to_instance: DashMap::new(),
        }
    }

    // ── Catalog ──────────────────────────────────────────────

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn contains_type(&self, id: &TypeId) -> bool {
        self.types.contains_key(id)
    }

    pub fn type_name(&self, id: &TypeId) -> Option<String> {
        self.types.get(id).map(|t| t.name.clone())
    }

    /// Instance ids of a type in ascending order. Empty for unknown types.
    pub fn instances_of(&self, type_id: &TypeId) -> Vec<InstanceId> {
        self.types
            .get(type_id)
            .map(|t| t.instances.clone())
            .unwrap_or_default()
    }

    pub fn types(&self) -> Vec<ResourceTypeState> {
        let mut all: Vec<_> = self.types.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|t| t.id);
        all
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn contains_instance(&self, id: &InstanceId) -> bool {
        self.instances.contains_key(id)
    }

    pub fn get_instance(&self, id: &InstanceId) -> Option<SharedInstanceState> {
        self.instances.get(id).map(|e| e.value().clone())
    }

    pub fn instance_ids(&self) -> Vec<InstanceId> {
        let mut ids: Vec<_> = self.instances.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    // ── Booking index ────────────────────────────────────────

    pub fn get_instance_for_booking(&self, booking_id: &Ulid) -> Option<InstanceId> {
        self.booking_to_instance.get(booking_id).map(|e| *e.value())
    }

    pub fn booking_count(&self) -> usize {
        self.booking_to_instance.len()
    }

    // ── Event application ────────────────────────────────────

    /// Apply a catalog-level event (creates). Returns false for per-instance
    /// events, which need the instance's write guard and go through `apply_event`.
    pub fn apply_catalog_event(&self, event: &Event) -> bool {
        match event {
            Event::ResourceTypeCreated { id, name } => {
                self.types
                    .entry(*id)
                    .or_insert_with(|| ResourceTypeState::new(*id, name.clone()));
                true
            }
            Event::InstanceCreated { id, type_id, name, is_bookable } => {
                let rs = InstanceState::new(*id, name.clone(), *type_id, *is_bookable);
                self.instances.insert(*id, Arc::new(RwLock::new(rs)));
                if let Some(mut t) = self.types.get_mut(type_id) {
                    t.add_instance(*id);
                }
                true
            }
            _ => false,
        }
    }

    /// Apply a per-instance event directly (caller holds the write lock).
    pub fn apply_event(&self, rs: &mut InstanceState, event: &Event) {
        match event {
            Event::BookableSet { is_bookable, .. } => {
                rs.is_bookable = *is_bookable;
            }
            Event::BookingCreated {
                id,
                instance_id,
                type_id,
                date,
                slot,
                user_id,
            } => {
                rs.insert_booking(Booking {
                    id: *id,
                    date: *date,
                    slot: *slot,
                    resource_type_id: *type_id,
                    resource_instance_id: *instance_id,
                    user_id: user_id.clone(),
                });
                self.booking_to_instance.insert(*id, *instance_id);
            }
            Event::BookingDeleted { id, .. } => {
                rs.remove_booking(*id);
                self.booking_to_instance.remove(id);
            }
            Event::ResourceTypeCreated { .. } | Event::InstanceCreated { .. } => {}
        }
    }
}
