use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::slot::Slot;

pub type TypeId = u32;
pub type InstanceId = u32;

/// `(date, slot)`: the unit an instance can be claimed for.
pub type SlotKey = (NaiveDate, Slot);

/// A booking as held in memory, keyed under its instance by `(date, slot)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub date: NaiveDate,
    pub slot: Slot,
    pub resource_type_id: TypeId,
    pub resource_instance_id: InstanceId,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTypeState {
    pub id: TypeId,
    pub name: String,
    /// Instance ids of this type, ascending. Allocation walks them in this order.
    pub instances: Vec<InstanceId>,
}

impl ResourceTypeState {
    pub fn new(id: TypeId, name: String) -> Self {
        Self { id, name, instances: Vec::new() }
    }

    pub fn add_instance(&mut self, instance_id: InstanceId) {
        if let Err(pos) = self.instances.binary_search(&instance_id) {
            self.instances.insert(pos, instance_id);
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstanceState {
    pub id: InstanceId,
    pub name: String,
    pub type_id: TypeId,
    pub is_bookable: bool,
    /// At most one booking per `(date, slot)`; the map key is the uniqueness constraint.
    pub bookings: BTreeMap<SlotKey, Booking>,
}

impl InstanceState {
    pub fn new(id: InstanceId, name: String, type_id: TypeId, is_bookable: bool) -> Self {
        Self {
            id,
            name,
            type_id,
            is_bookable,
            bookings: BTreeMap::new(),
        }
    }

    pub fn is_taken(&self, date: NaiveDate, slot: Slot) -> bool {
        self.bookings.contains_key(&(date, slot))
    }

    /// Bookable and not yet claimed for `(date, slot)`.
    pub fn is_free(&self, date: NaiveDate, slot: Slot) -> bool {
        self.is_bookable && !self.is_taken(date, slot)
    }

    pub fn insert_booking(&mut self, booking: Booking) -> Option<Booking> {
        self.bookings.insert((booking.date, booking.slot), booking)
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let key = self
            .bookings
            .iter()
            .find(|(_, b)| b.id == id)
            .map(|(k, _)| *k)?;
        self.bookings.remove(&key)
    }

    /// Bookings on one calendar day, in slot order.
    pub fn bookings_on(&self, date: NaiveDate) -> impl Iterator<Item = &Booking> {
        self.bookings
            .range((date, Slot::H08)..=(date, Slot::H18))
            .map(|(_, b)| b)
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceTypeCreated {
        id: TypeId,
        name: String,
    },
    InstanceCreated {
        id: InstanceId,
        type_id: TypeId,
        name: String,
        is_bookable: bool,
    },
    BookableSet {
        instance_id: InstanceId,
        is_bookable: bool,
    },
    BookingCreated {
        id: Ulid,
        instance_id: InstanceId,
        type_id: TypeId,
        date: NaiveDate,
        slot: Slot,
        user_id: String,
    },
    BookingDeleted {
        id: Ulid,
        instance_id: InstanceId,
    },
}

impl Event {
    /// The instance an event mutates, if any.
    pub fn instance_id(&self) -> Option<InstanceId> {
        match self {
            Event::InstanceCreated { id, .. } => Some(*id),
            Event::BookableSet { instance_id, .. }
            | Event::BookingCreated { instance_id, .. }
            | Event::BookingDeleted { instance_id, .. } => Some(*instance_id),
            Event::ResourceTypeCreated { .. } => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTypeInfo {
    pub id: TypeId,
    pub name: String,
    pub instance_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub id: InstanceId,
    pub name: String,
    pub resource_type_id: TypeId,
    pub is_bookable: bool,
}

/// A booking joined with the names of its type and instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingInfo {
    pub booking_id: Ulid,
    pub date: NaiveDate,
    pub time_slot: Slot,
    pub resource_type_id: TypeId,
    pub resource_type: String,
    pub resource_instance_id: InstanceId,
    pub resource_name: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookableStatus {
    pub resource_instance_id: InstanceId,
    pub is_bookable: bool,
}
