use chrono::NaiveDate;

use crate::model::TypeId;
use crate::slot::{InvalidDate, InvalidSlot, Slot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    ResourceType,
    Instance,
    Booking,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Entity::ResourceType => "resource type",
            Entity::Instance => "resource",
            Entity::Booking => "booking",
        })
    }
}

#[derive(Debug)]
pub enum EngineError {
    /// No bookable instance of the type is free for the date and slot.
    /// Also returned when a concurrent request claimed the last one first.
    NoAvailability {
        resource_type_id: TypeId,
        date: NaiveDate,
        slot: Slot,
    },
    NotFound(Entity, String),
    AlreadyExists(Entity, String),
    InvalidSlot(String),
    InvalidDate(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn not_found(entity: Entity, id: impl ToString) -> Self {
        EngineError::NotFound(entity, id.to_string())
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NoAvailability { date, slot, .. } => {
                write!(f, "slot {slot} on {date} is no longer available, pick another")
            }
            EngineError::NotFound(entity, id) => write!(f, "{entity} not found: {id}"),
            EngineError::AlreadyExists(entity, id) => write!(f, "{entity} already exists: {id}"),
            EngineError::InvalidSlot(raw) => write!(f, "invalid time slot: {raw:?}"),
            EngineError::InvalidDate(raw) => write!(f, "invalid date: {raw:?}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<InvalidSlot> for EngineError {
    fn from(e: InvalidSlot) -> Self {
        EngineError::InvalidSlot(e.0)
    }
}

impl From<InvalidDate> for EngineError {
    fn from(e: InvalidDate) -> Self {
        EngineError::InvalidDate(e.0)
    }
}
