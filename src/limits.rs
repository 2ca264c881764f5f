//! Hard limits on client-controlled input.

pub const MAX_TENANTS: usize = 64;
pub const MAX_TENANT_NAME_LEN: usize = 64;
pub const MAX_USER_ID_LEN: usize = 128;
pub const MAX_NAME_LEN: usize = 256;

/// Bookings further than this many days from today are refused.
pub const MAX_DAYS_AHEAD: i64 = 366;

/// Per-channel buffer before a slow realtime subscriber starts lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
