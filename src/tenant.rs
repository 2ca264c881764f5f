use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::limits::*;
use crate::notify::{RealtimeEvent, Subscription};

const STATUS_UNKNOWN: u8 = 0;
const STATUS_OFFLINE: u8 = 1;
const STATUS_ONLINE: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantError {
    Empty,
    NameTooLong,
    TooMany,
}

impl std::fmt::Display for TenantError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TenantError::Empty => write!(f, "empty tenant name"),
            TenantError::NameTooLong => write!(f, "tenant name too long"),
            TenantError::TooMany => write!(f, "too many tenants"),
        }
    }
}

impl std::error::Error for TenantError {}

/// Subscribers of one tenant's telemetry plus the last announced relay status.
pub struct TenantGroup {
    slug: String,
    sender: broadcast::Sender<RealtimeEvent>,
    status: AtomicU8,
    /// Fed by the relay; kept even with no subscribers.
    pinned: AtomicBool,
}

impl TenantGroup {
    fn new(slug: String) -> Self {
        Self {
            slug,
            sender: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            status: AtomicU8::new(STATUS_UNKNOWN),
            pinned: AtomicBool::new(false),
        }
    }

    fn is_idle(&self) -> bool {
        !self.pinned.load(Ordering::Acquire) && self.subscriber_count() == 0
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription::new(self.sender.subscribe(), "tenant")
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// `None` until the relay has reported at least once.
    pub fn status(&self) -> Option<bool> {
        match self.status.load(Ordering::Acquire) {
            STATUS_ONLINE => Some(true),
            STATUS_OFFLINE => Some(false),
            _ => None,
        }
    }

    /// Forward an upstream measurement to this tenant's subscribers.
    pub fn publish_measurement(&self, payload: serde_json::Value) {
        let _ = self.sender.send(RealtimeEvent::MeasurementReceived(payload));
    }

    /// Record the relay status and announce it, but only on a transition.
    /// Returns whether an announcement was made.
    pub fn set_status(&self, online: bool) -> bool {
        let next = if online { STATUS_ONLINE } else { STATUS_OFFLINE };
        if self.status.swap(next, Ordering::AcqRel) == next {
            return false;
        }
        let _ = self.sender.send(RealtimeEvent::IotStatusChanged { online });
        true
    }
}

/// Tenant groups keyed by sanitized slug.
///
/// Groups are created when a client joins and removed once their last
/// subscriber leaves, unless pinned. Idle groups are also swept when the
/// registry is full, so abandoned names never lock out new tenants.
pub struct TenantRegistry {
    groups: DashMap<String, Arc<TenantGroup>>,
}

impl Default for TenantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
        }
    }

    /// Keep alphanumerics, `_` and `-`; reject what is left if empty or too long.
    pub fn sanitize(tenant: &str) -> Result<String, TenantError> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(TenantError::NameTooLong);
        }
        let safe: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe.is_empty() {
            return Err(TenantError::Empty);
        }
        Ok(safe)
    }

    pub fn get(&self, tenant: &str) -> Option<Arc<TenantGroup>> {
        let slug = Self::sanitize(tenant).ok()?;
        self.groups.get(&slug).map(|g| g.value().clone())
    }

    pub fn get_or_create(&self, tenant: &str) -> Result<Arc<TenantGroup>, TenantError> {
        let slug = Self::sanitize(tenant)?;
        self.make_room_for(&slug)?;
        let group = self
            .groups
            .entry(slug.clone())
            .or_insert_with(|| Arc::new(TenantGroup::new(slug)))
            .value()
            .clone();
        self.record_size();
        Ok(group)
    }

    /// Create the group if needed and keep it for the life of the process.
    pub fn pin(&self, tenant: &str) -> Result<Arc<TenantGroup>, TenantError> {
        let group = self.get_or_create(tenant)?;
        group.pinned.store(true, Ordering::Release);
        Ok(group)
    }

    /// Subscribe to `tenant`, creating its group if needed.
    ///
    /// The subscription is taken while the map entry is held, so a concurrent
    /// `leave` or sweep cannot remove the group in between.
    pub fn join(&self, tenant: &str) -> Result<(Arc<TenantGroup>, Subscription), TenantError> {
        let slug = Self::sanitize(tenant)?;
        self.make_room_for(&slug)?;
        let joined = {
            let entry = self
                .groups
                .entry(slug.clone())
                .or_insert_with(|| Arc::new(TenantGroup::new(slug)));
            let group = entry.value().clone();
            let subscription = group.subscribe();
            (group, subscription)
        };
        self.record_size();
        Ok(joined)
    }

    /// Drop `group` from the registry if nobody is subscribed any more.
    /// Call after the leaving client's subscription has been dropped.
    pub fn leave(&self, group: &TenantGroup) {
        if self
            .groups
            .remove_if(group.slug(), |_, g| g.is_idle())
            .is_some()
        {
            tracing::debug!(tenant = group.slug(), "tenant group removed");
            self.record_size();
        }
    }

    fn make_room_for(&self, slug: &str) -> Result<(), TenantError> {
        if self.groups.contains_key(slug) || self.groups.len() < MAX_TENANTS {
            return Ok(());
        }
        self.groups.retain(|_, g| !g.is_idle());
        self.record_size();
        if self.groups.len() < MAX_TENANTS {
            Ok(())
        } else {
            Err(TenantError::TooMany)
        }
    }

    fn record_size(&self) {
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.groups.len() as f64);
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tenant_isolation() {
        let reg = TenantRegistry::new();
        let a = reg.get_or_create("tenant_a").unwrap();
        let b = reg.get_or_create("tenant_b").unwrap();
        let mut rx_a = a.subscribe();
        let mut rx_b = b.subscribe();

        a.publish_measurement(serde_json::json!({"deviceId": "d1"}));
        b.publish_measurement(serde_json::json!({"deviceId": "d2"}));

        assert_eq!(
            rx_a.recv().await,
            Some(RealtimeEvent::MeasurementReceived(serde_json::json!({"deviceId": "d1"})))
        );
        assert_eq!(
            rx_b.recv().await,
            Some(RealtimeEvent::MeasurementReceived(serde_json::json!({"deviceId": "d2"})))
        );
    }

    #[test]
    fn same_group_returned() {
        let reg = TenantRegistry::new();
        let g1 = reg.get_or_create("foo").unwrap();
        let g2 = reg.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&g1, &g2));
        assert!(reg.get("foo").is_some());
        assert!(reg.get("bar").is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn tenant_name_sanitized() {
        let reg = TenantRegistry::new();
        let g = reg.get_or_create("../evil").unwrap();
        assert_eq!(g.slug(), "evil");
        assert_eq!(reg.get_or_create("../..").err(), Some(TenantError::Empty));
    }

    #[test]
    fn tenant_name_too_long() {
        let reg = TenantRegistry::new();
        let err = reg.get_or_create(&"x".repeat(MAX_TENANT_NAME_LEN + 1)).err().unwrap();
        assert_eq!(err, TenantError::NameTooLong);
        assert!(reg.get_or_create(&"x".repeat(MAX_TENANT_NAME_LEN)).is_ok());
    }

    #[test]
    fn tenant_count_limit() {
        let reg = TenantRegistry::new();
        let mut subs = Vec::new();
        for i in 0..MAX_TENANTS {
            subs.push(reg.join(&format!("t{i}")).unwrap());
        }
        let err = reg.join("one_more").err().unwrap();
        assert!(err.to_string().contains("too many tenants"));
        // existing groups are still reachable at the limit
        assert!(reg.join("t0").is_ok());
        assert!(reg.get_or_create("t1").is_ok());
    }

    #[test]
    fn abandoned_names_do_not_lock_out_the_default_tenant() {
        let reg = TenantRegistry::new();
        reg.pin("innovia").unwrap();
        for i in 0..MAX_TENANTS * 2 {
            let (_group, sub) = reg.join(&format!("junk{i}")).unwrap();
            drop(sub);
        }
        assert!(reg.len() <= MAX_TENANTS);

        let (group, _sub) = reg.join("innovia").unwrap();
        assert!(Arc::ptr_eq(&group, &reg.get("innovia").unwrap()));
        assert!(reg.join("fresh").is_ok());
    }

    #[test]
    fn leave_removes_only_idle_unpinned_groups() {
        let reg = TenantRegistry::new();
        let (acme, first) = reg.join("acme").unwrap();
        let (_, second) = reg.join("acme").unwrap();

        drop(first);
        reg.leave(&acme);
        assert!(reg.get("acme").is_some());

        drop(second);
        reg.leave(&acme);
        assert!(reg.get("acme").is_none());

        let pinned = reg.pin("innovia").unwrap();
        let (_, sub) = reg.join("innovia").unwrap();
        drop(sub);
        reg.leave(&pinned);
        assert!(reg.get("innovia").is_some());
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn status_is_edge_triggered() {
        let reg = TenantRegistry::new();
        let g = reg.get_or_create("innovia").unwrap();
        let mut rx = g.subscribe();
        assert_eq!(g.status(), None);

        assert!(g.set_status(false));
        assert!(!g.set_status(false));
        assert!(!g.set_status(false));
        assert!(g.set_status(true));
        assert!(!g.set_status(true));
        assert_eq!(g.status(), Some(true));

        assert_eq!(rx.recv().await, Some(RealtimeEvent::IotStatusChanged { online: false }));
        assert_eq!(rx.recv().await, Some(RealtimeEvent::IotStatusChanged { online: true }));
        g.publish_measurement(serde_json::json!(1));
        assert_eq!(rx.recv().await, Some(RealtimeEvent::MeasurementReceived(serde_json::json!(1))));
    }
}
