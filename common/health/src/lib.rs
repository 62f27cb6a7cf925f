//! A small liveness registry.
//!
//! Components register themselves with a time-to-live; the registry is
//! considered healthy as a whole only if every registered component has
//! reported within its TTL. This is used by the worker's poll loop and
//! webhook-retry loop to back a `/_liveness` endpoint without either loop
//! needing to know about the other.

use std::collections::HashMap;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct ComponentState {
    last_reported: OffsetDateTime,
    ttl: time::Duration,
}

impl ComponentState {
    fn is_healthy(&self, now: OffsetDateTime) -> bool {
        now - self.last_reported < self.ttl
    }
}

/// Aggregate health across all registered components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub healthy: bool,
}

#[derive(Debug, Default)]
struct Inner {
    components: HashMap<String, ComponentState>,
}

/// Process-wide registry of components that must report liveness.
#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    inner: Arc<RwLock<Inner>>,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Register a new component and get a handle it can use to report health.
    pub async fn register(&self, component_name: String, ttl: time::Duration) -> HealthHandle {
        let now = OffsetDateTime::now_utc();
        {
            let mut inner = self.inner.write().await;
            inner.components.insert(
                component_name.clone(),
                ComponentState {
                    last_reported: now,
                    ttl,
                },
            );
        }

        HealthHandle {
            component_name,
            inner: self.inner.clone(),
        }
    }

    /// Returns the aggregate status: healthy iff every registered component
    /// has reported within its TTL.
    pub async fn get_status(&self) -> Status {
        let inner = self.inner.read().await;
        let now = OffsetDateTime::now_utc();

        let healthy = !inner.components.is_empty()
            && inner.components.values().all(|c| c.is_healthy(now));

        Status { healthy }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A handle a single component uses to report that it is still alive.
#[derive(Clone)]
pub struct HealthHandle {
    component_name: String,
    inner: Arc<RwLock<Inner>>,
}

impl HealthHandle {
    pub async fn report_healthy(&self) {
        let mut inner = self.inner.write().await;
        if let Some(state) = inner.components.get_mut(&self.component_name) {
            state.last_reported = OffsetDateTime::now_utc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn healthy_after_report() {
        let registry = HealthRegistry::new("test");
        let handle = registry
            .register("worker".to_string(), time::Duration::seconds(30))
            .await;

        handle.report_healthy().await;

        assert!(registry.get_status().await.healthy);
    }

    #[tokio::test]
    async fn unhealthy_before_any_report_has_expired() {
        let registry = HealthRegistry::new("test");
        let _handle = registry
            .register("worker".to_string(), time::Duration::seconds(-1))
            .await;

        assert!(!registry.get_status().await.healthy);
    }

    #[tokio::test]
    async fn empty_registry_is_unhealthy() {
        let registry = HealthRegistry::new("test");
        assert!(!registry.get_status().await.healthy);
    }
}
