use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use tracing::warn;

/// Health reporting for the long-running loops of a service.
///
/// Each loop registers itself with a deadline and must call
/// [`HealthHandle::report_healthy`] more often than that deadline, or the
/// process is reported unhealthy. The process is healthy only when every
/// registered component is.
///
/// Liveness and readiness are distinct k8s concepts; use a separate registry
/// per probe rather than merging them.
#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Set when a component registers, before its first report.
    Starting,
    /// Healthy until the deadline passes without a new report.
    HealthyUntil(DateTime<Utc>),
    /// Explicitly reported unhealthy.
    Unhealthy,
}

impl ComponentStatus {
    fn healthy_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self, ComponentStatus::HealthyUntil(until) if *until > now)
    }
}

#[derive(Default, Debug)]
pub struct HealthStatus {
    /// True only if every registered component is currently healthy.
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

/// Handed to a component so it can report its own status.
#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

impl HealthHandle {
    /// Report healthy until `deadline` from now. Must be called more
    /// frequently than the deadline.
    pub fn report_healthy(&self) {
        let until = Utc::now()
            + chrono::Duration::from_std(self.deadline).unwrap_or(chrono::Duration::zero());
        self.report_status(ComponentStatus::HealthyUntil(until));
    }

    pub fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut map) => {
                map.insert(self.component.clone(), status);
            }
            // Poisoned lock: warn and let the probe fail, the process will restart.
            Err(_) => warn!(component = %self.component, "poisoned HealthRegistry lock"),
        }
    }
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    /// Register a component; the returned handle is passed to the component
    /// so it can report on its own schedule.
    pub fn register(&self, component: &str, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.to_owned(),
            deadline,
            components: self.components.clone(),
        };
        handle.report_status(ComponentStatus::Starting);
        handle
    }

    /// Overall process status; usable directly as an axum handler result.
    pub fn get_status(&self) -> HealthStatus {
        let Ok(components) = self.components.read() else {
            warn!(registry = %self.name, "poisoned HealthRegistry lock");
            return HealthStatus::default();
        };

        let now = Utc::now();
        let healthy = !components.is_empty() && components.values().all(|s| s.healthy_at(now));

        HealthStatus {
            healthy,
            components: components.clone(),
        }
    }
}
