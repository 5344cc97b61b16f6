//! Health tracking for the scheduler's long-running components
//!
//! Backs the `/healthz` and `/readyz` endpoints served by the daemon.
//! Telemetry outages only degrade the scheduler: decisions fail but the
//! process keeps watching. Losing the cluster, the watch loop or the worker
//! pool makes it unready.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Parts of the scheduler that report health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    /// Admission queue and worker pool
    Pipeline,
    /// Pod watch loop
    Reconciler,
    /// Telemetry backend
    Monitor,
    /// Cluster API
    Cluster,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::Pipeline,
        Component::Reconciler,
        Component::Monitor,
        Component::Cluster,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Pipeline => "pipeline",
            Component::Reconciler => "reconciler",
            Component::Monitor => "monitor",
            Component::Cluster => "cluster",
        }
    }

    /// Whether failure of this component stops scheduling altogether
    pub fn is_critical(&self) -> bool {
        !matches!(self, Component::Monitor)
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state of one component and when it last changed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub since: DateTime<Utc>,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            since: Utc::now(),
        }
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct HealthState {
    components: BTreeMap<Component, ComponentHealth>,
    started: bool,
}

impl HealthState {
    /// Unhealthy critical components fail the scheduler; anything else
    /// short of healthy only degrades it
    fn overall(&self) -> ComponentStatus {
        let mut overall = ComponentStatus::Healthy;
        for (component, health) in &self.components {
            match health.status {
                ComponentStatus::Unhealthy if component.is_critical() => {
                    return ComponentStatus::Unhealthy
                }
                ComponentStatus::Healthy => {}
                _ => overall = ComponentStatus::Degraded,
            }
        }
        overall
    }

    fn first_critical_failure(&self) -> Option<(Component, &ComponentHealth)> {
        self.components
            .iter()
            .find(|(c, h)| c.is_critical() && h.status == ComponentStatus::Unhealthy)
            .map(|(c, h)| (*c, h))
    }
}

/// Shared health state behind the HTTP health endpoints
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track every component, starting healthy
    pub async fn register_all(&self) {
        let mut state = self.state.write().await;
        for component in Component::ALL {
            state
                .components
                .insert(component, ComponentHealth::new(ComponentStatus::Healthy, None));
        }
    }

    pub async fn status(&self, component: Component) -> Option<ComponentStatus> {
        self.state
            .read()
            .await
            .components
            .get(&component)
            .map(|h| h.status)
    }

    /// Record a status; returns `false` when it was already current
    ///
    /// Transitions are logged once, repeats keep the original `since`.
    pub async fn set(
        &self,
        component: Component,
        status: ComponentStatus,
        message: Option<String>,
    ) -> bool {
        let mut state = self.state.write().await;
        if let Some(current) = state.components.get(&component) {
            if current.status == status && current.message == message {
                return false;
            }
        }

        match status {
            ComponentStatus::Healthy => info!(component = %component, "Component healthy"),
            _ => warn!(
                component = %component,
                status = ?status,
                message = message.as_deref().unwrap_or_default(),
                "Component health changed"
            ),
        }
        state
            .components
            .insert(component, ComponentHealth::new(status, message));
        true
    }

    pub async fn set_healthy(&self, component: Component) -> bool {
        self.set(component, ComponentStatus::Healthy, None).await
    }

    pub async fn set_degraded(&self, component: Component, message: impl Into<String>) -> bool {
        self.set(component, ComponentStatus::Degraded, Some(message.into()))
            .await
    }

    pub async fn set_unhealthy(&self, component: Component, message: impl Into<String>) -> bool {
        self.set(component, ComponentStatus::Unhealthy, Some(message.into()))
            .await
    }

    /// Mark startup finished (snapshot built, workers running) or shutting down
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.started = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        HealthResponse {
            status: state.overall(),
            components: state.components.clone(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;

        let reason = if !state.started {
            Some("Scheduler not yet initialized".to_string())
        } else {
            state.first_critical_failure().map(|(component, health)| {
                format!(
                    "{component} unhealthy: {}",
                    health.message.as_deref().unwrap_or("no detail")
                )
            })
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}
