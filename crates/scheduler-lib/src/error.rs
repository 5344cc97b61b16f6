//! Errors surfaced by a placement attempt

use crate::cluster::ClusterError;
use crate::models::PodRef;
use crate::monitor::MonitorError;
use thiserror::Error;

/// Why a queued pod was left unscheduled
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error("no node can host {pod}: no node reports usage")]
    Infeasible { pod: PodRef },

    #[error("binding {pod} to {node} failed")]
    Bind {
        pod: PodRef,
        node: String,
        #[source]
        source: ClusterError,
    },
}

impl ScheduleError {
    /// Short label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ScheduleError::Monitor(_) => "monitor_unavailable",
            ScheduleError::Infeasible { .. } => "infeasible",
            ScheduleError::Bind { .. } => "bind_failure",
        }
    }
}
