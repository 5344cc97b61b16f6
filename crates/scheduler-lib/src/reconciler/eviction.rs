//! Bounded-retry deletion of resource-starved pods

use crate::cluster::ClusterClient;
use crate::models::PodRef;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Retry schedule for pod deletion
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Backoff unit; the wait after attempt `i` is `i` units
    pub initial_backoff_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_secs: 2,
        }
    }
}

impl RetryPolicy {
    /// Wait between attempt `attempt` and the next one
    pub fn delay_after(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.initial_backoff_secs) * attempt
    }
}

/// How an eviction ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvictionOutcome {
    Deleted { attempts: u32 },
    Exhausted { attempts: u32, last_error: String },
    /// Shutdown fired while waiting to retry
    Cancelled { attempts: u32 },
}

/// Delete `pod`, retrying with linear backoff
///
/// Stops on the first success. The wait between attempts is abandoned as
/// soon as `shutdown` fires.
pub async fn delete_with_retry(
    cluster: &dyn ClusterClient,
    pod: &PodRef,
    policy: &RetryPolicy,
    shutdown: &mut broadcast::Receiver<()>,
) -> EvictionOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match cluster.delete_pod(pod).await {
            Ok(()) => return EvictionOutcome::Deleted { attempts: attempt },
            Err(e) => {
                last_error = e.to_string();
                if attempt == max_attempts {
                    break;
                }
                let delay = policy.delay_after(attempt);
                warn!(
                    pod = %pod,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    retry_in_secs = delay.as_secs(),
                    error = %e,
                    "Pod deletion failed, retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.recv() => {
                        info!(pod = %pod, attempt = attempt, "Pod deletion cancelled by shutdown");
                        return EvictionOutcome::Cancelled { attempts: attempt };
                    }
                }
            }
        }
    }

    EvictionOutcome::Exhausted {
        attempts: max_attempts,
        last_error,
    }
}
