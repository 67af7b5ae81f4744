//! Health reporting.
//!
//! The orchestrator periodically polls the relay pipeline's
//! `health_check()` and logs a [`DaemonHealth`] snapshot that combines the
//! lifecycle status with queue and distribution counters.

use serde::Serialize;

use tailcast_core::pipeline::HealthStatus;
use tailcast_relay::RelayPipeline;

/// Health snapshot for the whole daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Relay pipeline health status.
    pub status: HealthStatus,
    /// Daemon uptime in seconds since start.
    pub uptime_secs: u64,
    /// Relay counters at the time of the check.
    pub relay: RelayHealth,
}

/// Relay counters included in a health snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelayHealth {
    /// Records waiting in the relay queue.
    pub queue_depth: usize,
    /// Relay queue capacity.
    pub queue_capacity: usize,
    /// Subscribers currently Active.
    pub active_subscribers: usize,
    /// Subscribers attached in any non-Closed state.
    pub attached_subscribers: usize,
    /// Lines accepted by the validator.
    pub valid_lines: u64,
    /// Lines dropped by the validator.
    pub invalid_lines: u64,
    /// Broadcast records published with no Active subscriber.
    pub unrouted: u64,
    /// Slow-subscriber evictions.
    pub evictions: u64,
    /// Records dropped for evicted or closing subscribers.
    pub dropped: u64,
}

impl RelayHealth {
    /// Collect counters from a running pipeline.
    pub fn collect(pipeline: &RelayPipeline) -> Self {
        let queue = pipeline.queue_stats();
        let dist = pipeline.distribution_stats();
        Self {
            queue_depth: queue.depth(),
            queue_capacity: queue.capacity(),
            active_subscribers: dist.active,
            attached_subscribers: dist.attached,
            valid_lines: pipeline.valid_lines(),
            invalid_lines: pipeline.invalid_lines(),
            unrouted: dist.unrouted,
            evictions: dist.evictions,
            dropped: dist.dropped,
        }
    }
}

/// Log a health snapshot at a level matching its status.
pub fn log_health(health: &DaemonHealth) {
    let relay = &health.relay;
    match &health.status {
        HealthStatus::Healthy => tracing::info!(
            uptime_secs = health.uptime_secs,
            queue_depth = relay.queue_depth,
            active_subscribers = relay.active_subscribers,
            valid_lines = relay.valid_lines,
            invalid_lines = relay.invalid_lines,
            unrouted = relay.unrouted,
            evictions = relay.evictions,
            "relay healthy"
        ),
        HealthStatus::Degraded(reason) => tracing::warn!(
            reason = %reason,
            queue_depth = relay.queue_depth,
            queue_capacity = relay.queue_capacity,
            active_subscribers = relay.active_subscribers,
            "relay degraded"
        ),
        HealthStatus::Unhealthy(reason) => tracing::error!(
            reason = %reason,
            uptime_secs = health.uptime_secs,
            "relay unhealthy"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_serializes_with_status_and_counters() {
        let health = DaemonHealth {
            status: HealthStatus::Degraded("relay queue utilization high: 95.0%".to_owned()),
            uptime_secs: 42,
            relay: RelayHealth {
                queue_depth: 95,
                queue_capacity: 100,
                ..RelayHealth::default()
            },
        };
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["uptime_secs"], 42);
        assert_eq!(json["relay"]["queue_depth"], 95);
        assert!(json["status"]["Degraded"].as_str().unwrap().contains("95.0%"));
    }
}
