//! Service-wide counters, incremented from whichever task observed the
//! event. Single atomic per counter; there are no cross-counter
//! invariants.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Default)]
pub struct Stats {
    start_time: AtomicU64,
    wake_attempts: AtomicU64,
    successful_wakes: AtomicU64,
    minecraft_connections: AtomicU64,
    satisfactory_flows: AtomicU64,
    state_transitions: AtomicU64,
    udp_packets_received: AtomicU64,
    udp_packets_forwarded: AtomicU64,
    last_wake_time: AtomicU64,
    last_health_change: AtomicU64,
}

#[derive(Debug, Serialize, Clone)]
pub struct StatsSnapshot {
    pub uptime_seconds: u64,
    pub wake_attempts: u64,
    pub successful_wakes: u64,
    pub minecraft_connections: u64,
    pub satisfactory_flows: u64,
    pub state_transitions: u64,
    pub udp_packets_received: u64,
    pub udp_packets_forwarded: u64,
    pub last_wake_time: Option<u64>,
    pub last_health_change: Option<u64>,
}

impl Stats {
    pub fn new() -> Self {
        let stats = Self::default();
        stats.start_time.store(unix_now(), Ordering::Relaxed);
        stats
    }

    pub fn record_wake_attempt(&self) {
        self.wake_attempts.fetch_add(1, Ordering::Relaxed);
        self.last_wake_time.store(unix_now(), Ordering::Relaxed);
    }

    pub fn record_successful_wake(&self) {
        self.successful_wakes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_minecraft_connection(&self) {
        self.minecraft_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_satisfactory_flow(&self) {
        self.satisfactory_flows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_state_transition(&self) {
        self.state_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_udp_packet(&self) {
        self.udp_packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_udp_forwarded(&self) {
        self.udp_packets_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_health_change(&self) {
        self.last_health_change.store(unix_now(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let nonzero = |value: u64| (value != 0).then_some(value);
        StatsSnapshot {
            uptime_seconds: unix_now().saturating_sub(self.start_time.load(Ordering::Relaxed)),
            wake_attempts: self.wake_attempts.load(Ordering::Relaxed),
            successful_wakes: self.successful_wakes.load(Ordering::Relaxed),
            minecraft_connections: self.minecraft_connections.load(Ordering::Relaxed),
            satisfactory_flows: self.satisfactory_flows.load(Ordering::Relaxed),
            state_transitions: self.state_transitions.load(Ordering::Relaxed),
            udp_packets_received: self.udp_packets_received.load(Ordering::Relaxed),
            udp_packets_forwarded: self.udp_packets_forwarded.load(Ordering::Relaxed),
            last_wake_time: nonzero(self.last_wake_time.load(Ordering::Relaxed)),
            last_health_change: nonzero(self.last_health_change.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_monotonic() {
        let stats = Stats::new();
        assert_eq!(stats.snapshot().wake_attempts, 0);

        stats.record_wake_attempt();
        stats.record_wake_attempt();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.wake_attempts, 2);
        assert_eq!(snapshot.successful_wakes, 0);
        assert!(snapshot.last_wake_time.is_some());
    }

    #[test]
    fn untouched_timestamps_serialize_as_absent() {
        let stats = Stats::new();
        let snapshot = stats.snapshot();
        assert!(snapshot.last_wake_time.is_none());
        assert!(snapshot.last_health_change.is_none());
    }
}
