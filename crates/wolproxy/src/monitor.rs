//! Liveness probing of the real host.
//!
//! A probe is a plain TCP connect to the Minecraft port: the host binds it
//! only once the game service is genuinely up, and unlike the UDP ports it
//! cannot be answered by other equipment on the path, so it is the
//! authoritative liveness signal.

use crate::proxy::ProxyEvent;
use crate::stats::Stats;
use log::{debug, info};
use serde::Serialize;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerHealth {
    Offline,
    Online,
    Unknown,
}

impl fmt::Display for ServerHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerHealth::Offline => write!(f, "offline"),
            ServerHealth::Online => write!(f, "online"),
            ServerHealth::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Default)]
struct MonitorCounters {
    total_checks: AtomicU64,
    successful_checks: AtomicU64,
    failed_checks: AtomicU64,
    consecutive_successes: AtomicU64,
    consecutive_failures: AtomicU64,
}

#[derive(Debug, Serialize, Clone)]
pub struct MonitorSnapshot {
    pub total_checks: u64,
    pub successful_checks: u64,
    pub failed_checks: u64,
    pub consecutive_successes: u64,
    pub consecutive_failures: u64,
}

pub struct ServerMonitor {
    target: SocketAddr,
    probe_timeout: Duration,
    poll_interval: Duration,
    health_tx: watch::Sender<ServerHealth>,
    counters: MonitorCounters,
    stats: Arc<Stats>,
}

impl ServerMonitor {
    pub fn new(
        target_ip: Ipv4Addr,
        probe_port: u16,
        probe_timeout: Duration,
        poll_interval: Duration,
        stats: Arc<Stats>,
    ) -> Self {
        let (health_tx, _) = watch::channel(ServerHealth::Unknown);
        Self {
            target: SocketAddr::V4(SocketAddrV4::new(target_ip, probe_port)),
            probe_timeout,
            poll_interval,
            health_tx,
            counters: MonitorCounters::default(),
            stats,
        }
    }

    pub fn health(&self) -> ServerHealth {
        *self.health_tx.borrow()
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            total_checks: self.counters.total_checks.load(Ordering::Relaxed),
            successful_checks: self.counters.successful_checks.load(Ordering::Relaxed),
            failed_checks: self.counters.failed_checks.load(Ordering::Relaxed),
            consecutive_successes: self.counters.consecutive_successes.load(Ordering::Relaxed),
            consecutive_failures: self.counters.consecutive_failures.load(Ordering::Relaxed),
        }
    }

    /// One TCP probe. Reachable means the connect completed within the
    /// timeout; the connection is dropped immediately afterwards.
    pub async fn probe_once(&self) -> bool {
        match timeout(self.probe_timeout, TcpStream::connect(self.target)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                debug!("Host {} reachable", self.target);
                true
            }
            Ok(Err(e)) => {
                debug!("Host {} not reachable: {}", self.target, e);
                false
            }
            Err(_) => {
                debug!("Probe of {} timed out", self.target);
                false
            }
        }
    }

    /// Folds one probe result into the health classification. Returns the
    /// transition when the health changed; a single probe in either
    /// direction is enough to flip the state.
    fn classify(&self, reachable: bool) -> Option<(ServerHealth, ServerHealth)> {
        self.counters.total_checks.fetch_add(1, Ordering::Relaxed);
        let current = if reachable {
            self.counters.successful_checks.fetch_add(1, Ordering::Relaxed);
            self.counters.consecutive_failures.store(0, Ordering::Relaxed);
            self.counters.consecutive_successes.fetch_add(1, Ordering::Relaxed);
            ServerHealth::Online
        } else {
            self.counters.failed_checks.fetch_add(1, Ordering::Relaxed);
            self.counters.consecutive_successes.store(0, Ordering::Relaxed);
            self.counters.consecutive_failures.fetch_add(1, Ordering::Relaxed);
            ServerHealth::Offline
        };

        let previous = *self.health_tx.borrow();
        if previous == current {
            return None;
        }
        self.health_tx.send_replace(current);
        Some((previous, current))
    }

    /// The long-running probe loop. Health transitions are posted to the
    /// coordinator, one event per change, in order.
    pub async fn run(self: Arc<Self>, events: mpsc::Sender<ProxyEvent>) {
        info!(
            "Server monitoring started (interval: {}s)",
            self.poll_interval.as_secs()
        );

        loop {
            let reachable = self.probe_once().await;
            if let Some((previous, current)) = self.classify(reachable) {
                info!("Server health changed: {} -> {}", previous, current);
                self.stats.record_health_change();
                if events
                    .send(ProxyEvent::HealthChanged { previous, current })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            sleep(self.poll_interval).await;
        }
    }

    /// One-shot poll used during the boot window. Probes directly without
    /// touching the health classification, so it can run concurrently with
    /// the monitor loop.
    pub async fn wait_for_online(&self, max_wait: Duration, interval: Duration) -> bool {
        let start = Instant::now();

        loop {
            if self.probe_once().await {
                info!(
                    "Host came online after {:.1} seconds",
                    start.elapsed().as_secs_f64()
                );
                return true;
            }
            if start.elapsed() >= max_wait {
                return false;
            }
            sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn test_monitor(target_ip: Ipv4Addr, port: u16, timeout: Duration) -> ServerMonitor {
        ServerMonitor::new(
            target_ip,
            port,
            timeout,
            Duration::from_secs(15),
            Arc::new(Stats::new()),
        )
    }

    #[test]
    fn single_probe_flips_health_both_ways() {
        let monitor = test_monitor(Ipv4Addr::LOCALHOST, 25565, Duration::from_secs(5));
        assert_eq!(monitor.health(), ServerHealth::Unknown);

        assert_eq!(
            monitor.classify(true),
            Some((ServerHealth::Unknown, ServerHealth::Online))
        );
        assert_eq!(monitor.classify(true), None);
        assert_eq!(
            monitor.classify(false),
            Some((ServerHealth::Online, ServerHealth::Offline))
        );
        assert_eq!(
            monitor.classify(true),
            Some((ServerHealth::Offline, ServerHealth::Online))
        );
    }

    #[test]
    fn consecutive_counters_reset_on_flip() {
        let monitor = test_monitor(Ipv4Addr::LOCALHOST, 25565, Duration::from_secs(5));
        monitor.classify(false);
        monitor.classify(false);
        monitor.classify(true);

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.total_checks, 3);
        assert_eq!(snapshot.failed_checks, 2);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.consecutive_successes, 1);
    }

    #[tokio::test]
    async fn probe_succeeds_against_listening_port() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let monitor = test_monitor(Ipv4Addr::LOCALHOST, port, Duration::from_secs(5));
        assert!(monitor.probe_once().await);
    }

    #[tokio::test]
    async fn probe_fails_against_closed_port() {
        // Bind and drop to find a port nothing is listening on.
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let monitor = test_monitor(Ipv4Addr::LOCALHOST, port, Duration::from_secs(1));
        assert!(!monitor.probe_once().await);
    }
}
