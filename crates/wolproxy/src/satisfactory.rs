//! Satisfactory UDP surface.
//!
//! The game speaks an opaque datagram protocol over three ports, so
//! presence is inferred purely from datagram arrival: the first packet
//! from an unseen source counts as a client showing up. While the host is
//! live, datagrams are relayed as-is; source addresses are not preserved,
//! the session is end-to-end once the identity migrates.

use crate::proxy::{ProxyEvent, ProxyState};
use crate::stats::Stats;
use dashmap::DashMap;
use log::{info, trace, warn};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

/// Sources silent for this long are forgotten; their next datagram counts
/// as a new client again.
const CLIENT_EXPIRY: Duration = Duration::from_secs(300);

const RECV_BUFFER_SIZE: usize = 2048;

pub struct SatisfactoryHandler {
    target_ip: Ipv4Addr,
    send_timeout: Duration,
    state_rx: watch::Receiver<ProxyState>,
    events: mpsc::Sender<ProxyEvent>,
    stats: Arc<Stats>,
}

impl SatisfactoryHandler {
    pub fn new(
        target_ip: Ipv4Addr,
        send_timeout: Duration,
        state_rx: watch::Receiver<ProxyState>,
        events: mpsc::Sender<ProxyEvent>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            target_ip,
            send_timeout,
            state_rx,
            events,
            stats,
        }
    }

    /// Listener loop for one port. The client map is per-port and only
    /// ever touched from this task.
    pub async fn listen(self: Arc<Self>, port: u16) -> std::io::Result<()> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
        let egress = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        info!("Satisfactory UDP listener started on port {}", port);

        let clients: DashMap<SocketAddr, Instant> = DashMap::new();
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        loop {
            let (len, source) = socket.recv_from(&mut buf).await?;
            self.stats.record_udp_packet();

            if note_client(&clients, source, Instant::now()) {
                self.stats.record_satisfactory_flow();
                info!("New Satisfactory client {} on port {}", source, port);
                let _ = self
                    .events
                    .send(ProxyEvent::ClientPresent { port, source })
                    .await;
            }

            trace!(
                "Satisfactory datagram from {} on port {}: {} bytes",
                source, port, len
            );

            if *self.state_rx.borrow() == ProxyState::Proxying {
                let destination = (self.target_ip, port);
                match timeout(self.send_timeout, egress.send_to(&buf[..len], destination)).await {
                    Ok(Ok(_)) => {
                        self.stats.record_udp_forwarded();
                        trace!("Forwarded datagram from {} to {}:{}", source, self.target_ip, port);
                    }
                    Ok(Err(e)) => {
                        warn!("Failed to forward datagram to {}:{}: {}", self.target_ip, port, e);
                    }
                    Err(_) => {
                        warn!("Timed out forwarding datagram to {}:{}", self.target_ip, port);
                    }
                }
            } else {
                trace!("Datagram from {} dropped (server not ready)", source);
            }
        }
    }
}

/// Expires stale sources, then records this one. Returns true when the
/// source was not in the active set.
fn note_client(clients: &DashMap<SocketAddr, Instant>, source: SocketAddr, now: Instant) -> bool {
    clients.retain(|_, last_seen| now.duration_since(*last_seen) < CLIENT_EXPIRY);
    clients.insert(source, now).is_none()
}
