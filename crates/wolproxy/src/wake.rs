//! Wake-on-LAN frame construction and transmission.
//!
//! The magic frame is six 0xFF bytes followed by the target MAC repeated
//! sixteen times. It is fanned out to the directed broadcast, the target
//! address itself and the limited broadcast, on UDP ports 9 and 7 each,
//! so a single filtered path does not lose the wake.

use log::{debug, error, info, warn};
use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::sleep;

pub const MAGIC_FRAME_LEN: usize = 102;

/// Port 9 (discard) is the conventional wake port, 7 (echo) the fallback.
const WAKE_PORTS: [u16; 2] = [9, 7];

#[derive(Error, Debug)]
pub enum WakeError {
    #[error("Invalid MAC address '{value}': {reason}")]
    InvalidMac { value: String, reason: String },
    #[error("Invalid target IP address '{0}'")]
    InvalidAddress(String),
    #[error("Failed to open wake socket: {0}")]
    Socket(#[from] std::io::Error),
    #[error("Wake frame could not be delivered to any destination")]
    AllDestinationsFailed,
}

/// Parses a MAC address in `AA:BB:CC:DD:EE:FF`, `AA-BB-CC-DD-EE-FF` or
/// bare `AABBCCDDEEFF` form.
pub fn parse_mac(mac: &str) -> Result<[u8; 6], WakeError> {
    let cleaned: String = mac.chars().filter(|c| *c != ':' && *c != '-').collect();

    if cleaned.len() != 12 {
        return Err(WakeError::InvalidMac {
            value: mac.to_string(),
            reason: format!("expected 12 hex digits, found {}", cleaned.len()),
        });
    }

    let decoded = hex::decode(&cleaned).map_err(|e| WakeError::InvalidMac {
        value: mac.to_string(),
        reason: e.to_string(),
    })?;

    let mut bytes = [0u8; 6];
    bytes.copy_from_slice(&decoded);
    Ok(bytes)
}

/// Computes the all-ones-host-bits address of `ip`'s subnet. `None` when
/// the prefix is not a valid IPv4 prefix length.
pub fn directed_broadcast(ip: Ipv4Addr, prefix: u8) -> Option<Ipv4Addr> {
    if prefix > 32 {
        return None;
    }
    let mask: u32 = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    Some(Ipv4Addr::from(u32::from(ip) | !mask))
}

pub struct WakeSender {
    target_ip: Ipv4Addr,
    mac: [u8; 6],
    mac_display: String,
    broadcast: Ipv4Addr,
    retry_interval: Duration,
}

impl WakeSender {
    pub fn new(
        target_ip: &str,
        mac_address: &str,
        network_mask: u8,
        retry_interval: Duration,
    ) -> Result<Self, WakeError> {
        let target: Ipv4Addr = target_ip
            .parse()
            .map_err(|_| WakeError::InvalidAddress(target_ip.to_string()))?;
        let mac = parse_mac(mac_address)?;

        let broadcast = match directed_broadcast(target, network_mask) {
            Some(addr) => {
                debug!(
                    "Calculated broadcast address {} for {}/{}",
                    addr, target, network_mask
                );
                addr
            }
            None => {
                warn!(
                    "Could not derive broadcast for {}/{}; falling back to limited broadcast",
                    target, network_mask
                );
                Ipv4Addr::BROADCAST
            }
        };

        Ok(Self {
            target_ip: target,
            mac,
            mac_display: mac_address.to_string(),
            broadcast,
            retry_interval,
        })
    }

    pub fn broadcast_addr(&self) -> Ipv4Addr {
        self.broadcast
    }

    pub fn magic_frame(&self) -> [u8; MAGIC_FRAME_LEN] {
        let mut frame = [0xFFu8; MAGIC_FRAME_LEN];
        for chunk in frame[6..].chunks_exact_mut(6) {
            chunk.copy_from_slice(&self.mac);
        }
        frame
    }

    /// Destinations in fan-out order, deduplicated.
    fn destinations(&self) -> Vec<Ipv4Addr> {
        let mut destinations = vec![self.broadcast];
        for candidate in [self.target_ip, Ipv4Addr::BROADCAST] {
            if !destinations.contains(&candidate) {
                destinations.push(candidate);
            }
        }
        destinations
    }

    /// One full fan-out round. Succeeds if at least one (destination,
    /// port) send went out without an OS error.
    pub async fn send_once(&self) -> Result<(), WakeError> {
        let frame = self.magic_frame();

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;

        let mut delivered = false;
        for destination in self.destinations() {
            for port in WAKE_PORTS {
                match socket.send_to(&frame, (destination, port)).await {
                    Ok(_) => {
                        debug!("Sent wake frame to {}:{}", destination, port);
                        delivered = true;
                    }
                    Err(e) => {
                        warn!("Could not send wake frame to {}:{}: {}", destination, port, e);
                    }
                }
            }
        }

        if delivered {
            info!(
                "Wake-on-LAN frame sent for MAC {} (broadcast: {}, size: {} bytes)",
                self.mac_display,
                self.broadcast,
                frame.len()
            );
            Ok(())
        } else {
            Err(WakeError::AllDestinationsFailed)
        }
    }

    /// Repeats the whole fan-out with a constant delay between rounds.
    pub async fn wake_with_retry(&self, max_retries: u32) -> bool {
        for attempt in 1..=max_retries {
            info!("Sending Wake-on-LAN frame (attempt {}/{})", attempt, max_retries);

            match self.send_once().await {
                Ok(()) => {
                    if attempt > 1 {
                        info!("Wake frame delivered after {} attempts", attempt);
                    }
                    return true;
                }
                Err(e) if attempt < max_retries => {
                    warn!(
                        "Wake send failed ({}), retrying in {}s",
                        e,
                        self.retry_interval.as_secs()
                    );
                    sleep(self.retry_interval).await;
                }
                Err(e) => {
                    error!(
                        "Failed to send Wake-on-LAN frame after {} attempts: {}",
                        max_retries, e
                    );
                }
            }
        }
        false
    }
}
