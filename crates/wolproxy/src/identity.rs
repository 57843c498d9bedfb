//! Ownership of the host's layer-3 identity on the local interface.
//!
//! While the host sleeps, its address lives on our interface so game
//! clients reach the proxy. Both operations shell out to the system
//! `ip` tool and treat "already in the desired state" as success, so the
//! coordinator can re-run them on every state entry.

use log::{debug, error, info};
use std::net::Ipv4Addr;
use std::process::Output;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Failed to run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{command}' failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
}

pub struct IdentityManager {
    target_ip: Ipv4Addr,
    prefix: u8,
    interface: String,
    bound: AtomicBool,
}

impl IdentityManager {
    pub fn new(target_ip: Ipv4Addr, prefix: u8, interface: String) -> Self {
        Self {
            target_ip,
            prefix,
            interface,
            bound: AtomicBool::new(false),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Relaxed)
    }

    fn address_arg(&self) -> String {
        format!("{}/{}", self.target_ip, self.prefix)
    }

    /// Ensures the target address is assigned to the interface.
    pub async fn bind(&self) -> Result<(), IdentityError> {
        let address = self.address_arg();
        let output = run("ip", &["addr", "add", &address, "dev", &self.interface]).await?;

        if output.status.success() {
            self.bound.store(true, Ordering::Relaxed);
            info!("Bound {} to {}", self.target_ip, self.interface);
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
        if stderr.contains("file exists") || stderr.contains("already") {
            self.bound.store(true, Ordering::Relaxed);
            debug!("{} already bound to {}", self.target_ip, self.interface);
            return Ok(());
        }

        Err(IdentityError::CommandFailed {
            command: format!("ip addr add {} dev {}", address, self.interface),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    /// Ensures the target address is no longer assigned to the interface.
    pub async fn release(&self) -> Result<(), IdentityError> {
        if !self.is_bound() {
            debug!("{} not currently bound", self.target_ip);
            return Ok(());
        }

        let address = self.address_arg();
        let output = run("ip", &["addr", "del", &address, "dev", &self.interface]).await?;

        if output.status.success() {
            self.bound.store(false, Ordering::Relaxed);
            info!("Released {} from {}", self.target_ip, self.interface);
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
        if stderr.contains("cannot assign") || stderr.contains("not found") {
            self.bound.store(false, Ordering::Relaxed);
            debug!("{} was not bound to {}", self.target_ip, self.interface);
            return Ok(());
        }

        Err(IdentityError::CommandFailed {
            command: format!("ip addr del {} dev {}", address, self.interface),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    /// Best-effort gratuitous ARP so switches pick up the identity move.
    /// Two frames, bounded runtime, never fatal.
    pub async fn announce(&self) {
        let ip = self.target_ip.to_string();
        let args = ["-c", "2", "-A", "-I", self.interface.as_str(), ip.as_str()];

        let result = timeout(
            ANNOUNCE_TIMEOUT,
            Command::new("arping").args(args).output(),
        )
        .await;

        match result {
            Ok(Ok(output)) if output.status.success() => {
                debug!("Announced {} on {}", self.target_ip, self.interface);
            }
            Ok(Ok(output)) => {
                debug!(
                    "ARP announcement for {} failed (non-critical): {}",
                    self.target_ip,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Ok(Err(e)) => {
                debug!(
                    "ARP announcement for {} failed (non-critical): {}",
                    self.target_ip, e
                );
            }
            Err(_) => {
                debug!(
                    "ARP announcement for {} timed out (non-critical)",
                    self.target_ip
                );
            }
        }
    }
}

async fn run(program: &str, args: &[&str]) -> Result<Output, IdentityError> {
    Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|source| {
            error!("Could not execute '{}': {}", program, source);
            IdentityError::Spawn {
                command: format!("{} {}", program, args.join(" ")),
                source,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_argument_carries_the_prefix() {
        let manager = IdentityManager::new("192.168.1.100".parse().unwrap(), 24, "eth0".into());
        assert_eq!(manager.address_arg(), "192.168.1.100/24");
    }

    #[tokio::test]
    async fn release_without_bind_is_a_no_op() {
        let manager = IdentityManager::new("192.168.1.100".parse().unwrap(), 24, "eth0".into());
        assert!(!manager.is_bound());
        manager.release().await.unwrap();
        assert!(!manager.is_bound());
    }
}
