//! Status and health endpoint for operators and watchdogs.

use crate::config::Config;
use crate::identity::IdentityManager;
use crate::monitor::ServerMonitor;
use crate::proxy::ProxyState;
use crate::stats::Stats;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use log::info;
use serde::Serialize;
use serde_json::{Value, json};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Effective configuration summary echoed by `/status`.
#[derive(Debug, Serialize, Clone)]
pub struct ConfigInfo {
    pub target_ip: String,
    pub mac_address: String,
    pub minecraft_enabled: bool,
    pub minecraft_port: Option<u16>,
    pub satisfactory_enabled: bool,
    pub satisfactory_ports: Vec<u16>,
    pub boot_wait_seconds: u64,
    pub health_check_interval: u64,
}

impl ConfigInfo {
    pub fn from_config(config: &Config) -> Self {
        Self {
            target_ip: config.server.target_ip.clone(),
            mac_address: config.server.mac_address.clone(),
            minecraft_enabled: config.minecraft.enabled,
            minecraft_port: config.minecraft.enabled.then_some(config.minecraft.port),
            satisfactory_enabled: config.satisfactory.enabled,
            satisfactory_ports: if config.satisfactory.enabled {
                config.satisfactory.ports().to_vec()
            } else {
                Vec::new()
            },
            boot_wait_seconds: config.timing.boot_wait_seconds,
            health_check_interval: config.timing.health_check_interval,
        }
    }
}

pub struct StatusContext {
    state_rx: watch::Receiver<ProxyState>,
    monitor: Arc<ServerMonitor>,
    identity: Arc<IdentityManager>,
    stats: Arc<Stats>,
    config_info: ConfigInfo,
}

impl StatusContext {
    pub fn new(
        state_rx: watch::Receiver<ProxyState>,
        monitor: Arc<ServerMonitor>,
        identity: Arc<IdentityManager>,
        stats: Arc<Stats>,
        config: &Config,
    ) -> Self {
        Self {
            state_rx,
            monitor,
            identity,
            stats,
            config_info: ConfigInfo::from_config(config),
        }
    }

    fn status_document(&self) -> Value {
        json!({
            "status": "running",
            "proxy": {
                "proxy_state": *self.state_rx.borrow(),
                "server_health": self.monitor.health(),
                "ip_bound": self.identity.is_bound(),
                "statistics": self.stats.snapshot(),
                "monitor": self.monitor.snapshot(),
            },
            "config": self.config_info,
        })
    }
}

pub fn router(context: Arc<StatusContext>) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/health", get(get_health))
        .route("/", get(get_status))
        .with_state(context)
}

pub async fn serve(context: Arc<StatusContext>, port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
    info!("Status endpoint listening on port {}", port);
    axum::serve(listener, router(context)).await
}

async fn get_status(State(context): State<Arc<StatusContext>>) -> Json<Value> {
    Json(context.status_document())
}

async fn get_health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_context() -> StatusContext {
        let config = Config::default();
        let stats = Arc::new(Stats::new());
        let monitor = Arc::new(ServerMonitor::new(
            "192.168.1.100".parse().unwrap(),
            config.minecraft.port,
            Duration::from_secs(5),
            Duration::from_secs(15),
            Arc::clone(&stats),
        ));
        let identity = Arc::new(IdentityManager::new(
            "192.168.1.100".parse().unwrap(),
            24,
            "eth0".into(),
        ));
        let (_state_tx, state_rx) = watch::channel(ProxyState::Offline);

        StatusContext::new(state_rx, monitor, identity, stats, &config)
    }

    #[test]
    fn status_document_shape() {
        let context = test_context();
        let document = context.status_document();

        assert_eq!(document["status"], "running");
        assert_eq!(document["proxy"]["proxy_state"], "offline");
        assert_eq!(document["proxy"]["server_health"], "unknown");
        assert_eq!(document["proxy"]["ip_bound"], false);
        assert_eq!(document["proxy"]["statistics"]["wake_attempts"], 0);
        assert_eq!(document["config"]["target_ip"], "192.168.1.100");
        assert_eq!(document["config"]["minecraft_port"], 25565);
    }

    #[test]
    fn config_info_hides_disabled_surfaces() {
        let mut config = Config::default();
        config.satisfactory.enabled = false;
        let info = ConfigInfo::from_config(&config);

        assert!(info.satisfactory_ports.is_empty());
        assert_eq!(info.minecraft_port, Some(25565));
    }
}
