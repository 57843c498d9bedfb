use error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

pub mod error;

/// Commented reference configuration, written out by `--create-config`.
/// Kept as literal TOML so the comments survive; a test asserts it stays
/// parseable and valid.
const EXAMPLE_CONFIG: &str = r#"# Wake-on-LAN game server proxy configuration.
# All timing values are in seconds.

[server]
# IP address and MAC of the real game server.
target_ip = "192.168.1.100"
mac_address = "AA:BB:CC:DD:EE:FF"
# Interface the proxy binds the server address to while it impersonates.
network_interface = "eth0"
# CIDR prefix used to derive the directed broadcast for wake frames.
network_mask = 24

[timing]
boot_wait_seconds = 90
health_check_interval = 15
wol_retry_interval = 5
connection_timeout = 30
server_check_timeout = 5

[minecraft]
enabled = true
port = 25565
protocol_version = 763
motd_offline = "§aJoin to start server"
motd_starting = "§eServer is starting, please wait"
version_text_starting = "Starting..."
kick_message = "§eServer is starting up, try joining again in a minute."
max_players_display = 20

[satisfactory]
enabled = true
game_port = 7777
query_port = 15000
beacon_port = 15777

[logging]
# trace, debug, info, warn or error.
level = "info"
file = "/var/log/wolproxy.log"
max_size_mb = 10
backup_count = 3
console_output = true

[monitoring]
health_check_enabled = true
status_endpoint_port = 8080
"#;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub timing: TimingConfig,
    pub minecraft: MinecraftConfig,
    pub satisfactory: SatisfactoryConfig,
    pub logging: LoggingConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub target_ip: String,
    pub mac_address: String,
    pub network_interface: String,
    pub network_mask: u8,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TimingConfig {
    pub boot_wait_seconds: u64,
    pub health_check_interval: u64,
    pub wol_retry_interval: u64,
    pub connection_timeout: u64,
    pub server_check_timeout: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MinecraftConfig {
    pub enabled: bool,
    pub port: u16,
    pub protocol_version: i32,
    pub motd_offline: String,
    pub motd_starting: String,
    pub version_text_starting: String,
    pub kick_message: String,
    pub max_players_display: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SatisfactoryConfig {
    pub enabled: bool,
    pub game_port: u16,
    pub query_port: u16,
    pub beacon_port: u16,
}

impl SatisfactoryConfig {
    pub fn ports(&self) -> [u16; 3] {
        [self.game_port, self.query_port, self.beacon_port]
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub max_size_mb: u64,
    pub backup_count: u32,
    pub console_output: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MonitoringConfig {
    pub health_check_enabled: bool,
    pub status_endpoint_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            target_ip: "192.168.1.100".to_string(),
            mac_address: "AA:BB:CC:DD:EE:FF".to_string(),
            network_interface: "eth0".to_string(),
            network_mask: 24,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            boot_wait_seconds: 90,
            health_check_interval: 15,
            wol_retry_interval: 5,
            connection_timeout: 30,
            server_check_timeout: 5,
        }
    }
}

impl Default for MinecraftConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 25565,
            protocol_version: 763,
            motd_offline: "§aJoin to start server".to_string(),
            motd_starting: "§eServer is starting, please wait".to_string(),
            version_text_starting: "Starting...".to_string(),
            kick_message: "§eServer is starting up, try joining again in a minute.".to_string(),
            max_players_display: 20,
        }
    }
}

impl Default for SatisfactoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            game_port: 7777,
            query_port: 15000,
            beacon_port: 15777,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("/var/log/wolproxy.log".to_string()),
            max_size_mb: 10,
            backup_count: 3,
            console_output: true,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            health_check_enabled: true,
            status_endpoint_port: 8080,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config =
            toml::from_str(&content).map_err(|source| ConfigError::TomlDeserialization {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn write_example(path: &Path) -> Result<(), ConfigError> {
        fs::write(path, EXAMPLE_CONFIG).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn target_ip(&self) -> Result<Ipv4Addr, ConfigError> {
        self.server
            .target_ip
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                field: "server.target_ip".to_string(),
                details: format!("'{}' is not a dotted-quad IPv4 address", self.server.target_ip),
            })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.target_ip()?;

        crate::wake::parse_mac(&self.server.mac_address).map_err(|e| {
            ConfigError::InvalidValue {
                field: "server.mac_address".to_string(),
                details: e.to_string(),
            }
        })?;

        if self.server.network_interface.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "server.network_interface".to_string(),
                details: "interface name cannot be empty".to_string(),
            });
        }

        let timings = [
            ("timing.boot_wait_seconds", self.timing.boot_wait_seconds),
            ("timing.health_check_interval", self.timing.health_check_interval),
            ("timing.wol_retry_interval", self.timing.wol_retry_interval),
            ("timing.connection_timeout", self.timing.connection_timeout),
            ("timing.server_check_timeout", self.timing.server_check_timeout),
        ];
        for (field, value) in timings {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    details: "timing values must be positive".to_string(),
                });
            }
        }

        let mut ports = vec![("minecraft.port", self.minecraft.port)];
        ports.push(("satisfactory.game_port", self.satisfactory.game_port));
        ports.push(("satisfactory.query_port", self.satisfactory.query_port));
        ports.push(("satisfactory.beacon_port", self.satisfactory.beacon_port));
        ports.push((
            "monitoring.status_endpoint_port",
            self.monitoring.status_endpoint_port,
        ));
        for (field, port) in ports {
            if port == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    details: "port must be in 1..=65535".to_string(),
                });
            }
        }

        if wolproxy_log::parse_level(&self.logging.level).is_none() {
            return Err(ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                details: format!(
                    "'{}' is not one of trace, debug, info, warn, error",
                    self.logging.level
                ),
            });
        }

        if !self.minecraft.enabled && !self.satisfactory.enabled {
            return Err(ConfigError::Validation {
                reason: "at least one game surface must be enabled".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn example_config_parses_and_validates() {
        let config: Config = toml::from_str(EXAMPLE_CONFIG).unwrap();
        config.validate().unwrap();
        assert_eq!(config.minecraft.port, 25565);
        assert_eq!(config.satisfactory.ports(), [7777, 15000, 15777]);
    }

    #[test]
    fn missing_keys_take_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            target_ip = "10.0.0.2"

            [minecraft]
            port = 25570
            "#,
        )
        .unwrap();

        assert_eq!(config.server.target_ip, "10.0.0.2");
        assert_eq!(config.server.network_interface, "eth0");
        assert_eq!(config.minecraft.port, 25570);
        assert_eq!(config.minecraft.protocol_version, 763);
        assert_eq!(config.timing.boot_wait_seconds, 90);
        config.validate().unwrap();
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config: Config = toml::from_str(
            r#"
            something_else = 42

            [server]
            target_ip = "10.0.0.2"
            made_up_key = "ignored"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.target_ip, "10.0.0.2");
    }

    #[test]
    fn rejects_invalid_target_ip() {
        let mut config = Config::default();
        config.server.target_ip = "not.an.ip".to_string();
        assert!(config.validate().is_err());
        config.server.target_ip = "256.256.256.256".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_invalid_mac() {
        let mut config = Config::default();
        config.server.mac_address = "00:1B:44:11:3A".to_string();
        assert!(config.validate().is_err());
        config.server.mac_address = "GG:HH:II:JJ:KK:LL".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_timing_values() {
        let mut config = Config::default();
        config.timing.health_check_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_all_surfaces_disabled() {
        let mut config = Config::default();
        config.minecraft.enabled = false;
        config.satisfactory.enabled = false;
        assert!(config.validate().is_err());
    }
}
