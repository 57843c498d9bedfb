use clap::Parser;
use log::{error, info, warn};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use wolproxy_log::{LogSettings, ProxyLogger};

pub mod config;
pub mod identity;
pub mod minecraft;
pub mod monitor;
pub mod proxy;
pub mod satisfactory;
pub mod stats;
pub mod status;
pub mod wake;

use config::Config;
use identity::IdentityManager;
use minecraft::MinecraftHandler;
use monitor::ServerMonitor;
use proxy::{Coordinator, ProxyEvent};
use satisfactory::SatisfactoryHandler;
use stats::Stats;
use status::StatusContext;
use wake::WakeSender;

#[derive(Parser, Debug)]
#[command(name = "wolproxy", version, about = "Wake-on-LAN game server proxy")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Write an example configuration file and exit
    #[arg(long)]
    create_config: bool,

    /// Parse and validate the configuration file, then exit
    #[arg(long)]
    validate_config: bool,

    /// Query a running proxy's status endpoint and exit
    #[arg(long)]
    status: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.create_config {
        return create_example_config(&cli.config);
    }
    if cli.validate_config {
        return validate_config(&cli.config);
    }
    if cli.status {
        return show_status(&cli.config);
    }

    run_service(&cli.config)
}

fn run_service(path: &Path) -> ExitCode {
    let config = match Config::load(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config) {
        eprintln!("Warning: could not set up logging: {e}");
        eprintln!("Continuing without a logger");
    }

    info!("Starting Wake-on-LAN game server proxy");
    info!("Configuration loaded from {}", path.display());

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start the async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(service(config));
    log::logger().flush();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal error: {}", e);
            log::logger().flush();
            ExitCode::FAILURE
        }
    }
}

async fn service(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let target_ip: Ipv4Addr = config.target_ip()?;
    let stats = Arc::new(Stats::new());

    let identity = Arc::new(IdentityManager::new(
        target_ip,
        config.server.network_mask,
        config.server.network_interface.clone(),
    ));
    let wake = Arc::new(WakeSender::new(
        &config.server.target_ip,
        &config.server.mac_address,
        config.server.network_mask,
        Duration::from_secs(config.timing.wol_retry_interval),
    )?);
    let monitor = Arc::new(ServerMonitor::new(
        target_ip,
        config.minecraft.port,
        Duration::from_secs(config.timing.server_check_timeout),
        Duration::from_secs(config.timing.health_check_interval),
        Arc::clone(&stats),
    ));

    let (mut coordinator, events_tx, state_rx) = Coordinator::new(
        Arc::clone(&identity),
        Arc::clone(&wake),
        Arc::clone(&monitor),
        Arc::clone(&stats),
        Duration::from_secs(config.timing.boot_wait_seconds),
    );

    if config.minecraft.enabled {
        let handler = Arc::new(MinecraftHandler::new(
            config.minecraft.clone(),
            target_ip,
            state_rx.clone(),
            events_tx.clone(),
            Arc::clone(&stats),
        ));
        coordinator.supervise(tokio::spawn(async move {
            if let Err(e) = handler.run().await {
                error!("Minecraft listener failed: {}", e);
            }
        }));
    }

    if config.satisfactory.enabled {
        let handler = Arc::new(SatisfactoryHandler::new(
            target_ip,
            Duration::from_secs(config.timing.connection_timeout),
            state_rx.clone(),
            events_tx.clone(),
            Arc::clone(&stats),
        ));
        for port in config.satisfactory.ports() {
            let handler = Arc::clone(&handler);
            coordinator.supervise(tokio::spawn(async move {
                if let Err(e) = handler.listen(port).await {
                    error!("Satisfactory listener on port {} failed: {}", port, e);
                }
            }));
        }
    }

    coordinator.supervise(tokio::spawn(
        Arc::clone(&monitor).run(events_tx.clone()),
    ));

    if config.monitoring.health_check_enabled {
        let context = Arc::new(StatusContext::new(
            state_rx.clone(),
            Arc::clone(&monitor),
            Arc::clone(&identity),
            Arc::clone(&stats),
            &config,
        ));
        let port = config.monitoring.status_endpoint_port;
        coordinator.supervise(tokio::spawn(async move {
            if let Err(e) = status::serve(context, port).await {
                warn!("Status endpoint failed: {}", e);
            }
        }));
    }

    let shutdown_events = events_tx.clone();
    tokio::spawn(async move {
        wait_for_termination().await;
        info!("Termination signal received, initiating shutdown");
        let _ = shutdown_events.send(ProxyEvent::Shutdown).await;
    });

    coordinator.run().await;
    info!("Wake-on-LAN game server proxy stopped");
    Ok(())
}

async fn wait_for_termination() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Could not install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

fn init_logging(config: &Config) -> Result<(), log::SetLoggerError> {
    let level = wolproxy_log::parse_level(&config.logging.level).unwrap_or(log::Level::Info);
    ProxyLogger::init(LogSettings {
        level,
        file: config.logging.file.clone().map(PathBuf::from),
        max_size_bytes: config.logging.max_size_mb * 1024 * 1024,
        backup_count: config.logging.backup_count,
        console: config.logging.console_output,
    })
}

fn create_example_config(path: &Path) -> ExitCode {
    let mut example = path.as_os_str().to_os_string();
    example.push(".example");
    let example = PathBuf::from(example);

    match Config::write_example(&example) {
        Ok(()) => {
            println!("Example configuration saved to: {}", example.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to write example configuration: {e}");
            ExitCode::FAILURE
        }
    }
}

fn validate_config(path: &Path) -> ExitCode {
    let config = match Config::load(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration validation failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("Configuration file {} is valid", path.display());
    println!();
    println!("Configuration summary:");
    println!(
        "  Target server: {} ({})",
        config.server.target_ip, config.server.mac_address
    );
    println!(
        "  Minecraft: {}",
        if config.minecraft.enabled { "enabled" } else { "disabled" }
    );
    if config.minecraft.enabled {
        println!("    Port: {}", config.minecraft.port);
    }
    println!(
        "  Satisfactory: {}",
        if config.satisfactory.enabled { "enabled" } else { "disabled" }
    );
    if config.satisfactory.enabled {
        let [game, query, beacon] = config.satisfactory.ports();
        println!("    Ports: {}, {}, {}", game, query, beacon);
    }
    println!("  Boot wait time: {} seconds", config.timing.boot_wait_seconds);
    ExitCode::SUCCESS
}

fn show_status(path: &Path) -> ExitCode {
    let config = match Config::load(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if !config.monitoring.health_check_enabled {
        println!("Status endpoint is disabled in configuration");
        return ExitCode::SUCCESS;
    }

    let url = format!(
        "http://127.0.0.1:{}/status",
        config.monitoring.status_endpoint_port
    );

    let mut response = match ureq::get(url.as_str()).call() {
        Ok(response) => response,
        Err(e) => {
            eprintln!("Failed to reach status endpoint at {url}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let body: serde_json::Value = match response.body_mut().read_json() {
        Ok(body) => body,
        Err(e) => {
            eprintln!("Failed to parse status response: {e}");
            return ExitCode::FAILURE;
        }
    };

    let text = |value: &serde_json::Value| value.as_str().unwrap_or("unknown").to_string();

    println!("Wake-on-LAN game server proxy status:");
    println!("  Status: {}", text(&body["status"]));

    let proxy = &body["proxy"];
    if !proxy.is_null() {
        println!("  Proxy state: {}", text(&proxy["proxy_state"]));
        println!("  Server health: {}", text(&proxy["server_health"]));
        println!(
            "  IP bound: {}",
            proxy["ip_bound"].as_bool().unwrap_or(false)
        );

        let statistics = &proxy["statistics"];
        if !statistics.is_null() {
            let count = |key: &str| statistics[key].as_u64().unwrap_or(0);
            println!("  Wake attempts: {}", count("wake_attempts"));
            println!("  Successful wakes: {}", count("successful_wakes"));
            println!("  Minecraft connections: {}", count("minecraft_connections"));
            println!("  Satisfactory flows: {}", count("satisfactory_flows"));
        }
    }

    ExitCode::SUCCESS
}
