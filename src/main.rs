//! # BLE WebSocket Forwarder
//!
//! Host runner for the forwarding engine.
//!
//! Stands in for the firmware scheduler: ticks the forwarder on a fixed
//! interval, feeds it telemetry updates read as JSON lines from stdin, and
//! shuts it down on Ctrl+C.

use anyhow::{Context, Result};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::interval;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use ble_ws_forwarder::ble::BleLink;
use ble_ws_forwarder::config::{Config, LoggingConfig};
use ble_ws_forwarder::connection::ConnectionManager;
use ble_ws_forwarder::error::Result as ForwarderResult;
use ble_ws_forwarder::forwarder::Forwarder;
use ble_ws_forwarder::telemetry::TelemetryUpdate;
use ble_ws_forwarder::transport::WsTransport;

/// Configuration file used when no path is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Number of ticks between status log messages
const LOG_INTERVAL_TICKS: u64 = 600;

/// Log file name prefix inside the configured log directory
const LOG_FILE_PREFIX: &str = "ble-ws-forwarder.log";

/// BLE link of the host runner
///
/// There is no radio here; requests are logged so server interaction can be
/// observed end to end.
#[derive(Debug, Default)]
struct LoggingBleLink;

impl BleLink for LoggingBleLink {
    fn write_command(&mut self, data: &[u8]) -> ForwarderResult<()> {
        info!("BLE write: {}", hex::encode(data));
        Ok(())
    }

    fn set_enabled(&mut self, enabled: bool) {
        info!("BLE client {}", if enabled { "enabled" } else { "disabled" });
    }

    fn request_battery_refresh(&mut self) {
        debug!("BLE battery refresh requested");
    }
}

/// Main entry point for the forwarder
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (first argument, or `config/default.toml`)
///    - Set up logging with tracing subscriber
///    - Start the first connection attempt
///
/// 2. **Main Loop**
///    - Tick the forwarder at the configured interval
///    - Apply telemetry updates from stdin, e.g. `{"battery":82}`
///    - Log counters every 600 ticks
///    - Handle Ctrl+C for graceful shutdown
///
/// # Errors
///
/// Returns error if the configuration cannot be loaded or is invalid.
/// Network failures are never fatal.
///
/// # Examples
///
/// ```bash
/// echo '{"bleConnected":true}' | cargo run --release -- config/default.toml
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    let _log_guard = init_logging(&config.logging);

    info!("BLE WS Forwarder v{} starting...", env!("CARGO_PKG_VERSION"));

    let transport = WsTransport::new(tokio::runtime::Handle::current());
    let connection = ConnectionManager::new(config.forwarder_config()?, config.backoff(), transport)
        .with_connect_timeout(config.connect_timeout());
    let mut forwarder = Forwarder::new(connection, LoggingBleLink)
        .with_status_interval(config.status_interval())
        .with_battery_reply_delay(config.battery_reply_delay());

    info!("Forwarding as node '{}'", config.server.node_id);
    forwarder.start(Instant::now());

    let mut ticker = interval(config.tick_interval());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut tick_count: u64 = 0;

    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                forwarder.tick(Instant::now());
                tick_count += 1;

                if tick_count % LOG_INTERVAL_TICKS == 0 {
                    let stats = forwarder.stats();
                    info!(
                        "State {:?}: {} frames sent, {} deferred, {} connections, {} losses",
                        forwarder.connection_state(),
                        stats.frames_sent,
                        stats.sends_deferred,
                        stats.connections,
                        stats.connection_losses
                    );
                }
            }

            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match serde_json::from_str::<TelemetryUpdate>(&line) {
                        Ok(update) => update.apply(&mut forwarder),
                        Err(e) => warn!("Ignoring telemetry line {:?}: {}", line, e),
                    },
                    Ok(None) => {
                        debug!("Telemetry input closed");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!("Telemetry input failed: {}", e);
                        stdin_open = false;
                    }
                }
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                forwarder.shutdown();
                break;
            }
        }
    }

    Ok(())
}

/// Install the tracing subscriber
///
/// `RUST_LOG` overrides the configured level. Returns the file writer guard,
/// which must live until exit so buffered lines are flushed.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    if config.dir.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(&config.dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Some(guard)
}
