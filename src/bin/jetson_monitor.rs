use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use jetson_link::{
    test_connection, AlertKind, Callbacks, ConnectionConfig, DeviceLink, ExponentialBackoff,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Connects to a Jetson inference device and logs its alerts
#[derive(Parser, Debug)]
#[command(name = "jetson-monitor", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device address (overrides the configuration file)
    #[arg(long)]
    host: Option<String>,

    /// Device port (overrides the configuration file)
    #[arg(long)]
    port: Option<u16>,

    /// Offset added to the device port for the transport connection
    #[arg(long)]
    port_offset: Option<u16>,

    /// Delay between reconnection attempts, in milliseconds
    #[arg(long)]
    reconnect_ms: Option<u64>,

    /// Double the reconnection delay after each failure, up to this many milliseconds
    #[arg(long)]
    max_backoff_ms: Option<u64>,

    /// Only check that the device accepts a connection, then exit
    #[arg(long)]
    probe: bool,
}

impl Args {
    fn connection_config(&self) -> jetson_link::Result<ConnectionConfig> {
        let mut config = match &self.config {
            Some(path) => ConnectionConfig::load(path)?,
            None => ConnectionConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(offset) = self.port_offset {
            config.port_offset = offset;
        }
        if let Some(millis) = self.reconnect_ms {
            config.reconnect_interval = Duration::from_millis(millis);
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.connection_config()?;

    if args.probe {
        let addr = test_connection(&config).await?;
        println!("Device reachable at {}", addr);
        return Ok(());
    }

    let link = match args.max_backoff_ms {
        Some(max) => {
            let backoff =
                ExponentialBackoff::new(config.reconnect_interval, Duration::from_millis(max))
                    .with_jitter(0.1);
            DeviceLink::with_backoff(config, backoff)?
        }
        None => DeviceLink::new(config)?,
    };

    link.set_callbacks(
        Callbacks::new()
            .on_alert(|alert| {
                if alert.is_seizure() {
                    warn!(
                        confidence = alert.confidence.unwrap_or(0),
                        at = %alert.timestamp,
                        "{}",
                        alert.message
                    );
                } else if alert.kind == AlertKind::Error {
                    error!(at = %alert.timestamp, "{}", alert.message);
                } else {
                    info!(at = %alert.timestamp, "{}", alert.message);
                }
            })
            .on_status_change(|state| info!(%state, "Device link status"))
            .on_error(|err| {
                if err.is_transport() {
                    warn!("{}", err);
                } else {
                    error!("Bad frame from device: {}", err);
                }
            }),
    );

    link.connect()?;
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    link.disconnect();
    Ok(())
}
