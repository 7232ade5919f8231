// Aquaview Bridge - Hosted dashboard service
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Aquaview Bridge
//!
//! Runs the Aquaview dashboard as a service: sensor telemetry and operator
//! commands over MQTT, control state mirrored to a JSON replica file, and
//! an HTTP API for the dashboard front end.
//!
//! ## Usage
//!
//! ```bash
//! # Plain TCP broker, replica in the working directory
//! aquaview-bridge --mqtt-host broker.local --store aquaview.json
//!
//! # TLS broker with credentials from the environment
//! MQTT_USERNAME=operator MQTT_PASSWORD=secret \
//!     aquaview-bridge --mqtt-host broker.example.com --mqtt-port 8883 --mqtt-protocol mqtts
//! ```

mod app;
mod error;
mod metrics;
mod mqtt;
mod ticker;
mod web;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use aquaview::{DashboardConfig, FileStore};
use clap::Parser;
use rumqttc::AsyncClient;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use app::App;
use error::BridgeError;
use mqtt::{spawn_pump, MqttChannel, MqttSettings, Protocol};

/// Channel events buffered between the MQTT pump and the loop
const EVENT_QUEUE: usize = 256;

/// Outgoing MQTT requests buffered by the client
const REQUEST_QUEUE: usize = 64;

/// Aquaview dashboard bridge
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// MQTT broker host
    #[arg(long, env = "MQTT_HOST", default_value = "localhost")]
    mqtt_host: String,

    /// MQTT broker port
    #[arg(long, env = "MQTT_PORT", default_value = "1883")]
    mqtt_port: u16,

    /// Broker transport
    #[arg(long, env = "MQTT_PROTOCOL", value_enum, default_value = "mqtt")]
    mqtt_protocol: Protocol,

    /// Broker username
    #[arg(long, env = "MQTT_USERNAME")]
    mqtt_username: Option<String>,

    /// Broker password
    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    mqtt_password: Option<String>,

    /// MQTT client id (defaults to aquaview-<pid>)
    #[arg(long, env = "MQTT_CLIENT_ID")]
    client_id: Option<String>,

    /// JSON replica file holding control state and history
    #[arg(long, env = "AQUAVIEW_STORE", default_value = "aquaview.json")]
    store: PathBuf,

    /// Replica poll interval in milliseconds
    #[arg(long, default_value = "500")]
    store_poll_ms: u64,

    /// HTTP port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            protocol: self.mqtt_protocol,
            client_id: self
                .client_id
                .clone()
                .unwrap_or_else(|| format!("aquaview-{}", std::process::id())),
            username: self.mqtt_username.clone(),
            password: self.mqtt_password.clone(),
            keep_alive: Duration::from_secs(30),
        }
    }

    fn store_poll(&self) -> Result<Duration, BridgeError> {
        if self.store_poll_ms == 0 {
            return Err(BridgeError::Config(
                "store poll interval must be positive".to_string(),
            ));
        }
        Ok(Duration::from_millis(self.store_poll_ms))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Aquaview Bridge v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), BridgeError> {
    let settings = args.mqtt_settings();
    let store_poll = args.store_poll()?;

    // History and control state share one replica file
    let history = FileStore::open(&args.store)?;
    let replica = FileStore::open(&args.store)?;
    info!("Replica file: {}", args.store.display());

    let (client, eventloop) = AsyncClient::new(settings.options(), REQUEST_QUEUE);
    let channel = MqttChannel::new(client);
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
    let pump = spawn_pump(eventloop, channel.clone(), events_tx);
    info!(
        "Connecting to {}:{} as {}",
        settings.host, settings.port, settings.client_id
    );

    let (app, handle) = App::new(
        channel,
        history,
        replica,
        events_rx,
        &DashboardConfig::default(),
        store_poll,
    )?;

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Starting server on http://{}", addr);
    info!("Metrics endpoint: http://{}/metrics", addr);

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, web::router(handle)).await {
            error!("HTTP server failed: {}", e);
        }
    });

    app.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutting down");
    })
    .await;

    server.abort();
    pump.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["aquaview-bridge", "--mqtt-host", "broker.local"]);
        assert_eq!(args.mqtt_host, "broker.local");
        assert_eq!(args.mqtt_protocol, Protocol::Mqtt);
        assert_eq!(args.store_poll().unwrap(), Duration::from_millis(500));

        let settings = args.mqtt_settings();
        assert!(settings.client_id.starts_with("aquaview-"));
        assert_eq!(settings.keep_alive, Duration::from_secs(30));
    }

    #[test]
    fn test_zero_poll_is_rejected() {
        let args = Args::parse_from(["aquaview-bridge", "--store-poll-ms", "0"]);
        assert!(matches!(args.store_poll(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_tls_protocol() {
        let args = Args::parse_from([
            "aquaview-bridge",
            "--mqtt-protocol",
            "mqtts",
            "--client-id",
            "panel-1",
        ]);
        assert_eq!(args.mqtt_protocol, Protocol::Mqtts);
        assert_eq!(args.mqtt_settings().client_id, "panel-1");
    }
}
