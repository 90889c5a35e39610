//! Mesh service binary.
//!
//! # Startup
//!
//! ```text
//! load config (TOML + env) → CLI overrides → validate
//!     → logging → telemetry (tracer, metrics, exporter)
//!     → bind listener → serve until SIGINT/SIGTERM
//!     → flush queued spans → exit
//! ```

use clap::Parser;
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;

use mesh_telemetry::config::validation::validate_config;
use mesh_telemetry::config::{load_config, ConfigError, ServiceRole};
use mesh_telemetry::lifecycle::{forward_signals, Shutdown};
use mesh_telemetry::observability::logging::init_logging;
use mesh_telemetry::{MeshServer, Telemetry};

#[derive(Parser, Debug)]
#[command(name = "mesh-service", version, about = "Distributed-tracing mesh service")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Role to play (gateway, user, order, notification)
    #[arg(short, long)]
    role: Option<ServiceRole>,

    /// Address to bind, e.g. 0.0.0.0:8080
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(role) = args.role {
        config.service.role = role;
    }
    if let Some(bind) = args.bind {
        config.listener.bind_address = Some(bind);
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    init_logging(&config.observability, Path::new(&config.log_file()))?;

    let (telemetry, processor) = Telemetry::init(&config)?;
    let identity = telemetry.identity();
    tracing::info!(
        service = %identity.name,
        version = %identity.version,
        environment = %identity.environment,
        role = %config.service.role,
        exporter_enabled = config.exporter.enabled,
        "Service starting"
    );

    let shutdown = Shutdown::new();
    tokio::spawn(forward_signals(shutdown.clone()));

    let listener = TcpListener::bind(config.bind_address()).await?;
    let server = MeshServer::new(&config, &telemetry);
    let served = server
        .run_with_exporter(listener, shutdown.subscribe(), processor)
        .await;

    served?;
    tracing::info!("Shutdown complete");
    Ok(())
}
