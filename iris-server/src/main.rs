use anyhow::Result;
use clap::Parser;
use iris::config::ObservabilityConfig;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "iris-server")]
#[command(about = "Irisgate image classification gateway")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "iris.toml")]
    config: String,

    /// Host to bind to (overrides server.bind_addr)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides server.bind_addr)
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// URL of the HTTP inference service (overrides [backend])
    #[arg(long, env = "BACKEND_URL")]
    backend_url: Option<String>,
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&observability.log_level));
    let format =
        std::env::var("LOG_FORMAT").unwrap_or_else(|_| observability.log_format.clone());

    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Apply --host/--port on top of the configured bind address
fn bind_address(configured: &str, host: Option<String>, port: Option<u16>) -> String {
    if host.is_none() && port.is_none() {
        return configured.to_string();
    }
    let (cfg_host, cfg_port) = configured.rsplit_once(':').unwrap_or((configured, "8080"));
    let host = host.unwrap_or_else(|| cfg_host.to_string());
    let port = port.map(|p| p.to_string()).unwrap_or_else(|| cfg_port.to_string());
    format!("{}:{}", host, port)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load config, writing the default file only once logging is up
    let config_path = Path::new(&args.config);
    let create_default = !config_path.exists();
    let mut config = iris::Config::load_or_default(config_path)?;
    init_tracing(&config.observability);

    if create_default {
        match config.save(config_path) {
            Ok(()) => tracing::info!("Wrote default config to {}", args.config),
            Err(e) => tracing::warn!("Could not write default config to {}: {}", args.config, e),
        }
    }

    if let Some(url) = args.backend_url {
        config.backend.override_url(url);
    }
    config.ensure_dirs()?;

    tracing::info!("Config file: {}", args.config);

    let addr = bind_address(&config.server.bind_addr, args.host, args.port);

    let invoker = iris::backend::create_invoker(&config.backend)?;
    let initial = config.model.initial_identity()?;
    tracing::info!(
        "Serving model {} via {} backend",
        initial,
        invoker.name()
    );

    let coordinator = iris::PredictionCoordinator::with_single_flight(
        invoker,
        initial,
        config.cache.single_flight,
    );

    let mut server = iris::api::ApiServer::with_config(
        coordinator,
        config.server.clone(),
        config.model.upload_dir.clone(),
    );

    if config.observability.metrics_enabled {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;
        server = server.with_metrics(handle);
        tracing::info!("Prometheus metrics enabled at /metrics");
    }

    tracing::info!("Starting irisgate on {}", addr);
    server.serve(&addr).await?;

    Ok(())
}
