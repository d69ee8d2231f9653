use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use booster_config::BoosterConfig;
use booster_engine::InferenceBackend;
use booster_pod::Scheduler;
use booster_registry::ModelRegistry;
use booster_runtime::StubBackend;
use booster_server::{run_server, AppState};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "booster", version, about = "Pod-based LLM inference server")]
struct Cli {
    /// Path to the booster YAML configuration.
    #[arg(short, long, default_value = "booster.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Config errors are fatal: nothing starts on a malformed document.
    let config = BoosterConfig::from_file(&cli.config)?;

    // RUST_LOG wins over the config's log level when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let backend: Arc<dyn InferenceBackend> = Arc::new(StubBackend::new());
    let registry = Arc::new(ModelRegistry::new(Arc::clone(&backend)));
    let loaded = registry.load_all(&config.models);
    tracing::info!(loaded, total = config.models.len(), "model registry initialized");

    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(1);
    let scheduler = Scheduler::start(&config, backend, Arc::clone(&registry), seed);

    // Ctrl-C triggers cooperative shutdown: workers stop after their current
    // token step, the HTTP server drains, models unload.
    let shutdown = scheduler.shutdown_token();
    {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, shutting down");
                scheduler.shutdown();
            }
        });
    }

    let state = AppState {
        scheduler,
        registry: Arc::clone(&registry),
        server_id: config.id.clone(),
    };
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!(%addr, id = %config.id, pods = config.pods.len(), "starting booster server");

    run_server(state, addr, shutdown).await?;

    registry.unload_all();
    tracing::info!("shutdown complete");
    Ok(())
}
