use clap::Parser;
use krust_coordinator::event::BroadcastEventSink;
use krust_coordinator::port_resolver::{PortResolver, SystemPortEnumerator};
use krust_coordinator::registry::PrinterRegistry;
use krust_coordinator::serial_link::{SerialLink, Serial2TokioLink};
use krust_coordinator::store::InMemoryStore;
use krust_coordinator::{config, file_manager, web};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "coordinator", about = "Multi-printer job coordinator")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(default_value = "krust-coordinator.toml")]
    config_path: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    tracing::info!("loading configuration from {}", cli.config_path);
    let config = config::Config::load_config(&cli.config_path)?;

    file_manager::recreate_empty_dir(&config.storage.uploads_dir).await?;
    file_manager::recreate_empty_dir(&config.storage.tempcsv_dir).await?;

    let event_sink = Arc::new(BroadcastEventSink::new(256));
    let store = Arc::new(InMemoryStore::new());
    let port_resolver = Arc::new(PortResolver::new(Arc::new(SystemPortEnumerator)));
    let link_factory: Arc<dyn Fn() -> Box<dyn SerialLink> + Send + Sync> =
        Arc::new(|| Box::new(Serial2TokioLink::new()) as Box<dyn SerialLink>);

    let registry = Arc::new(PrinterRegistry::new(
        event_sink.clone(),
        store.clone(),
        port_resolver,
        link_factory,
        config.dispatch.baud_rate,
        Duration::from_millis(config.dispatch.read_timeout_ms),
        config.storage.uploads_dir.clone(),
    ));

    registry.create_from_descriptors(config.printers.clone()).await;
    tracing::info!("registered {} printer(s)", config.printers.len());

    let app_state = web::api::AppState { registry: registry.clone(), event_sink, store };
    let router = web::build_router(app_state);
    let bind = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("listening on {bind}");

    tokio::select! {
        result = axum::serve(listener, router) => {
            if let Err(e) = result {
                tracing::error!("server error: {e}");
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    Ok(())
}
