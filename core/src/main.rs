/// Haggle chat engine - Main entry point
use haggle_core::http_service::HttpChatService;
use haggle_core::render_api::start_render_api;
use haggle_core::transport::memory::MemoryChannel;
use haggle_core::{ChatEngine, EngineConfig};
use std::env;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let config = EngineConfig::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    // No push transport is wired in here; everything goes over the fallback
    let service = Arc::new(HttpChatService::from_config(&config));
    let channel = Arc::new(MemoryChannel::unavailable());

    info!("Starting Haggle chat engine");
    info!("   API base: {}", config.api_base);
    info!("   Page size: {}", config.page_size);

    let engine = ChatEngine::bootstrap(service, channel, config.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Bootstrap error: {}", e))?;

    let rooms = engine.load_rooms().await;
    info!("   Rooms: {}", rooms.len());
    if let Some(room_id) = engine.active_room().await {
        engine.prime_room(&room_id).await;
    }

    if let Some(addr) = config.render_api_addr {
        let api_engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = start_render_api(api_engine, addr).await {
                error!("Render API stopped: {}", e);
            }
        });
    }

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run().await })
    };

    tokio::signal::ctrl_c().await?;
    info!("Ctrl+C received, stopping engine...");
    engine.shutdown().await;
    let _ = runner.await;

    Ok(())
}
