use anyhow::Result;
use central_station::api::{AppState, RestApi};
use central_station::config;
use central_station::db::repositories::accounts::AccountsRepository;
use central_station::db::repositories::cameras::CamerasRepository;
use central_station::db::repositories::events::EventsRepository;
use central_station::db::DatabaseService;
use central_station::{
    BroadcastHub, IngestPipeline, MediaStore, SmtpServer, StreamSupervisor, WorkflowEngine,
};
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;

async fn run_app() -> Result<()> {
    // Initialize logging
    env_logger::init();
    info!("Starting central station core");

    // Optional config file path as the single CLI argument
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = config::load_config(config_path.as_deref())?;
    info!("Configuration loaded");

    // Database and repositories
    let db = DatabaseService::new(&config.database).await?;
    let cameras = Arc::new(CamerasRepository::new(db.pool.clone()));
    let accounts = Arc::new(AccountsRepository::new(db.pool.clone()));
    let events = Arc::new(EventsRepository::new(db.pool.clone()));

    let registered = cameras.get_all().await?;
    info!("Camera directory loaded ({} cameras)", registered.len());

    // Broadcast hub and workflow engine
    let hub = Arc::new(BroadcastHub::new(config.hub.channel_capacity));
    let engine = Arc::new(WorkflowEngine::new(
        events.clone(),
        accounts.clone(),
        hub.clone(),
    ));

    // Live-stream supervisor
    let supervisor = Arc::new(StreamSupervisor::new(
        config.streaming.clone(),
        cameras.clone(),
    ));

    // Ingestion pipeline and mail listener
    let media = MediaStore::new(&config.media);
    std::fs::create_dir_all(media.uploads_dir())?;
    std::fs::create_dir_all(&config.streaming.streams_dir)?;

    let pipeline = Arc::new(IngestPipeline::new(
        events.clone(),
        accounts.clone(),
        media,
        engine.clone(),
        hub.clone(),
        config.ingest.max_attachment_bytes,
    ));
    let smtp = Arc::new(SmtpServer::new(
        config.ingest.clone(),
        cameras.clone(),
        pipeline,
    ));
    tokio::spawn(async move {
        if let Err(e) = smtp.run().await {
            error!("Mail ingestion listener stopped: {}", e);
        }
    });

    // Operator API
    let state = AppState {
        engine,
        supervisor: supervisor.clone(),
        hub,
        events: events.clone(),
    };
    let http_server = RestApi::new(&config, state)?;

    tokio::select! {
        result = http_server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    // Stop every live transcode before exiting
    supervisor.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

fn main() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime");

    if let Err(e) = runtime.block_on(run_app()) {
        eprintln!("Application error: {}", e);
        std::process::exit(1);
    }
}
