//! # agora-server
//!
//! Tenant-isolated message routing service for chat-platform groups.
//!
//! This binary provides:
//! - **Ingestion** of gateway events (messages, channel renames and deletes)
//!   into a per-workspace SQLite store, with attachment download
//! - **Notification fan-out** from rooms to their linked aggregate rooms,
//!   paced per destination and bounded globally
//! - **Reminder scheduling** posting due reminders to aggregate rooms
//! - **REST API** (axum) for events, room-graph administration, search,
//!   reminders and AI summaries

mod admin;
mod api;
mod blob_store;
mod config;
mod error;
mod ingest;
mod notifier;
mod scheduler;
mod sender;
mod store;

use std::sync::Arc;

use agora_ai::{AiRouter, ProviderRegistry, Summarizer};
use agora_shared::constants::APP_NAME;
use agora_store::Database;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::blob_store::LocalBlobStore;
use crate::config::ServerConfig;
use crate::ingest::IngestService;
use crate::notifier::{Notifier, NotifierConfig};
use crate::scheduler::ReminderScheduler;
use crate::sender::{LogSender, Sender, WebhookSender};
use crate::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,agora_server=debug")),
        )
        .init();

    info!("Starting {} server v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the database
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    let store = Store::new(db);

    // -----------------------------------------------------------------------
    // 4. Initialize subsystems
    // -----------------------------------------------------------------------
    let blobs = Arc::new(
        LocalBlobStore::new(config.blob_storage_path.clone(), config.max_attachment_size).await?,
    );

    let sender: Arc<dyn Sender> = match &config.outbound_webhook_url {
        Some(url) => {
            info!(url = %url, "Delivering notifications through outbound webhook");
            Arc::new(WebhookSender::new(url.clone(), config.gateway_token.clone())?)
        }
        None => {
            warn!(
                "OUTBOUND_WEBHOOK_URL not set, notifications will only be logged \
                 and reminders stay pending"
            );
            Arc::new(LogSender)
        }
    };

    let notifier = Arc::new(Notifier::new(
        store.clone(),
        sender,
        NotifierConfig {
            max_concurrency: config.fanout_max_concurrency,
            cooldown: config.fanout_cooldown,
        },
    ));

    let ingest = IngestService::new(
        store.clone(),
        blobs,
        Arc::clone(&notifier),
        config.fanout_find_similar,
    )?;

    let summarizer = load_summarizer(&config, &store)?;

    let app_state = AppState {
        store: store.clone(),
        ingest: Arc::new(ingest),
        summarizer,
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 5. Spawn background tasks
    // -----------------------------------------------------------------------
    let scheduler = ReminderScheduler::new(
        store,
        notifier,
        config.reminder_check_interval,
        config.reminder_lookahead_hours,
    );
    scheduler.start();

    // -----------------------------------------------------------------------
    // 6. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let result = tokio::select! {
        result = api::serve(app_state, config.http_addr) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    scheduler.stop().await;

    if let Err(e) = &result {
        tracing::error!(error = %e, "HTTP server failed");
    }
    result
}

/// Build the summarizer from the routing file plus the overrides stored on
/// workspaces and rooms. A missing file disables AI features.
fn load_summarizer(config: &ServerConfig, store: &Store) -> anyhow::Result<Option<Arc<Summarizer>>> {
    if !config.ai_config_path.exists() {
        warn!(
            path = %config.ai_config_path.display(),
            "AI routing file not found, AI features disabled"
        );
        return Ok(None);
    }

    let (workspaces, rooms) = store.with(|db| {
        let workspaces = db.list_workspaces()?;
        let mut rooms = Vec::new();
        for ws in &workspaces {
            rooms.extend(db.list_rooms(ws.id)?);
        }
        Ok((workspaces, rooms))
    })?;

    let router = AiRouter::from_yaml_file(&config.ai_config_path)?
        .with_workspace_overrides(
            workspaces
                .iter()
                .filter_map(|ws| ws.ai_config.as_ref().map(|tree| (ws.id, tree))),
        )
        .with_room_overrides(
            rooms
                .iter()
                .filter_map(|room| room.ai_config.as_ref().map(|tree| (room.id, tree))),
        );

    info!(
        purposes = ?router.list_purposes(),
        providers = ?router.list_providers(),
        "AI routing loaded"
    );

    let registry = ProviderRegistry::from_router(&router)?;
    Ok(Some(Arc::new(Summarizer::new(
        Arc::new(router),
        Arc::new(registry),
    ))))
}
