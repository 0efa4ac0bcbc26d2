use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use incident_relay::{
    audit::AuditLog,
    chat::{ChatClient, ChatMirror, DiscordClient},
    clock,
    config::Config,
    escalation::EscalationLoop,
    metrics,
    processor::Processor,
    reconciler::Reconciler,
    rules::ConfigService,
    server::Server,
    sources::{QueuePoller, WebhookNormalizer},
    store::{create_database, DedupStore, IncidentStore, KvStore, RedisKvStore},
    Error, Result,
};

/// In-flight alert processing gets this long to finish after the
/// shutdown signal before being abandoned.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting incident-relay...");

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };
    info!(environment = %config.environment, "Configuration loaded");

    metrics::register_metrics();
    let clock = clock::system_clock();

    info!("Connecting to key-value store...");
    let kv: Arc<dyn KvStore> = Arc::new(RedisKvStore::connect(&config.kv_url).await?);
    let dedup = Arc::new(DedupStore::new(kv.clone()));
    let incidents = Arc::new(IncidentStore::new(kv.clone()));

    let db = match &config.database {
        Some(database_config) => {
            info!("Initializing database...");
            let db = create_database(database_config).await?;
            db.init().await?;
            Some(db)
        }
        None => {
            warn!("No database configured; audit log and guides are disabled");
            None
        }
    };

    info!("Validating chat credentials...");
    let chat: Arc<dyn ChatClient> = Arc::new(DiscordClient::new(&config.chat.bot_token)?);
    if let Err(e) = chat.validate_token().await {
        tracing::error!("Chat login failed: {}", e);
        return Err(e);
    }
    if let Some(guild_id) = &config.chat.guild_id {
        info!(guild_id, "Scoped to guild");
    }

    let rules = Arc::new(
        ConfigService::new(db.clone(), config.rules_file.clone(), clock.clone())
            .with_default_channel(config.chat.default_channel_id.clone()),
    );
    rules.bootstrap().await?;
    if config.migrate_rules_on_start {
        info!("Migrating rules file into persisted configuration");
        rules.migrate_from_file().await?;
    }

    let audit = Arc::new(AuditLog::new(db.clone(), clock.clone()));
    let mirror = Arc::new(ChatMirror::new(
        chat.clone(),
        incidents.clone(),
        dedup.clone(),
        rules.clone(),
        audit.clone(),
        db.clone(),
        clock.clone(),
    ));
    let processor = Arc::new(Processor::new(
        rules.clone(),
        dedup.clone(),
        incidents.clone(),
        mirror.clone(),
        audit.clone(),
        clock.clone(),
    ));

    let (stop_tx, stop_rx) = watch::channel(false);

    let escalation = Arc::new(EscalationLoop::new(
        incidents.clone(),
        rules.clone(),
        chat.clone(),
        clock.clone(),
    ));
    tokio::spawn(escalation.run(stop_rx.clone()));

    let reconciler = Arc::new(Reconciler::new(incidents.clone(), chat.clone()));
    tokio::spawn(reconciler.run(stop_rx.clone()));

    tokio::spawn(
        audit
            .clone()
            .run_retention(config.audit_ttl.clone(), stop_rx.clone()),
    );

    if let Some(queue) = &config.queue {
        let poller = Arc::new(
            QueuePoller::new(
                &queue.url,
                queue.region.clone(),
                processor.clone(),
                clock.clone(),
            )
            .await,
        );
        tokio::spawn(poller.run(stop_rx.clone()));
    }

    let normalizer = Arc::new(WebhookNormalizer::new(rules.clone(), clock.clone()));
    let tasks = TaskTracker::new();
    let server = Arc::new(Server::new(
        processor,
        normalizer,
        rules,
        db,
        clock,
        config.auth_token.clone(),
        tasks.clone(),
    ));
    let app = server.build_router();

    let listener = tokio::net::TcpListener::bind(&config.server.addr)
        .await
        .map_err(|e| {
            tracing::error!("Failed to bind to {}: {}", config.server.addr, e);
            Error::Io(e)
        })?;

    info!("Server listening on {}", config.server.addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received, stopping background loops");
            let _ = stop_tx.send(true);
        })
        .await
        .map_err(|e| Error::Internal(format!("server error: {e}")))?;

    // Give detached alert processing a bounded window to drain.
    tasks.close();
    if tokio::time::timeout(SHUTDOWN_GRACE, tasks.wait()).await.is_err() {
        warn!(
            "Shutdown grace window of {:?} elapsed, abandoning in-flight alert processing",
            SHUTDOWN_GRACE
        );
    }

    Ok(())
}
