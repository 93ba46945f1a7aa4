use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use call_pipeline_api::broadcast::BroadcastHub;
use call_pipeline_api::calls::CallRecordStore;
use call_pipeline_api::config::Config;
use call_pipeline_api::db::Database;
use call_pipeline_api::db_storage::PgStorage;
use call_pipeline_api::gateway::IngestGateway;
use call_pipeline_api::handlers::{self, AppState};
use call_pipeline_api::notifications::{DeliveryReplayer, NotificationDispatcher};
use call_pipeline_api::quota::TrialQuotaChecker;
use call_pipeline_api::retry_queue::{self, RetryQueue};
use call_pipeline_api::routes;
use call_pipeline_api::services::{AzureBlobUploader, SendGridEmailSender, TwilioSmsSender};

/// Main entry point for the application.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - Database connection and migrations.
/// - Outbound SMS, email and blob clients for whichever providers are configured.
/// - The retry worker.
/// - HTTP routes and middleware (CORS, Rate Limiting).
///
/// It then starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "call_pipeline_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database connection pool
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    let storage = Arc::new(PgStorage::new(db.pool.clone()));
    let notify_timeout = Duration::from_secs(config.notify_timeout_secs);

    let queue = Arc::new(RetryQueue::new(storage.clone(), config.retry_batch_limit));
    let hub = BroadcastHub::new();

    let mut dispatcher = NotificationDispatcher::new(hub.clone(), notify_timeout);
    if let Some(twilio) = config.twilio.clone() {
        dispatcher = dispatcher.with_sms(Arc::new(TwilioSmsSender::new(twilio, notify_timeout)?));
        tracing::info!("✓ Twilio SMS client initialized");
    }
    if let Some(sendgrid) = config.sendgrid.clone() {
        dispatcher =
            dispatcher.with_email(Arc::new(SendGridEmailSender::new(sendgrid, notify_timeout)?));
        tracing::info!("✓ SendGrid email client initialized");
    }
    if config.retry_failed_notifications {
        dispatcher = dispatcher.with_retry_queue(queue.clone());
    }

    let quota = Arc::new(TrialQuotaChecker::new(storage.clone(), config.trial_call_limit));
    let mut calls = CallRecordStore::new(storage.clone(), quota);
    if let Some(blob) = config.blob.clone() {
        // Recordings are large; give the copy more room than a notification.
        let uploader = AzureBlobUploader::new(blob, Duration::from_secs(30))?;
        calls = calls.with_recordings(Arc::new(uploader));
        tracing::info!("✓ Recording transfer to blob storage enabled");
    }

    // Replays failed deliveries through the same channels
    let replayer = Arc::new(DeliveryReplayer::new(
        dispatcher.channels().clone(),
        notify_timeout,
    ));
    let _retry_worker = retry_queue::spawn_worker(
        queue,
        replayer,
        Duration::from_secs(config.retry_poll_secs),
    );

    let gateway = Arc::new(IngestGateway::new(
        Arc::new(calls),
        storage,
        Arc::new(dispatcher),
    ));

    // Build application state
    let app_state = Arc::new(AppState { gateway, hub });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    // Webhooks get security layers
    let protected_routes = routes::webhook_routes().layer(
        ServiceBuilder::new()
            // Request size limit: 5MB max payload (prevents memory exhaustion)
            .layer(RequestBodyLimitLayer::new(5 * 1024 * 1024))
            // Rate limiting: 10 req/sec per IP, burst of 20
            .layer(GovernorLayer {
                config: governor_conf,
            }),
    );

    // Build final app with health check (bypasses rate limiting)
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .merge(routes::dashboard_routes())
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
