use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::BookingConflictGuard;
use notification_cell::{
    Dispatcher, DispatcherConfig, NotificationState, ReminderConfig, ReminderPlanner,
    SenderRegistry,
};
use schedule_cell::AvailabilityResolver;
use shared_config::AppConfig;
use shared_database::Database;
use shared_utils::{Clock, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic scheduler");

    // Load configuration
    let config = AppConfig::from_env();

    let db = Database::open(&config.database_path)
        .with_context(|| format!("opening database at {}", config.database_path))?;
    info!("Database ready at {}", config.database_path);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Wire the components
    let resolver = Arc::new(AvailabilityResolver::new(
        Arc::new(db.clone()),
        Arc::new(db.clone()),
        clock.clone(),
    ));
    let planner = Arc::new(ReminderPlanner::new(
        Arc::new(db.clone()),
        Arc::new(db.clone()),
        Arc::new(db.clone()),
        clock.clone(),
        ReminderConfig::from(&config),
    ));
    let guard = Arc::new(BookingConflictGuard::new(
        Arc::new(db.clone()),
        resolver.clone(),
        planner,
        clock.clone(),
    ));

    let http_client = reqwest::Client::builder()
        .timeout(config.send_timeout())
        .build()
        .context("building gateway HTTP client")?;
    let dispatcher = Dispatcher::new(
        Arc::new(db.clone()),
        Arc::new(db.clone()),
        SenderRegistry::from_config(&config, http_client),
        clock.clone(),
        DispatcherConfig::from(&config),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher_task = tokio::spawn(async move { dispatcher.run(shutdown_rx).await });

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(router::Services {
        resolver,
        guard,
        notifications: NotificationState {
            notifications: Arc::new(db),
            clock,
        },
    })
    .layer(
        TraceLayer::new_for_http()
            .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
            .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
    )
    .layer(cors);

    // Run the server
    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("binding {}", config.bind_address))?;
    info!("Listening on {}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    info!("HTTP server stopped, waiting for dispatcher");
    let _ = shutdown_tx.send(true);
    dispatcher_task.await.context("dispatcher task panicked")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
