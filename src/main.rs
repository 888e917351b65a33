use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use opsportal::auth::session::SessionManager;
use opsportal::config::AppConfig;
use opsportal::notify::{self, Notifier};
use opsportal::routes;
use opsportal::state::AppState;
use opsportal::storage::S3Storage;
use opsportal::store;

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "api",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        server_host = %config.server_host,
        server_port = config.server_port,
        s3_bucket = %config.s3_bucket,
        webhook_enabled = config.notification_webhook_url.is_some(),
        "loaded portal configuration"
    );

    let store = store::connect(&config).await?;
    let storage = Arc::new(S3Storage::from_config(&config).await?);

    let (notifier, receiver) = Notifier::channel();
    tokio::spawn(notify::run_dispatcher(receiver, notify::default_sinks(&config)?));

    let state = AppState::new(config, store, storage, notifier);
    tokio::spawn(sweep_sessions(state.sessions.clone()));

    let listen_addr: SocketAddr =
        format!("{}:{}", state.config.server_host, state.config.server_port).parse()?;
    let router = routes::create_router(state);

    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!("listening on {}", listen_addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received shutdown signal");
    })
    .await?;
    Ok(())
}

async fn sweep_sessions(sessions: SessionManager) {
    let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        match sessions.sweep_expired().await {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, "expired sessions removed"),
            Err(err) => tracing::warn!(error = %err, "session sweep failed"),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
