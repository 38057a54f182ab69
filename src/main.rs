use anyhow::{Context, Result};
use std::sync::Arc;
use timevault::api::{
    create_credentials_router, create_magic_link_router, create_tracker_router,
    CredentialsAppState, LogSender, MagicLinkAppState, TrackerAppState,
};
use timevault::cache::ScopedCache;
use timevault::config::{load_config, load_secrets, AppConfig};
use timevault::credentials::{CredentialStore, CredentialVault, CryptoBox};
use timevault::gateway::TrackerGateway;
use timevault::ratelimit::RateLimiter;
use timevault::store::MemoryStore;
use timevault::tracker::TrackerVerifier;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "timevault=info".into()),
        )
        .init();

    info!("Timevault starting...");

    let config_path =
        std::env::var("TIMEVAULT_CONFIG").unwrap_or_else(|_| "timevault.toml".to_string());
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %config_path, error = %e, "Config file not loaded, using defaults");
            AppConfig::default()
        }
    };

    // Secrets are a startup precondition; a bad encryption key must fail
    // here, not on the first request
    let secrets = load_secrets()?;
    let crypto = Arc::new(
        CryptoBox::from_base64_key(&secrets.encryption_key_base64)
            .context("invalid encryption key")?,
    );

    let record_store = Arc::new(
        CredentialStore::new(&config.server.credentials_db)
            .context("failed to open credential storage")?,
    );
    let vault = Arc::new(CredentialVault::new(
        record_store,
        crypto,
        Arc::new(TrackerVerifier),
    ));

    let kv_store = Arc::new(MemoryStore::new());
    let cache = Arc::new(ScopedCache::new(kv_store.clone()));
    let gateway = Arc::new(TrackerGateway::new(vault, cache));

    let limiter = Arc::new(RateLimiter::new(
        kv_store.clone(),
        secrets.hash_secret,
        config.rate_limit.cooldown(),
        config.rate_limit.window(),
        config.rate_limit.quota,
    ));

    let app = create_credentials_router(CredentialsAppState {
        gateway: gateway.clone(),
    })
    .merge(create_tracker_router(TrackerAppState {
        gateway,
        cache: config.cache.clone(),
    }))
    .merge(create_magic_link_router(MagicLinkAppState {
        limiter,
        sender: Arc::new(LogSender),
        store: kv_store,
    }))
    .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "Listening");

    axum::serve(listener, app).await?;

    Ok(())
}
