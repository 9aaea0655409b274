use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use kdrive_proxy::auth::{IdTokenVerifier, TokenManager};
use kdrive_proxy::crypto::StateSigner;
use kdrive_proxy::drive::DriveProxy;
use kdrive_proxy::providers::InfomaniakProvider;
use kdrive_proxy::store::{MemoryTokenStore, PgTokenStore, TokenStore};
use kdrive_proxy::{api, AppState, Config, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kdrive_proxy=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!("kdrive-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}:{}", config.host, config.port);

    let store: Arc<dyn TokenStore> = match &config.database_url {
        Some(url) => {
            let store = PgTokenStore::new(url).await?;
            store.migrate().await?;
            info!("Token store: PostgreSQL (connected and migrated)");
            Arc::new(store)
        }
        None => {
            info!("Token store: in-memory (tokens are lost on restart)");
            Arc::new(MemoryTokenStore::new())
        }
    };

    let id_tokens = IdTokenVerifier::from_config(&config);
    if id_tokens.verifies_signatures() {
        match id_tokens.prefetch_keys().await {
            Ok(()) => info!("Signing keys cached from {}", config.oauth_jwks_url),
            Err(e) => warn!("Failed to fetch signing keys: {e}. Will retry on first login."),
        }
    }

    let provider = InfomaniakProvider::from_config(&config);
    let tokens = TokenManager::new(Arc::new(provider), store, id_tokens);
    let drive = DriveProxy::from_config(&config);
    let states = StateSigner::new(&config.state_secret)?;

    info!(
        "Serving folder '{}' on drive {}",
        drive.folder_path(),
        config.kdrive_id
    );

    let state: SharedState = Arc::new(AppState {
        config: config.clone(),
        tokens,
        drive,
        states,
    });

    let app = api::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server ready");
    axum::serve(listener, app).await?;

    Ok(())
}
