//! Server runner

use std::sync::Arc;

use xreg_storage::StorageBackend;

use crate::routes::create_router;
use crate::service::RegistryService;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

/// Listener settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: String,
    /// Require `Authorization: Bearer <token>` on every route but `/health`
    pub auth_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            auth_token: None,
        }
    }
}

/// Serve the registry until Ctrl-C
pub async fn run_server<S: StorageBackend + ?Sized + 'static>(
    service: Arc<RegistryService<S>>,
    config: ServerConfig,
) -> anyhow::Result<()> {
    service.initialize().await?;

    if config.auth_token.is_some() {
        tracing::info!("Bearer token authentication enabled");
    }
    let router = create_router(service.clone(), config.auth_token);

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    tracing::info!("xreg server listening on {}", listener.local_addr()?);
    tracing::info!("  Registry: {}/", service.base_url());
    tracing::info!("  Health check: http://{}/health", config.listen);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.storage().close().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
