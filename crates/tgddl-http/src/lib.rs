//! HTTP adapter (axum): resolves public slugs into downloads.
//!
//! `GET /{slug}` either redirects to Telegram's file URL or proxies the
//! bytes, depending on [`DownloadMode`].

use std::{sync::Arc, time::Duration};

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use tgddl_core::{
    config::{Config, DownloadMode},
    errors::Error,
    ports::FileProvider,
    store::FileStore,
    Result,
};

pub mod error;
pub mod handlers;

/// Shared state of the resolution endpoint. Read-only towards the store.
#[derive(Clone)]
pub struct HttpState {
    pub store: Arc<FileStore>,
    pub files: Arc<dyn FileProvider>,
    pub client: reqwest::Client,
    pub mode: DownloadMode,
    /// Bound on provider resolution and on receiving upstream headers.
    pub provider_timeout: Duration,
}

impl HttpState {
    pub fn new(cfg: &Config, store: Arc<FileStore>, files: Arc<dyn FileProvider>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(cfg.provider_timeout)
            .build()
            .map_err(|e| Error::External(format!("failed to build http client: {e}")))?;

        Ok(Self {
            store,
            files,
            client,
            mode: cfg.download_mode,
            provider_timeout: cfg.provider_timeout,
        })
    }
}

/// Create the application router.
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/{slug}", get(handlers::download))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `router(state)` on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: HttpState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
