use std::{io, time::Duration};

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{stream, Stream, StreamExt};
use tgddl_core::{config::DownloadMode, slug, store::FileRecord};
use tracing::{debug, warn};

use crate::{error::ResolveError, HttpState};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Liveness route.
pub async fn index() -> &'static str {
    "Telegram direct download relay is running."
}

/// Resolve a slug into a download.
///
/// # Errors
///
/// - `NotFound` when the slug is malformed or unknown.
/// - `Gone` when the provider can no longer produce the file.
pub async fn download(
    State(state): State<HttpState>,
    Path(slug): Path<String>,
) -> Result<Response, ResolveError> {
    if !slug::is_valid(&slug) {
        return Err(ResolveError::NotFound);
    }
    let record = state.store.get(&slug).await.ok_or(ResolveError::NotFound)?;

    match state.mode {
        DownloadMode::Redirect => redirect(&state, &record).await,
        DownloadMode::Stream => stream(&state, &record).await,
    }
}

/// Ask the provider for a fresh path. Provider paths expire, so the stored
/// one is only a fallback.
async fn fresh_path(state: &HttpState, record: &FileRecord) -> Result<String, ResolveError> {
    match tokio::time::timeout(state.provider_timeout, state.files.resolve_file(&record.file_id))
        .await
    {
        Ok(Ok(resolved)) => Ok(resolved.path),
        Ok(Err(e)) => Err(ResolveError::Gone(e.to_string())),
        Err(_) => Err(ResolveError::Gone("provider timed out".to_string())),
    }
}

async fn redirect(state: &HttpState, record: &FileRecord) -> Result<Response, ResolveError> {
    let path = fresh_path(state, record).await.inspect_err(|e| {
        warn!(slug = %record.slug, error = %e, "Resolution failed");
    })?;
    let target = state.files.download_url(&path);
    let location =
        HeaderValue::from_str(&target).map_err(|e| ResolveError::Internal(e.to_string()))?;

    debug!(slug = %record.slug, "Redirecting");
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

async fn stream(state: &HttpState, record: &FileRecord) -> Result<Response, ResolveError> {
    let path = match fresh_path(state, record).await {
        Ok(path) => path,
        Err(e) => match record.file_path.clone() {
            Some(stored) => {
                debug!(slug = %record.slug, error = %e, "Falling back to stored path");
                stored
            }
            None => {
                warn!(slug = %record.slug, error = %e, "Resolution failed");
                return Err(e);
            }
        },
    };
    let url = state.files.download_url(&path);

    let upstream = match tokio::time::timeout(state.provider_timeout, state.client.get(&url).send()).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => {
            let e = e.without_url();
            warn!(slug = %record.slug, error = %e, "Upstream fetch failed");
            return Err(ResolveError::Gone(e.to_string()));
        }
        Err(_) => {
            warn!(slug = %record.slug, "Upstream timed out");
            return Err(ResolveError::Gone("upstream timed out".to_string()));
        }
    };

    if !upstream.status().is_success() {
        warn!(slug = %record.slug, status = %upstream.status(), "Upstream refused file");
        return Err(ResolveError::Gone(format!("upstream status {}", upstream.status())));
    }

    let content_type = record
        .mime_type
        .as_deref()
        .and_then(|m| HeaderValue::from_str(m).ok())
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    let content_length = upstream.content_length();

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", record.display_name),
        )
        .header(HeaderName::from_static("x-content-type-options"), "nosniff");
    if let Some(len) = content_length {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }

    debug!(slug = %record.slug, "Streaming");
    builder
        .body(Body::from_stream(idle_bounded(
            upstream,
            state.provider_timeout,
            record.slug.clone(),
        )))
        .map_err(|e| ResolveError::Internal(e.to_string()))
}

/// Upstream body that fails once no chunk arrived for `idle`. Total
/// duration is unbounded so large files can take as long as they need.
fn idle_bounded(
    upstream: reqwest::Response,
    idle: Duration,
    slug: String,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    let chunks = Box::pin(upstream.bytes_stream());
    stream::unfold(Some(chunks), move |state| {
        let slug = slug.clone();
        async move {
            let mut chunks = state?;
            match tokio::time::timeout(idle, chunks.next()).await {
                Ok(Some(Ok(bytes))) => Some((Ok(bytes), Some(chunks))),
                Ok(Some(Err(e))) => {
                    let e = e.without_url();
                    warn!(slug = %slug, error = %e, "Upstream body failed");
                    Some((Err(io::Error::other(e)), None))
                }
                Ok(None) => None,
                Err(_) => {
                    warn!(slug = %slug, "Upstream body stalled");
                    Some((
                        Err(io::Error::new(io::ErrorKind::TimedOut, "upstream stalled")),
                        None,
                    ))
                }
            }
        }
    })
}
