use async_trait::async_trait;

/// A provider-side path resolved from a file reference.
///
/// Telegram keeps these valid for at least an hour; after that the path must
/// be resolved again from the file reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedFile {
    pub path: String,
    pub size: Option<u64>,
}

/// Failure talking to the file provider.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Network hiccup, flood control or a malformed response. Worth retrying.
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("provider call timed out")]
    Timeout,

    /// The provider answered and refused (unknown file id, file too big, ...).
    #[error("provider rejected request: {0}")]
    Rejected(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout)
    }
}

/// Port onto the messaging provider's file storage.
#[async_trait]
pub trait FileProvider: Send + Sync {
    /// Resolve an opaque file reference into a fetchable provider path.
    async fn resolve_file(&self, file_ref: &str) -> Result<ResolvedFile, ProviderError>;

    /// Absolute URL serving the bytes behind a resolved path.
    fn download_url(&self, path: &str) -> String;
}
