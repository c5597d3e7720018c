//! Ingestion: attachment -> resolved provider path -> stored record -> reply.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use futures::future::join_all;

use crate::{
    config::Config,
    domain::ChatId,
    filename::{derive_display_name, NameSource},
    formatting::{escape_html, format_bytes, link_message},
    messaging::port::MessagingPort,
    ports::{FileProvider, ProviderError, ResolvedFile},
    retry::{run_with_retry, RetryError, RetryPolicy},
    store::{FileRecord, FileStore},
};

/// A file-bearing message attachment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Attachment {
    Document {
        file_ref: String,
        file_name: Option<String>,
        mime_type: Option<String>,
        size: Option<u64>,
    },
    /// The largest resolution variant of a photo.
    Photo {
        file_ref: String,
        width: u32,
        height: u32,
        size: Option<u64>,
    },
    Video {
        file_ref: String,
        file_name: Option<String>,
        mime_type: Option<String>,
        size: Option<u64>,
        width: u32,
        height: u32,
    },
    Audio {
        file_ref: String,
        file_name: Option<String>,
        mime_type: Option<String>,
        size: Option<u64>,
        performer: Option<String>,
        title: Option<String>,
    },
}

impl Attachment {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Document { .. } => "document",
            Self::Photo { .. } => "photo",
            Self::Video { .. } => "video",
            Self::Audio { .. } => "audio",
        }
    }

    pub fn file_ref(&self) -> &str {
        match self {
            Self::Document { file_ref, .. }
            | Self::Photo { file_ref, .. }
            | Self::Video { file_ref, .. }
            | Self::Audio { file_ref, .. } => file_ref,
        }
    }

    pub fn size(&self) -> Option<u64> {
        match self {
            Self::Document { size, .. }
            | Self::Photo { size, .. }
            | Self::Video { size, .. }
            | Self::Audio { size, .. } => *size,
        }
    }

    /// Name supplied by the uploader. Untitled audio falls back to
    /// `performer - title` tags.
    pub fn original_name(&self) -> Option<String> {
        match self {
            Self::Document { file_name, .. } | Self::Video { file_name, .. } => file_name.clone(),
            Self::Photo { .. } => None,
            Self::Audio {
                file_name,
                performer,
                title,
                ..
            } => file_name.clone().or_else(|| match (performer, title) {
                (Some(p), Some(t)) => Some(format!("{p} - {t}")),
                (None, Some(t)) => Some(t.clone()),
                _ => None,
            }),
        }
    }

    pub fn mime_type(&self) -> Option<&str> {
        match self {
            Self::Document { mime_type, .. }
            | Self::Video { mime_type, .. }
            | Self::Audio { mime_type, .. } => mime_type.as_deref(),
            // Telegram re-encodes photos as JPEG.
            Self::Photo { .. } => Some("image/jpeg"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub public_base_url: String,
    pub max_file_size: Option<u64>,
    pub provider_timeout: Duration,
    pub resolve_retry: RetryPolicy,
    pub flush_on_write: bool,
}

impl From<&Config> for IngestConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            public_base_url: cfg.public_base_url.clone(),
            max_file_size: cfg.max_file_size,
            provider_timeout: cfg.provider_timeout,
            resolve_retry: cfg.resolve_retry,
            flush_on_write: cfg.flush_on_write,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("message has no supported attachment")]
    NoAttachment,

    #[error("file is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("could not resolve file after {attempts} attempts: {last}")]
    ResolveExhausted { attempts: u32, last: ProviderError },

    #[error("provider refused file: {0}")]
    ResolveRejected(ProviderError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// Short text shown to the uploader (Telegram HTML).
    pub fn user_message(&self) -> String {
        match self {
            Self::NoAttachment => {
                "❌ No file found. Send a document, photo, video or audio file.".to_string()
            }
            Self::TooLarge { size, limit } => format!(
                "❌ File too large ({}). Maximum is {}.",
                format_bytes(*size),
                format_bytes(*limit)
            ),
            Self::ResolveExhausted { .. } => {
                "❌ Telegram did not hand out this file. Please try again later.".to_string()
            }
            Self::ResolveRejected(e) => format!(
                "❌ Telegram refused this file: {}",
                escape_html(&e.to_string().chars().take(100).collect::<String>())
            ),
            Self::Internal(_) => "❌ Something went wrong while saving this file.".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ingested {
    pub record: FileRecord,
    pub url: String,
}

/// Turns attachments into stored records and replies to the sender.
///
/// The ingestor is the only writer of the [`FileStore`].
pub struct Ingestor {
    cfg: IngestConfig,
    store: Arc<FileStore>,
    files: Arc<dyn FileProvider>,
    messenger: Arc<dyn MessagingPort>,
}

impl Ingestor {
    pub fn new(
        cfg: IngestConfig,
        store: Arc<FileStore>,
        files: Arc<dyn FileProvider>,
        messenger: Arc<dyn MessagingPort>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            store,
            files,
            messenger,
        })
    }

    pub fn download_url(&self, slug: &str) -> String {
        format!("{}/{slug}", self.cfg.public_base_url)
    }

    /// Validate, resolve, name and store one attachment.
    ///
    /// The store is only touched once every fallible step has passed.
    pub async fn ingest(&self, attachment: Option<Attachment>) -> Result<Ingested, IngestError> {
        let attachment = attachment.ok_or(IngestError::NoAttachment)?;
        self.check_size(attachment.size())?;

        let resolved = self.resolve(attachment.file_ref()).await?;
        let size = attachment.size().or(resolved.size);
        if attachment.size().is_none() {
            self.check_size(size)?;
        }

        let now = Utc::now().timestamp_millis();
        let original = attachment.original_name();
        let display_name = derive_display_name(&NameSource {
            original_name: original.as_deref(),
            provider_path: Some(&resolved.path),
            mime_type: attachment.mime_type(),
            timestamp_ms: now,
        });

        let record = self
            .store
            .insert_new(|slug| FileRecord {
                slug,
                file_id: attachment.file_ref().to_string(),
                file_path: Some(resolved.path.clone()),
                display_name,
                mime_type: attachment.mime_type().map(str::to_string),
                size_bytes: size,
                created_at: now,
            })
            .await;

        if self.cfg.flush_on_write {
            self.store.flush_logged().await;
        }

        tracing::info!(
            slug = %record.slug,
            kind = attachment.kind(),
            file_id = %record.file_id,
            name = %record.display_name,
            "file ingested"
        );

        Ok(Ingested {
            url: self.download_url(&record.slug),
            record,
        })
    }

    /// Ingest a single attachment and reply with the link or the error.
    ///
    /// Ingestion runs in its own task so a panic surfaces as
    /// [`IngestError::Internal`] instead of taking the dispatcher down.
    pub async fn handle_message(
        self: &Arc<Self>,
        chat_id: ChatId,
        attachment: Option<Attachment>,
    ) -> Result<Ingested, IngestError> {
        let outcome = self.spawn_ingest(attachment).await;

        let html = match &outcome {
            Ok(done) => link_message(&done.url, &done.record.display_name, done.record.size_bytes),
            Err(e) => {
                log_failure(chat_id, e);
                e.user_message()
            }
        };
        self.reply(chat_id, &html).await;

        outcome
    }

    /// Ingest every item of an album concurrently; one combined reply.
    ///
    /// Items succeed or fail independently.
    pub async fn handle_album(
        self: &Arc<Self>,
        chat_id: ChatId,
        attachments: Vec<Attachment>,
    ) -> Vec<Result<Ingested, IngestError>> {
        if attachments.is_empty() {
            let err = IngestError::NoAttachment;
            self.reply(chat_id, &err.user_message()).await;
            return vec![Err(err)];
        }

        let outcomes = join_all(
            attachments
                .into_iter()
                .map(|a| self.spawn_ingest(Some(a))),
        )
        .await;

        for e in outcomes.iter().filter_map(|o| o.as_ref().err()) {
            log_failure(chat_id, e);
        }
        self.reply(chat_id, &album_message(&outcomes)).await;

        outcomes
    }

    async fn spawn_ingest(
        self: &Arc<Self>,
        attachment: Option<Attachment>,
    ) -> Result<Ingested, IngestError> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.ingest(attachment).await })
            .await
            .unwrap_or_else(|e| Err(IngestError::Internal(format!("ingest task failed: {e}"))))
    }

    fn check_size(&self, size: Option<u64>) -> Result<(), IngestError> {
        match (self.cfg.max_file_size, size) {
            (Some(limit), Some(size)) if size > limit => Err(IngestError::TooLarge { size, limit }),
            _ => Ok(()),
        }
    }

    async fn resolve(&self, file_ref: &str) -> Result<ResolvedFile, IngestError> {
        let timeout = self.cfg.provider_timeout;
        let files = Arc::clone(&self.files);
        let file_ref = file_ref.to_string();

        run_with_retry(&self.cfg.resolve_retry, ProviderError::is_transient, || {
            let files = Arc::clone(&files);
            let file_ref = file_ref.clone();
            async move {
                tokio::time::timeout(timeout, files.resolve_file(&file_ref))
                    .await
                    .unwrap_or(Err(ProviderError::Timeout))
            }
        })
        .await
        .map_err(|e| match e {
            RetryError::Exhausted { attempts, last } => {
                IngestError::ResolveExhausted { attempts, last }
            }
            RetryError::Fatal(e) => IngestError::ResolveRejected(e),
        })
    }

    async fn reply(&self, chat_id: ChatId, html: &str) {
        if let Err(e) = self.messenger.send_html(chat_id, html).await {
            tracing::error!(chat_id = chat_id.0, error = %e, "failed to send reply");
        }
    }
}

fn log_failure(chat_id: ChatId, e: &IngestError) {
    match e {
        IngestError::NoAttachment | IngestError::TooLarge { .. } => {
            tracing::info!(chat_id = chat_id.0, error = %e, "ingestion rejected")
        }
        _ => tracing::warn!(chat_id = chat_id.0, error = %e, "ingestion failed"),
    }
}

fn album_message(outcomes: &[Result<Ingested, IngestError>]) -> String {
    let ok = outcomes.iter().filter(|o| o.is_ok()).count();
    let mut out = format!(
        "🌐 <b>Permanent Download Links</b> ({ok}/{} files):\n",
        outcomes.len()
    );
    for (i, outcome) in outcomes.iter().enumerate() {
        out.push('\n');
        match outcome {
            Ok(done) => {
                let url = escape_html(&done.url);
                out.push_str(&format!(
                    "{}. <a href=\"{url}\">{url}</a>\n📁 {}",
                    i + 1,
                    escape_html(&done.record.display_name)
                ));
            }
            Err(e) => out.push_str(&format!("{}. {}", i + 1, e.user_message())),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        domain::{MessageId, MessageRef},
        slug,
    };

    /// Fails `fail_first` calls transiently, then resolves. Special refs:
    /// `rejected`, `panic`, `slow`.
    #[derive(Default)]
    struct MockFiles {
        fail_first: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl FileProvider for MockFiles {
        async fn resolve_file(&self, file_ref: &str) -> Result<ResolvedFile, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match file_ref {
                "rejected" => return Err(ProviderError::Rejected("file is too big".into())),
                "panic" => panic!("provider blew up"),
                "slow" => tokio::time::sleep(Duration::from_secs(5)).await,
                _ => {}
            }
            if n <= self.fail_first {
                return Err(ProviderError::Transient("connection reset".into()));
            }
            Ok(ResolvedFile {
                path: format!("documents/{file_ref}.pdf"),
                size: Some(1234),
            })
        }

        fn download_url(&self, path: &str) -> String {
            format!("https://files.example/{path}")
        }
    }

    #[derive(Default)]
    struct MockMessenger {
        sent: Mutex<Vec<(ChatId, String)>>,
    }

    impl MockMessenger {
        fn sent(&self) -> Vec<(ChatId, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessagingPort for MockMessenger {
        async fn send_html(&self, chat_id: ChatId, html: &str) -> crate::Result<MessageRef> {
            self.sent.lock().unwrap().push((chat_id, html.to_string()));
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(1),
            })
        }
    }

    struct Harness {
        ingestor: Arc<Ingestor>,
        store: Arc<FileStore>,
        files: Arc<MockFiles>,
        messenger: Arc<MockMessenger>,
        _dir: tempfile::TempDir,
    }

    fn harness(files: MockFiles, flush_on_write: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::load(dir.path().join("db.json")));
        let files = Arc::new(files);
        let messenger = Arc::new(MockMessenger::default());
        let ingestor = Ingestor::new(
            IngestConfig {
                public_base_url: "https://dl.example".to_string(),
                max_file_size: Some(2 * 1024 * 1024 * 1024),
                provider_timeout: Duration::from_millis(50),
                resolve_retry: RetryPolicy {
                    max_attempts: 3,
                    backoff: Duration::from_millis(1),
                },
                flush_on_write,
            },
            store.clone(),
            files.clone(),
            messenger.clone(),
        );
        Harness {
            ingestor,
            store,
            files,
            messenger,
            _dir: dir,
        }
    }

    fn doc(file_ref: &str, name: Option<&str>, size: Option<u64>) -> Attachment {
        Attachment::Document {
            file_ref: file_ref.to_string(),
            file_name: name.map(str::to_string),
            mime_type: Some("application/pdf".to_string()),
            size,
        }
    }

    const CHAT: ChatId = ChatId(42);

    #[tokio::test]
    async fn stores_record_and_replies_with_link() {
        let h = harness(MockFiles::default(), false);
        let done = h
            .ingestor
            .handle_message(CHAT, Some(doc("fid1", Some("Annual Report.pdf"), Some(10))))
            .await
            .unwrap();

        assert!(slug::is_valid(&done.record.slug));
        assert_eq!(done.url, format!("https://dl.example/{}", done.record.slug));
        assert_eq!(done.record.display_name, "Annual_Report.pdf");
        assert_eq!(done.record.file_path.as_deref(), Some("documents/fid1.pdf"));
        assert_eq!(h.store.get(&done.record.slug).await, Some(done.record.clone()));

        let sent = h.messenger.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, CHAT);
        assert!(sent[0].1.contains(&done.url));
        assert!(sent[0].1.contains("Annual_Report.pdf"));
    }

    #[tokio::test]
    async fn missing_attachment_is_rejected_without_store_change() {
        let h = harness(MockFiles::default(), false);
        let out = h.ingestor.handle_message(CHAT, None).await;
        assert!(matches!(out, Err(IngestError::NoAttachment)));
        assert!(h.store.is_empty().await);
        assert!(h.messenger.sent()[0].1.contains("No file found"));
    }

    #[tokio::test]
    async fn oversize_file_is_rejected_before_resolving() {
        let h = harness(MockFiles::default(), false);
        let out = h
            .ingestor
            .handle_message(CHAT, Some(doc("big", Some("big.iso"), Some(3 * 1024 * 1024 * 1024))))
            .await;
        assert!(matches!(out, Err(IngestError::TooLarge { .. })));
        assert!(h.store.is_empty().await);
        assert_eq!(h.files.calls.load(Ordering::SeqCst), 0);
        assert!(h.messenger.sent()[0].1.contains("File too large"));
    }

    #[tokio::test]
    async fn transient_resolve_failures_are_retried() {
        let h = harness(
            MockFiles {
                fail_first: 2,
                ..Default::default()
            },
            false,
        );
        let done = h.ingestor.ingest(Some(doc("fid2", None, None))).await.unwrap();
        assert_eq!(h.files.calls.load(Ordering::SeqCst), 3);
        // Size learned from the provider when the message carried none.
        assert_eq!(done.record.size_bytes, Some(1234));
        assert_eq!(done.record.display_name, "fid2.pdf");
    }

    #[tokio::test]
    async fn exhausted_retries_leave_store_untouched() {
        let h = harness(
            MockFiles {
                fail_first: 10,
                ..Default::default()
            },
            false,
        );
        let out = h.ingestor.handle_message(CHAT, Some(doc("fid3", None, Some(1)))).await;
        assert!(matches!(
            out,
            Err(IngestError::ResolveExhausted { attempts: 3, .. })
        ));
        assert_eq!(h.files.calls.load(Ordering::SeqCst), 3);
        assert!(h.store.is_empty().await);
        assert!(h.messenger.sent()[0].1.contains("try again later"));
    }

    #[tokio::test]
    async fn rejected_files_are_not_retried() {
        let h = harness(MockFiles::default(), false);
        let out = h.ingestor.ingest(Some(doc("rejected", None, Some(1)))).await;
        assert!(matches!(out, Err(IngestError::ResolveRejected(_))));
        assert_eq!(h.files.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_provider_times_out_and_counts_as_transient() {
        let h = harness(MockFiles::default(), false);
        let out = h.ingestor.ingest(Some(doc("slow", None, Some(1)))).await;
        assert!(matches!(
            out,
            Err(IngestError::ResolveExhausted {
                last: ProviderError::Timeout,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn panicking_provider_is_contained() {
        let h = harness(MockFiles::default(), false);
        let out = h.ingestor.handle_message(CHAT, Some(doc("panic", None, Some(1)))).await;
        assert!(matches!(out, Err(IngestError::Internal(_))));
        assert!(h.store.is_empty().await);
        assert!(h.messenger.sent()[0].1.contains("Something went wrong"));
    }

    #[tokio::test]
    async fn photos_are_named_from_provider_path() {
        let h = harness(MockFiles::default(), false);
        let done = h
            .ingestor
            .ingest(Some(Attachment::Photo {
                file_ref: "photo1".to_string(),
                width: 1280,
                height: 960,
                size: Some(99),
            }))
            .await
            .unwrap();
        assert_eq!(done.record.display_name, "photo1.pdf");
        assert_eq!(done.record.mime_type.as_deref(), Some("image/jpeg"));
    }

    #[tokio::test]
    async fn album_items_succeed_or_fail_independently() {
        let h = harness(MockFiles::default(), false);
        let outcomes = h
            .ingestor
            .handle_album(
                CHAT,
                vec![
                    doc("a", Some("a.pdf"), Some(1)),
                    doc("rejected", Some("b.pdf"), Some(1)),
                    doc("c", Some("c.pdf"), Some(1)),
                ],
            )
            .await;

        assert_eq!(outcomes.len(), 3);
        let a = outcomes[0].as_ref().unwrap();
        assert!(outcomes[1].is_err());
        let c = outcomes[2].as_ref().unwrap();
        assert_ne!(a.record.slug, c.record.slug);
        assert_eq!(h.store.len().await, 2);

        let sent = h.messenger.sent();
        assert_eq!(sent.len(), 1, "album gets one combined reply");
        assert!(sent[0].1.contains("(2/3 files)"));
        assert!(sent[0].1.contains(&a.url) && sent[0].1.contains(&c.url));
        assert!(sent[0].1.contains("refused"));
    }

    #[tokio::test]
    async fn concurrent_ingestion_survives_flush_and_reload() {
        let h = harness(MockFiles::default(), true);
        let (one, two) = tokio::join!(
            h.ingestor.ingest(Some(doc("x1", Some("one.txt"), Some(1)))),
            h.ingestor.ingest(Some(doc("x2", Some("two.txt"), Some(1)))),
        );
        let (one, two) = (one.unwrap(), two.unwrap());
        assert_ne!(one.record.slug, two.record.slug);
        assert!(!h.store.is_dirty().await, "flush_on_write persists immediately");

        let reloaded = FileStore::load(h.store.path());
        assert_eq!(reloaded.get(&one.record.slug).await, Some(one.record));
        assert_eq!(reloaded.get(&two.record.slug).await, Some(two.record));
    }

    #[test]
    fn audio_name_falls_back_to_tags() {
        let a = Attachment::Audio {
            file_ref: "f".into(),
            file_name: None,
            mime_type: Some("audio/mpeg".into()),
            size: None,
            performer: Some("Artist".into()),
            title: Some("Song".into()),
        };
        assert_eq!(a.original_name().as_deref(), Some("Artist - Song"));
        assert_eq!(a.kind(), "audio");
    }
}
