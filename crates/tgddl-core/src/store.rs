//! Slug -> file metadata store, persisted as a single JSON document.
//!
//! On-disk shape: `{ "files": { "<slug>": FileRecord, ... } }`, rewritten
//! wholesale on every flush.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;

use crate::{
    errors::Error,
    filename::{derive_display_name, NameSource},
    slug, Result,
};

/// One ingested file.
///
/// The aliases accept records written by older deployments
/// (`original_name`, `timestamp`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(default)]
    pub slug: String,
    /// Telegram `file_id`.
    pub file_id: String,
    /// Provider path resolved at ingestion time. May go stale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(alias = "original_name")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// Unix millis.
    #[serde(default, alias = "timestamp")]
    pub created_at: i64,
}

#[derive(Deserialize)]
struct StoreFile {
    #[serde(default)]
    files: HashMap<String, FileRecord>,
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    files: BTreeMap<&'a str, &'a FileRecord>,
}

#[derive(Default)]
struct Inner {
    files: HashMap<String, FileRecord>,
    generation: u64,
}

pub struct FileStore {
    path: PathBuf,
    inner: RwLock<Inner>,
    /// Generation last written to disk.
    persisted: AtomicU64,
    flush_lock: Mutex<()>,
}

impl FileStore {
    /// Load persisted state from `path`.
    ///
    /// A missing, empty or unreadable file yields an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let files = match read_store_file(&path) {
            Ok(files) => {
                tracing::info!(path = %path.display(), entries = files.len(), "loaded file store");
                files
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "could not read file store, starting empty"
                );
                HashMap::new()
            }
        };

        Self {
            path,
            inner: RwLock::new(Inner {
                files,
                generation: 0,
            }),
            persisted: AtomicU64::new(0),
            flush_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self, slug: &str) -> Option<FileRecord> {
        self.inner.read().await.files.get(slug).cloned()
    }

    pub async fn contains(&self, slug: &str) -> bool {
        self.inner.read().await.files.contains_key(slug)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.files.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Insert (or replace) a record keyed by its slug.
    pub async fn insert(&self, record: FileRecord) {
        let mut inner = self.inner.write().await;
        inner.files.insert(record.slug.clone(), record);
        inner.generation += 1;
    }

    /// Mint a slug that is unused at insertion time and insert the record
    /// built for it. Minting and insertion happen under one write lock.
    pub async fn insert_new(&self, build: impl FnOnce(String) -> FileRecord) -> FileRecord {
        let mut inner = self.inner.write().await;
        let slug = slug::mint_unique(|s| inner.files.contains_key(s));
        let mut record = build(slug.clone());
        record.slug = slug.clone();
        inner.files.insert(slug, record.clone());
        inner.generation += 1;
        record
    }

    /// Consistent copy of the mapping and the generation it reflects.
    pub async fn snapshot(&self) -> (u64, HashMap<String, FileRecord>) {
        let inner = self.inner.read().await;
        (inner.generation, inner.files.clone())
    }

    /// Whether there are changes not yet written to disk.
    pub async fn is_dirty(&self) -> bool {
        self.inner.read().await.generation != self.persisted.load(Ordering::SeqCst)
    }

    /// Write the current mapping to disk if it changed since the last
    /// successful flush. Returns whether a write happened.
    ///
    /// The file is written to `<path>.tmp` and renamed over the target.
    pub async fn flush(&self) -> Result<bool> {
        let _serial = self.flush_lock.lock().await;

        if !self.is_dirty().await {
            return Ok(false);
        }
        let (generation, files) = self.snapshot().await;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_store_file(&path, &files))
            .await
            .map_err(|e| Error::External(format!("flush task failed: {e}")))??;

        self.persisted.store(generation, Ordering::SeqCst);
        Ok(true)
    }

    /// Flush and log the outcome. Failures leave the store dirty so the
    /// next call retries.
    pub async fn flush_logged(&self) {
        match self.flush().await {
            Ok(true) => tracing::debug!(path = %self.path.display(), "file store flushed"),
            Ok(false) => {}
            Err(e) => tracing::error!(
                path = %self.path.display(),
                error = %e,
                "failed to flush file store, will retry"
            ),
        }
    }

    /// Flush every `every` until `cancel` fires, then flush one last time.
    pub fn spawn_flush_loop(
        self: Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately.
            tick.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => self.flush_logged().await,
                }
            }

            self.flush_logged().await;
            tracing::info!("flush loop stopped");
        })
    }
}

fn read_store_file(path: &Path) -> Result<HashMap<String, FileRecord>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let txt = fs::read_to_string(path)?;
    if txt.trim().is_empty() {
        return Ok(HashMap::new());
    }

    let data: StoreFile = serde_json::from_str(&txt)?;
    let mut files = data.files;
    // The map key is authoritative. Names are re-derived because older
    // deployments stored the uploader's name verbatim.
    for (slug, record) in files.iter_mut() {
        if record.slug != *slug {
            record.slug = slug.clone();
        }
        record.display_name = derive_display_name(&NameSource {
            original_name: Some(&record.display_name),
            provider_path: record.file_path.as_deref(),
            mime_type: record.mime_type.as_deref(),
            timestamp_ms: record.created_at,
        });
    }
    Ok(files)
}

fn write_store_file(path: &Path, files: &HashMap<String, FileRecord>) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }

    let doc = StoreFileRef {
        files: files.iter().map(|(k, v)| (k.as_str(), v)).collect(),
    };
    let bytes = serde_json::to_vec_pretty(&doc)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut f = fs::File::create(&tmp)?;
    f.write_all(&bytes)?;
    f.sync_all()?;
    drop(f);

    fs::rename(&tmp, path)?;
    Ok(())
}
