use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use tgddl_core::{domain::ChatId, ingest::Attachment};

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type ProcessFn = Arc<dyn Fn(ChatId, Vec<Attachment>) -> BoxFuture + Send + Sync>;

struct PendingAlbum {
    items: Vec<Attachment>,
    chat_id: ChatId,
    cancel: CancellationToken,
}

/// Collects the messages of one Telegram album (`media_group_id`).
///
/// Telegram delivers every album item as its own message. Items are
/// buffered until no new item arrived for `timeout`, then the whole album is
/// handed to `process` at once.
pub struct AlbumBuffer {
    timeout: Duration,
    process: ProcessFn,
    pending: tokio::sync::Mutex<HashMap<String, PendingAlbum>>,
}

impl AlbumBuffer {
    pub fn new(timeout: Duration, process: ProcessFn) -> Arc<Self> {
        Arc::new(Self {
            timeout,
            process,
            pending: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    pub async fn add(self: &Arc<Self>, media_group_id: String, chat_id: ChatId, item: Attachment) {
        let cancel = CancellationToken::new();

        let mut map = self.pending.lock().await;
        match map.get_mut(&media_group_id) {
            Some(album) => {
                // Existing album: push and reset the quiet-period timer.
                album.items.push(item);
                album.cancel.cancel();
                album.cancel = cancel.clone();
            }
            None => {
                map.insert(
                    media_group_id.clone(),
                    PendingAlbum {
                        items: vec![item],
                        chat_id,
                        cancel: cancel.clone(),
                    },
                );
            }
        }
        drop(map);

        self.spawn_timer(media_group_id, cancel);
    }

    pub async fn pending_albums(&self) -> usize {
        self.pending.lock().await.len()
    }

    fn spawn_timer(self: &Arc<Self>, media_group_id: String, cancel: CancellationToken) {
        let buffer = Arc::clone(self);
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    buffer.process_album(&media_group_id).await;
                }
            }
        });
    }

    async fn process_album(&self, media_group_id: &str) {
        let album = {
            let mut map = self.pending.lock().await;
            map.remove(media_group_id)
        };

        let Some(album) = album else {
            return;
        };

        tracing::info!(
            media_group_id,
            chat_id = album.chat_id.0,
            items = album.items.len(),
            "processing album"
        );
        (self.process)(album.chat_id, album.items).await;
    }
}
