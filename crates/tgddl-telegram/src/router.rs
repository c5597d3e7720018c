use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tgddl_core::{
    config::Config,
    domain::ChatId,
    ingest::{Attachment, Ingestor},
    messaging::port::MessagingPort,
};

use crate::handlers::{
    self,
    media_group::{AlbumBuffer, BoxFuture, ProcessFn},
};

#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<Ingestor>,
    pub messenger: Arc<dyn MessagingPort>,
    pub albums: Arc<AlbumBuffer>,
}

impl AppState {
    pub fn new(
        cfg: &Config,
        ingestor: Arc<Ingestor>,
        messenger: Arc<dyn MessagingPort>,
    ) -> Arc<Self> {
        let album_ingestor = ingestor.clone();
        let process: ProcessFn = Arc::new(move |chat_id: ChatId, items: Vec<Attachment>| {
            let ingestor = album_ingestor.clone();
            let fut: BoxFuture = Box::pin(async move {
                // Per-item outcomes are already in the combined reply.
                let _ = ingestor.handle_album(chat_id, items).await;
            });
            fut
        });

        Arc::new(Self {
            ingestor,
            messenger,
            albums: AlbumBuffer::new(cfg.media_group_timeout, process),
        })
    }
}

/// Long-poll Telegram and dispatch messages until the future is dropped.
pub async fn run_polling(bot: Bot, state: Arc<AppState>) -> anyhow::Result<()> {
    match bot.get_me().await {
        Ok(me) => tracing::info!(username = %me.username(), "bot started"),
        Err(e) => tracing::warn!(error = %e, "getMe failed, polling anyway"),
    }

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|upd| async move {
            tracing::debug!(update_id = ?upd.id, "ignoring non-message update");
        })
        .build()
        .dispatch()
        .await;

    Ok(())
}
