//! Telegram update handlers.
//!
//! Each handler is a thin adapter that turns a teloxide `Message` into an
//! [`Attachment`](tgddl_core::ingest::Attachment) and hands it to the core
//! ingestor. Failures are answered in-chat; handlers always return `Ok`.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use tgddl_core::domain::ChatId;

use crate::router::AppState;

pub mod attachment;
mod commands;
pub mod media_group;

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if msg.text().is_some_and(|t| t.starts_with('/')) {
        return commands::handle_command(msg, state).await;
    }

    let chat_id = ChatId(msg.chat.id.0);
    let attachment = attachment::from_message(&msg);

    match (attachment, msg.media_group_id()) {
        (Some(item), Some(group_id)) => {
            state.albums.add(group_id.to_string(), chat_id, item).await;
        }
        (attachment, _) => {
            // The ingestor already replied and logged the outcome.
            let _ = state.ingestor.handle_message(chat_id, attachment).await;
        }
    }

    Ok(())
}
