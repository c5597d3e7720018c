use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    Result,
};

/// Outbound messaging port used to reply to uploaders.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    /// Send a message rendered with Telegram's HTML parse mode.
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef>;
}
