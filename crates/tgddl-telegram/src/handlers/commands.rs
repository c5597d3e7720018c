use std::sync::Arc;

use teloxide::prelude::*;

use tgddl_core::domain::ChatId;

use crate::router::AppState;

const HELP: &str = "📎 <b>Direct download links</b>\n\n\
Send me a document, photo, video or audio file (or an album of them) and I \
will reply with a permanent link that downloads it directly.\n\n\
Anyone holding the link can download the file.";

pub async fn handle_command(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let chat_id = ChatId(msg.chat.id.0);
    let text = msg.text().unwrap_or("");
    let command = text
        .split_whitespace()
        .next()
        .unwrap_or("")
        .split('@')
        .next()
        .unwrap_or("");

    let reply = match command {
        "/start" | "/help" => HELP.to_string(),
        other => format!(
            "Unknown command <code>{}</code>. Send a file, or /help.",
            tgddl_core::formatting::escape_html(other)
        ),
    };

    if let Err(e) = state.messenger.send_html(chat_id, &reply).await {
        tracing::warn!(chat_id = chat_id.0, error = %e, "failed to answer command");
    }
    Ok(())
}
