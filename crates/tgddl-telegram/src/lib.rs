//! Telegram adapter (teloxide).
//!
//! Implements the `tgddl-core` messaging and file-provider ports over the
//! Telegram Bot API and runs the long-polling dispatcher.

use async_trait::async_trait;

use teloxide::{prelude::*, types::ParseMode, RequestError};

pub mod handlers;
pub mod router;

use tgddl_core::{
    config::Config,
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::port::MessagingPort,
    ports::{FileProvider, ProviderError, ResolvedFile},
    retry::{run_with_retry, RetryPolicy},
    Result,
};

/// Build a bot client for `cfg`, honouring a self-hosted Bot API server.
pub fn build_bot(cfg: &Config) -> Result<Bot> {
    let bot = Bot::new(cfg.bot_token.clone());
    if cfg.telegram_api_url == tgddl_core::config::DEFAULT_API_URL {
        return Ok(bot);
    }
    let url = reqwest::Url::parse(&cfg.telegram_api_url)
        .map_err(|e| Error::Config(format!("invalid TELEGRAM_API_URL: {e}")))?;
    Ok(bot.set_api_url(url))
}

/// API answers are final; network, flood control and decoding failures are
/// worth another attempt.
fn classify(e: RequestError) -> ProviderError {
    let msg = e.to_string();
    match e {
        RequestError::Api(_) | RequestError::MigrateToChatId(_) => ProviderError::Rejected(msg),
        _ => ProviderError::Transient(msg),
    }
}

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
    retry: RetryPolicy,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            retry: RetryPolicy {
                max_attempts: 2,
                ..RetryPolicy::default()
            },
        }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        let msg = run_with_retry(&self.retry, ProviderError::is_transient, || {
            let bot = self.bot.clone();
            let text = html.to_string();
            async move {
                bot.send_message(Self::tg_chat(chat_id), text)
                    .parse_mode(ParseMode::Html)
                    .await
                    .map_err(classify)
            }
        })
        .await
        .map_err(|e| Error::External(format!("telegram error: {e}")))?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }
}

/// Telegram file storage: `getFile` plus the bot file download URL.
#[derive(Clone)]
pub struct TelegramFiles {
    bot: Bot,
    token: String,
    api_url: String,
}

impl TelegramFiles {
    pub fn new(bot: Bot, cfg: &Config) -> Self {
        Self {
            bot,
            token: cfg.bot_token.clone(),
            api_url: cfg.telegram_api_url.clone(),
        }
    }
}

#[async_trait]
impl FileProvider for TelegramFiles {
    async fn resolve_file(&self, file_ref: &str) -> std::result::Result<ResolvedFile, ProviderError> {
        let file = self
            .bot
            .get_file(file_ref.to_string())
            .await
            .map_err(classify)?;

        if file.path.is_empty() {
            return Err(ProviderError::Rejected(
                "telegram returned no file path".to_string(),
            ));
        }

        Ok(ResolvedFile {
            path: file.path.clone(),
            size: Some(file.meta.size as u64).filter(|s| *s > 0),
        })
    }

    fn download_url(&self, path: &str) -> String {
        format!(
            "{}/file/bot{}/{}",
            self.api_url,
            self.token,
            path.trim_start_matches('/')
        )
    }
}
