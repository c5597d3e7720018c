use std::{
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use crate::{errors::Error, retry::RetryPolicy, Result};

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";
pub const DEFAULT_MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// How `GET /{slug}` hands the file to the client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DownloadMode {
    /// 302 to the provider's file URL.
    #[default]
    Redirect,
    /// Proxy the bytes through this server.
    Stream,
}

impl FromStr for DownloadMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "redirect" => Ok(Self::Redirect),
            "stream" | "proxy" => Ok(Self::Stream),
            other => Err(Error::Config(format!(
                "DOWNLOAD_MODE must be `redirect` or `stream`, got `{other}`"
            ))),
        }
    }
}

/// Typed configuration, sourced from the environment (and `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub bot_token: String,
    pub telegram_api_url: String,

    // HTTP
    pub public_base_url: String,
    pub listen_addr: SocketAddr,
    pub download_mode: DownloadMode,

    // Store
    pub db_path: PathBuf,
    pub flush_interval: Duration,
    pub flush_on_write: bool,

    // Ingestion
    pub max_file_size: Option<u64>,
    pub provider_timeout: Duration,
    pub resolve_retry: RetryPolicy,
    pub media_group_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (the environment in
    /// production, a map in tests).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let str_of = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| get(k))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let parsed = |key: &str| -> Result<Option<u64>> {
            match str_of(&[key]) {
                None => Ok(None),
                Some(s) => s
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| Error::Config(format!("{key} must be an integer, got `{s}`"))),
            }
        };

        // Required env vars
        let bot_token = str_of(&["BOT_TOKEN", "TELEGRAM_BOT_TOKEN"]).ok_or_else(|| {
            Error::Config("BOT_TOKEN environment variable is required".to_string())
        })?;
        let public_base_url = str_of(&["PUBLIC_BASE_URL", "RENDER_URL"])
            .map(|s| s.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                Error::Config("PUBLIC_BASE_URL environment variable is required".to_string())
            })?;
        if !(public_base_url.starts_with("http://") || public_base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "PUBLIC_BASE_URL must start with http:// or https://, got `{public_base_url}`"
            )));
        }

        let telegram_api_url = str_of(&["TELEGRAM_API_URL"])
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        // Listener
        let host = str_of(&["HOST"]).unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parsed("PORT")?.unwrap_or(3000);
        let port = u16::try_from(port)
            .map_err(|_| Error::Config(format!("PORT out of range: {port}")))?;
        let listen_addr = format!("{host}:{port}")
            .parse::<SocketAddr>()
            .map_err(|e| Error::Config(format!("invalid HOST/PORT `{host}:{port}`: {e}")))?;

        let download_mode = match str_of(&["DOWNLOAD_MODE"]) {
            Some(s) => s.parse()?,
            None => DownloadMode::default(),
        };

        // Store
        let db_path = PathBuf::from(str_of(&["DB_PATH"]).unwrap_or_else(|| "db.json".to_string()));
        let flush_interval = Duration::from_secs(parsed("FLUSH_INTERVAL_SECS")?.unwrap_or(30).max(1));
        let flush_on_write = match str_of(&["FLUSH_ON_WRITE"]) {
            Some(s) => parse_bool(&s),
            None => true,
        };

        // Ingestion
        let max_file_size = match parsed("MAX_FILE_SIZE")?.unwrap_or(DEFAULT_MAX_FILE_SIZE) {
            0 => None,
            n => Some(n),
        };
        let provider_timeout =
            Duration::from_millis(parsed("PROVIDER_TIMEOUT_MS")?.unwrap_or(15_000).max(1));
        let resolve_retry = RetryPolicy {
            max_attempts: parsed("RESOLVE_MAX_ATTEMPTS")?.unwrap_or(3).clamp(1, 10) as u32,
            backoff: Duration::from_millis(parsed("RESOLVE_BACKOFF_MS")?.unwrap_or(1000)),
        };
        let media_group_timeout =
            Duration::from_millis(parsed("MEDIA_GROUP_TIMEOUT_MS")?.unwrap_or(1000));

        Ok(Self {
            bot_token,
            telegram_api_url,
            public_base_url,
            listen_addr,
            download_mode,
            db_path,
            flush_interval,
            flush_on_write,
            max_file_size,
            provider_timeout,
            resolve_retry,
            media_group_timeout,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
