use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tgddl_core::{
    config::Config,
    ingest::{IngestConfig, Ingestor},
    store::FileStore,
    Error,
};
use tgddl_http::HttpState;
use tgddl_telegram::{router::AppState, TelegramFiles, TelegramMessenger};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tgddl_core::logging::init("tgddl")?;

    let cfg = Config::load()?;
    tracing::info!(
        listen = %cfg.listen_addr,
        mode = ?cfg.download_mode,
        db = %cfg.db_path.display(),
        "starting"
    );

    let store = Arc::new(FileStore::load(&cfg.db_path));

    let shutdown = CancellationToken::new();
    let flusher = store
        .clone()
        .spawn_flush_loop(cfg.flush_interval, shutdown.clone());

    let bot = tgddl_telegram::build_bot(&cfg)?;
    let files = Arc::new(TelegramFiles::new(bot.clone(), &cfg));
    let messenger = Arc::new(TelegramMessenger::new(bot.clone()));

    let ingestor = Ingestor::new(
        IngestConfig::from(&cfg),
        store.clone(),
        files.clone(),
        messenger.clone(),
    );
    let state = AppState::new(&cfg, ingestor, messenger);

    let listener = tokio::net::TcpListener::bind(cfg.listen_addr)
        .await
        .map_err(|e| Error::Config(format!("cannot bind {}: {e}", cfg.listen_addr)))?;
    let http_state = HttpState::new(&cfg, store.clone(), files)?;
    let server = tokio::spawn(tgddl_http::serve(listener, http_state, shutdown.clone()));
    tracing::info!(addr = %cfg.listen_addr, "http listening");

    let outcome = tokio::select! {
        res = tgddl_telegram::router::run_polling(bot, state) => {
            res.map_err(|e| Error::External(format!("telegram bot failed: {e}")))
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
            Ok(())
        }
    };

    shutdown.cancel();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "http server failed"),
        Err(e) => tracing::error!(error = %e, "http server task panicked"),
    }
    if let Err(e) = flusher.await {
        tracing::error!(error = %e, "flush task panicked");
    }

    outcome
}
