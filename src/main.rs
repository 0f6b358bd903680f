mod api;
mod domain;
mod service;
mod settings;
mod storage;
mod telegram;
mod timezone;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::service::TaskService;
use crate::settings::AppSettings;
use crate::storage::Storage;
use crate::storage::memory::MemoryStore;
use crate::storage::sqlite::SqliteStore;
use crate::telegram::Bot;
use crate::telegram::client::Client;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    pretty_env_logger::init();

    let settings = AppSettings::load().context("loading configuration")?;

    let store: Arc<dyn Storage> = match settings.storage.backend.as_str() {
        "memory" => Arc::new(MemoryStore::new()),
        "sqlite" => Arc::new(
            SqliteStore::connect(&settings.storage.database_url)
                .await
                .context("opening sqlite store")?,
        ),
        other => anyhow::bail!("unknown storage backend {other:?}"),
    };
    log::info!("storage backend: {}", settings.storage.backend);

    let cancel = CancellationToken::new();

    let bot_handle = if settings.telegram.token.is_empty() {
        log::info!("telegram token not set, bot disabled");
        None
    } else {
        let bot = Bot::new(
            Client::new(settings.telegram.token.clone()).context("building telegram client")?,
            TaskService::new(store.clone()),
            store.clone(),
            Duration::from_secs(settings.telegram.poll_timeout_secs),
        );
        let bot_cancel = cancel.clone();
        Some(tokio::spawn(async move { bot.run(bot_cancel).await }))
    };

    let listener = tokio::net::TcpListener::bind(&settings.http.addr)
        .await
        .with_context(|| format!("binding {}", settings.http.addr))?;
    log::info!("http listening on {}", settings.http.addr);

    let router = api::router(store);
    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
    });

    shutdown_signal().await;
    log::info!("shutting down");
    cancel.cancel();

    let grace = Duration::from_secs(settings.http.shutdown_timeout_secs);
    match tokio::time::timeout(grace, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => log::error!("server error: {err}"),
        Ok(Err(err)) => log::error!("server task panicked: {err}"),
        Err(_) => log::warn!("shutdown grace period elapsed, exiting anyway"),
    }
    if let Some(handle) = bot_handle {
        let _ = handle.await;
    }
    Ok(())
}

async fn shutdown_signal() {
    let interrupt = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut terminate =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(err) => {
                    log::error!("installing SIGTERM handler: {err}");
                    let _ = interrupt.await;
                    return;
                }
            };
        tokio::select! {
            _ = interrupt => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = interrupt.await;
    }
}
