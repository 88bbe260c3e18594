pub mod dispatcher;
pub mod registry;
pub mod status;
pub mod transport;

use std::net::SocketAddr;

use lib_common::config::Config;
use tokio::sync::mpsc;
use tracing::info;

/// Runs the coordinator until `shutdown` fires. `watch_url` is the base URL
/// of the remote key/value store to long-poll for configuration changes;
/// `None` disables that source and the coordinator runs on CLI/file/default
/// configuration only.
pub async fn run(
    config: Config,
    watch_url: Option<String>,
    shutdown: tokio_graceful::ShutdownGuard,
) -> anyhow::Result<()> {
    config.validate()?;

    let (config_tx, config_rx) = mpsc::channel(16);
    if let Some(base_url) = watch_url {
        let watcher = lib_common::watch::ConfigWatcher::new(base_url, None, "apps/beetle/config/");
        let mut changes = watcher.watch();
        let config_tx = config_tx.clone();
        tokio::spawn(async move {
            while let Some(env) = changes.recv().await {
                let cfg = Config::from_env_map(&env);
                if config_tx.send(cfg).await.is_err() {
                    break;
                }
            }
        });
    }

    let bind_addr: SocketAddr = format!(
        "{}:{}",
        config.server.clone().unwrap_or_else(|| "127.0.0.1".to_string()),
        config.port.unwrap_or(9650)
    )
    .parse()?;

    let dispatcher = dispatcher::Dispatcher::new(config);
    let handle = dispatcher.spawn(shutdown.clone(), config_rx);

    let app = transport::router(handle);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "coordinator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await?;

    Ok(())
}
