use std::time::Duration;

use clap::Parser;
use lib_common::config::Config;

/// Redis configuration server: watches failover sets and coordinates
/// clients through a primary switch.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address the coordinator listens on.
    #[arg(long)]
    server: Option<String>,
    /// Port the coordinator listens on.
    #[arg(long)]
    port: Option<u16>,
    /// Failover set spec, e.g. "a1:6379,a2:6379" or
    /// "primary/a1:6379,a2:6379\nsecondary/b1:6379,b2:6379".
    #[arg(long)]
    redis_servers: Option<String>,
    /// Comma-separated configured client ids.
    #[arg(long)]
    client_ids: Option<String>,
    /// Confidence level percentage (0-100).
    #[arg(long)]
    confidence_level: Option<u8>,
    /// Path to a TOML config file, merged below CLI flags.
    #[arg(long)]
    config_file: Option<String>,
    /// Base URL of a remote key/value store to watch for config changes.
    #[arg(long)]
    watch_url: Option<String>,
    /// Directory for rotated log files.
    #[arg(long, default_value = "./logs")]
    log_dir: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = lib_common::logging::init(&args.log_dir, "coordinator");

    let cli_config = Config {
        server: args.server,
        port: args.port,
        redis_servers: args.redis_servers,
        client_ids: args.client_ids,
        confidence_level: args.confidence_level,
        ..Default::default()
    };

    let file_config = match &args.config_file {
        Some(path) => Config::from_toml_file(path)?,
        None => Config::default(),
    };

    let config = cli_config.merge(&file_config).with_defaults();
    if let Err(e) = config.validate() {
        eprintln!("invalid configuration: {e}");
        std::process::exit(1);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let shutdown = tokio_graceful::Shutdown::default();
        let guard = shutdown.guard();
        let watch_url = args.watch_url;
        tokio::spawn(async move {
            if let Err(e) = coordinator::run(config, watch_url, guard).await {
                tracing::error!(error = %e, "coordinator exited with an error");
            }
        });
        match shutdown.shutdown_with_limit(Duration::from_secs(3)).await {
            Ok(elapsed) => tracing::info!("shutdown: gracefully after {:?}", elapsed),
            Err(e) => tracing::warn!("shutdown: forced after timeout: {e}"),
        }
    });

    Ok(())
}
