use std::time::Duration;

use clap::Parser;
use lib_common::config::Config;

/// Redis configuration client: connects to the coordinator, answers
/// pings/invalidations, and adopts reconfigured primaries.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Coordinator address to connect to.
    #[arg(long)]
    server: Option<String>,
    /// Coordinator port to connect to.
    #[arg(long)]
    port: Option<u16>,
    /// Failover set spec this client tracks, same format as the
    /// coordinator's.
    #[arg(long)]
    redis_servers: Option<String>,
    /// Path to the local primary-file mirror.
    #[arg(long)]
    redis_master_file: Option<String>,
    /// This client's id, as known to the coordinator's configured client
    /// ids list.
    #[arg(long)]
    id: String,
    /// Path to a TOML config file, merged below CLI flags.
    #[arg(long)]
    config_file: Option<String>,
    /// Directory for rotated log files.
    #[arg(long, default_value = "./logs")]
    log_dir: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = lib_common::logging::init(&args.log_dir, "client");

    let cli_config = Config {
        server: args.server,
        port: args.port,
        redis_servers: args.redis_servers,
        redis_master_file: args.redis_master_file,
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
        let id = args.id;
        tokio::spawn(async move {
            if let Err(e) = client::run(config, id, guard).await {
                tracing::error!(error = %e, "client exited with an error");
            }
        });
        match shutdown.shutdown_with_limit(Duration::from_secs(3)).await {
            Ok(elapsed) => tracing::info!("shutdown: gracefully after {:?}", elapsed),
            Err(e) => tracing::warn!("shutdown: forced after timeout: {e}"),
        }
    });

    Ok(())
}
