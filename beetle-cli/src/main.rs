//! Single entry point for the redis primary-failover system: picks a
//! process role off argv[1] the way `original_source/go/beetle.go` and
//! `original_source/go/main.go` dispatch on a leading subcommand, and hands
//! the rest of the arguments to that role.

use std::time::Duration;

use clap::{Parser, Subcommand};
use lib_common::config::Config;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Runs the redis configuration server.
    Coordinator {
        #[arg(long)]
        server: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        redis_servers: Option<String>,
        #[arg(long)]
        client_ids: Option<String>,
        #[arg(long)]
        confidence_level: Option<u8>,
        #[arg(long)]
        config_file: Option<String>,
        #[arg(long)]
        watch_url: Option<String>,
        #[arg(long, default_value = "./logs")]
        log_dir: String,
    },
    /// Runs the redis configuration client.
    Client {
        #[arg(long)]
        server: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        redis_servers: Option<String>,
        #[arg(long)]
        redis_master_file: Option<String>,
        #[arg(long)]
        id: String,
        #[arg(long)]
        config_file: Option<String>,
        #[arg(long, default_value = "./logs")]
        log_dir: String,
    },
    /// Not implemented in this build: notification mailer.
    Mailer,
    /// Not implemented in this build: expired-key garbage collector.
    Gc,
    /// Not implemented in this build: bulk key deletion by pattern.
    DeleteKeys,
    /// Not implemented in this build: bulk key copy between redis servers.
    CopyKeys,
    /// Not implemented in this build: key expiry dump.
    DumpExpiries,
    /// Not implemented in this build: standalone client-side proxy.
    ClientProxy,
    /// Not implemented in this build: merged configuration dump.
    DumpConfig,
}

fn unimplemented(role: &str) -> ! {
    eprintln!("'{role}' is not implemented in this build");
    std::process::exit(1);
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.role {
        Role::Coordinator {
            server,
            port,
            redis_servers,
            client_ids,
            confidence_level,
            config_file,
            watch_url,
            log_dir,
        } => {
            let _log_guard = lib_common::logging::init(&log_dir, "coordinator");
            let cli_config = Config {
                server,
                port,
                redis_servers,
                client_ids,
                confidence_level,
                ..Default::default()
            };
            let file_config = match &config_file {
                Some(path) => Config::from_toml_file(path)?,
                None => Config::default(),
            };
            let config = cli_config.merge(&file_config).with_defaults();
            run_role(config, |config, shutdown| async move {
                coordinator::run(config, watch_url, shutdown).await
            })
        }
        Role::Client {
            server,
            port,
            redis_servers,
            redis_master_file,
            id,
            config_file,
            log_dir,
        } => {
            let _log_guard = lib_common::logging::init(&log_dir, "client");
            let cli_config = Config {
                server,
                port,
                redis_servers,
                redis_master_file,
                ..Default::default()
            };
            let file_config = match &config_file {
                Some(path) => Config::from_toml_file(path)?,
                None => Config::default(),
            };
            let config = cli_config.merge(&file_config).with_defaults();
            run_role(config, |config, shutdown| async move {
                client::run(config, id, shutdown).await
            })
        }
        Role::Mailer => unimplemented("mailer"),
        Role::Gc => unimplemented("gc"),
        Role::DeleteKeys => unimplemented("delete-keys"),
        Role::CopyKeys => unimplemented("copy-keys"),
        Role::DumpExpiries => unimplemented("dump-expiries"),
        Role::ClientProxy => unimplemented("client-proxy"),
        Role::DumpConfig => unimplemented("dump-config"),
    }
}

/// Validates `config`, then drives `body` to completion inside a fresh
/// runtime under the same graceful-shutdown pattern the coordinator and
/// client binaries use on their own.
fn run_role<F, Fut>(config: Config, body: F) -> anyhow::Result<()>
where
    F: FnOnce(Config, tokio_graceful::ShutdownGuard) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    if let Err(e) = config.validate() {
        eprintln!("invalid configuration: {e}");
        std::process::exit(1);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let shutdown = tokio_graceful::Shutdown::default();
        let guard = shutdown.guard();
        tokio::spawn(async move {
            if let Err(e) = body(config, guard).await {
                tracing::error!(error = %e, "exited with an error");
            }
        });
        match shutdown.shutdown_with_limit(Duration::from_secs(3)).await {
            Ok(elapsed) => tracing::info!("shutdown: gracefully after {:?}", elapsed),
            Err(e) => tracing::warn!("shutdown: forced after timeout: {e}"),
        }
    });

    Ok(())
}
