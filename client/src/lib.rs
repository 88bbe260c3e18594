pub mod redis_system;
pub mod session;

use std::time::Duration;

use lib_common::config::Config;
use redis_system::RedisSystem;
use session::ClientSession;

pub async fn run(
    config: Config,
    client_id: String,
    shutdown: tokio_graceful::ShutdownGuard,
) -> anyhow::Result<()> {
    config.validate()?;

    let coordinator_url = format!("ws://{}/configuration", config.server_url());
    let heartbeat = Duration::from_secs(config.client_heartbeat.unwrap_or(5));
    let mut session = ClientSession::new(client_id, coordinator_url, heartbeat);

    let primary_file_path = config
        .redis_master_file
        .clone()
        .unwrap_or_else(|| "/etc/beetle/redis-master".to_string());
    for set in config.failover_sets() {
        session.register_system(RedisSystem::new(set.name, primary_file_path.clone()));
    }

    session.run(shutdown).await;
    Ok(())
}
