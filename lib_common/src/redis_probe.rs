//! Reachability and replication-role probing for a single redis instance.
//!
//! Grounded on `original_source/go/redis_shim.go`: a thin wrapper around a
//! connection that answers "what role is this instance playing right now,
//! and can we even talk to it".

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProbeError;

/// A `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Endpoint {
            host: host.into(),
            port,
        }
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ProbeError::InvalidEndpoint(s.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| ProbeError::InvalidEndpoint(s.to_string()))?;
        Ok(Endpoint::new(host, port))
    }
}

/// Replication role of a probed instance. `Unknown` means the instance could
/// not be reached at all, mirroring the Go shim returning an empty `Info()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Master,
    Slave,
    Unknown,
}

/// Result of probing one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisProbe {
    pub endpoint: Endpoint,
    pub role: Role,
    pub master_host: Option<String>,
    pub master_port: Option<u16>,
}

impl RedisProbe {
    pub fn is_master(&self) -> bool {
        self.role == Role::Master
    }

    pub fn is_slave(&self) -> bool {
        self.role == Role::Slave
    }

    pub fn is_reachable(&self) -> bool {
        self.role != Role::Unknown
    }
}

/// Runs `INFO replication` against `endpoint` and classifies the role.
/// Connection failures are folded into `Role::Unknown` rather than bubbled
/// up, matching the original shim: an unreachable instance is just an
/// instance nobody can vouch for the role of.
pub async fn probe(endpoint: &Endpoint) -> RedisProbe {
    match probe_fallible(endpoint).await {
        Ok(p) => p,
        Err(_) => RedisProbe {
            endpoint: endpoint.clone(),
            role: Role::Unknown,
            master_host: None,
            master_port: None,
        },
    }
}

async fn probe_fallible(endpoint: &Endpoint) -> Result<RedisProbe, ProbeError> {
    let client = redis::Client::open(endpoint.redis_url())?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    let info: String = redis::cmd("INFO")
        .arg("replication")
        .query_async(&mut conn)
        .await?;
    parse_replication_info(endpoint, &info)
}

fn parse_replication_info(endpoint: &Endpoint, info: &str) -> Result<RedisProbe, ProbeError> {
    let mut role = None;
    let mut master_host = None;
    let mut master_port = None;
    for line in info.lines() {
        let line = line.trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key {
            "role" => {
                role = Some(match value {
                    "master" => Role::Master,
                    "slave" => Role::Slave,
                    _ => Role::Unknown,
                });
            }
            "master_host" => master_host = Some(value.to_string()),
            "master_port" => master_port = value.parse().ok(),
            _ => {}
        }
    }
    Ok(RedisProbe {
        endpoint: endpoint.clone(),
        role: role.ok_or(ProbeError::MissingRole)?,
        master_host,
        master_port,
    })
}

/// PING the endpoint; true iff it answers at all (role notwithstanding).
pub async fn is_available(endpoint: &Endpoint) -> bool {
    async fn ping(endpoint: &Endpoint) -> Result<(), ProbeError> {
        let client = redis::Client::open(endpoint.redis_url())?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
    ping(endpoint).await.is_ok()
}

/// Promotes `endpoint` to master via `SLAVEOF NO ONE`.
pub async fn make_master(endpoint: &Endpoint) -> Result<(), ProbeError> {
    let client = redis::Client::open(endpoint.redis_url())?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    let _: String = redis::cmd("SLAVEOF")
        .arg("NO")
        .arg("ONE")
        .query_async(&mut conn)
        .await?;
    Ok(())
}

/// Makes `endpoint` a replica of `master`, via `SLAVEOF host port`.
pub async fn make_slave_of(endpoint: &Endpoint, master: &Endpoint) -> Result<(), ProbeError> {
    let client = redis::Client::open(endpoint.redis_url())?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    let _: String = redis::cmd("SLAVEOF")
        .arg(&master.host)
        .arg(master.port)
        .query_async(&mut conn)
        .await?;
    Ok(())
}

/// Reads `beetle:lastgc` from `endpoint`, feeding the admin status page's
/// last-GC-run display. Connection failures and a missing key both fold to
/// `None` — there is nothing actionable to do with either here.
pub async fn fetch_last_gc_info(endpoint: &Endpoint) -> Option<String> {
    async fn get(endpoint: &Endpoint) -> Result<Option<String>, ProbeError> {
        let client = redis::Client::open(endpoint.redis_url())?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let value: Option<String> = redis::cmd("GET")
            .arg("beetle:lastgc")
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }
    get(endpoint).await.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_endpoint() {
        let e: Endpoint = "redis1.local:6380".parse().unwrap();
        assert_eq!(e.host, "redis1.local");
        assert_eq!(e.port, 6380);
    }

    #[test]
    fn rejects_endpoint_without_port() {
        assert!("redis1.local".parse::<Endpoint>().is_err());
    }

    #[test]
    fn parses_master_replication_info() {
        let info = "role:master\r\nconnected_slaves:1\r\n";
        let probe = parse_replication_info(&Endpoint::new("h", 1), info).unwrap();
        assert!(probe.is_master());
    }

    #[test]
    fn parses_slave_replication_info_with_master_address() {
        let info = "role:slave\r\nmaster_host:10.0.0.1\r\nmaster_port:6379\r\n";
        let probe = parse_replication_info(&Endpoint::new("h", 1), info).unwrap();
        assert!(probe.is_slave());
        assert_eq!(probe.master_host.as_deref(), Some("10.0.0.1"));
        assert_eq!(probe.master_port, Some(6379));
    }
}
