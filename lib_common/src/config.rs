//! Configuration loading and merging.
//!
//! Grounded on `original_source/go/config.go` for field names, defaults and
//! merge/precedence rules, and on `lib_common/src/configs/config_sys.rs` and
//! `config_cloud.rs` for the teacher's layered-sources idiom. Precedence,
//! highest first: CLI flags > config file > remote key/value store > the
//! built-in defaults below.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::primary_file::verify_primary_file_path;

/// One failover set parsed out of the `redis_servers` spec: either the
/// reserved `"system"` name (single-system shorthand) or an explicit name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverSetSpec {
    pub name: String,
    pub spec: String,
}

/// Externally configurable options. Field names mirror `go/config.go`'s
/// struct, including the GC/mail fields that this build carries inertly
/// (round-tripped for status/dump purposes) since the collaborators that
/// act on them are out of scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub redis_servers: Option<String>,
    #[serde(default)]
    pub client_ids: Option<String>,
    #[serde(default)]
    pub client_heartbeat: Option<u64>,
    #[serde(default)]
    pub client_timeout: Option<u64>,
    #[serde(default)]
    pub redis_master_retries: Option<u32>,
    #[serde(default)]
    pub redis_master_retry_interval: Option<u64>,
    #[serde(default)]
    pub redis_master_file: Option<String>,
    #[serde(default)]
    pub gc_threshold: Option<u64>,
    #[serde(default)]
    pub gc_databases: Option<String>,
    #[serde(default)]
    pub mail_to: Option<String>,
    #[serde(default)]
    pub dial_timeout: Option<u64>,
    #[serde(default)]
    pub confidence_level: Option<u8>,
}

impl Config {
    pub fn server_url(&self) -> String {
        format!(
            "{}:{}",
            self.server.as_deref().unwrap_or(""),
            self.port.unwrap_or(0)
        )
    }

    /// Replaces newlines in `client_ids` by commas, so consul values that
    /// arrive newline-separated still parse.
    pub fn sanitize(&mut self) {
        if let Some(ids) = &mut self.client_ids {
            if ids.contains('\n') {
                *ids = ids.replace('\n', ",");
            }
        }
    }

    /// Fills every unset field in `self` from `other`. `self` has
    /// precedence: a field already set in `self` is left untouched.
    pub fn merge(mut self, other: &Config) -> Config {
        macro_rules! fill {
            ($field:ident) => {
                if self.$field.is_none() {
                    self.$field = other.$field.clone();
                }
            };
        }
        fill!(server);
        fill!(port);
        fill!(redis_servers);
        fill!(client_ids);
        fill!(client_heartbeat);
        fill!(client_timeout);
        fill!(redis_master_retries);
        fill!(redis_master_retry_interval);
        fill!(redis_master_file);
        fill!(gc_threshold);
        fill!(gc_databases);
        fill!(mail_to);
        fill!(dial_timeout);
        fill!(confidence_level);
        self.sanitize();
        self
    }

    /// Fills every unset field with the built-in defaults. Called last,
    /// after all higher-precedence sources have been merged in.
    pub fn with_defaults(self) -> Config {
        let defaults = Config {
            server: Some("127.0.0.1".to_string()),
            port: Some(9650),
            redis_servers: None,
            client_ids: None,
            client_heartbeat: Some(5),
            client_timeout: Some(10),
            redis_master_retries: Some(3),
            redis_master_retry_interval: Some(10),
            redis_master_file: Some("/etc/beetle/redis-master".to_string()),
            gc_threshold: Some(3600),
            gc_databases: Some("4".to_string()),
            mail_to: Some("root@localhost".to_string()),
            dial_timeout: Some(5),
            confidence_level: Some(100),
        };
        self.merge(&defaults)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.redis_master_file {
            verify_primary_file_path(path)?;
        }
        if let Some(level) = self.confidence_level {
            if level > 100 {
                return Err(ConfigError::InvalidValue {
                    field: "confidence_level".to_string(),
                    value: level.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn client_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.client_timeout.unwrap_or(10))
    }

    pub fn client_heartbeat_duration(&self) -> Duration {
        Duration::from_secs(self.client_heartbeat.unwrap_or(5))
    }

    pub fn redis_master_retry_interval_duration(&self) -> Duration {
        Duration::from_secs(self.redis_master_retry_interval.unwrap_or(10))
    }

    /// Parses `redis_servers` into one spec per failover set. A line with a
    /// `/` splits into `name/spec`; a bare line is the reserved `"system"`
    /// shorthand.
    pub fn failover_sets(&self) -> Vec<FailoverSetSpec> {
        let Some(raw) = &self.redis_servers else {
            return Vec::new();
        };
        raw.split('\n')
            .filter(|line| !line.is_empty())
            .map(|line| match line.split_once('/') {
                Some((name, spec)) => FailoverSetSpec {
                    name: name.to_string(),
                    spec: spec.to_string(),
                },
                None => FailoverSetSpec {
                    name: "system".to_string(),
                    spec: line.to_string(),
                },
            })
            .collect()
    }

    /// Builds a `Config` from a flat string map, the shape a remote
    /// key/value watcher hands back. Mirrors `go/config.go`'s
    /// `configFromConsulEnv`.
    pub fn from_env_map(env: &std::collections::HashMap<String, String>) -> Config {
        let mut c = Config::default();
        if let Some(v) = env.get("REDIS_CONFIGURATION_SERVER") {
            c.server = Some(v.clone());
        }
        if let Some(v) = env.get("REDIS_CONFIGURATION_SERVER_PORT").and_then(|v| v.parse().ok()) {
            c.port = Some(v);
        }
        if let Some(v) = env.get("REDIS_SERVERS") {
            c.redis_servers = Some(v.clone());
        }
        if let Some(v) = env.get("REDIS_CONFIGURATION_CLIENT_IDS") {
            c.client_ids = Some(v.clone());
        }
        if let Some(v) = env
            .get("REDIS_CONFIGURATION_CLIENT_HEARTBEAT")
            .and_then(|v| v.parse().ok())
        {
            c.client_heartbeat = Some(v);
        }
        if let Some(v) = env
            .get("REDIS_CONFIGURATION_CLIENT_TIMEOUT")
            .and_then(|v| v.parse().ok())
        {
            c.client_timeout = Some(v);
        }
        if let Some(v) = env.get("REDIS_GC_THRESHOLD").and_then(|v| v.parse().ok()) {
            c.gc_threshold = Some(v);
        }
        if let Some(v) = env.get("REDIS_GC_DATABASES") {
            c.gc_databases = Some(v.clone());
        }
        if let Some(v) = env
            .get("REDIS_CONFIGURATION_MASTER_RETRIES")
            .and_then(|v| v.parse().ok())
        {
            c.redis_master_retries = Some(v);
        }
        if let Some(v) = env
            .get("REDIS_CONFIGURATION_MASTER_RETRY_INTERVAL")
            .and_then(|v| v.parse().ok())
        {
            c.redis_master_retry_interval = Some(v);
        }
        if let Some(v) = env.get("MAIL_TO") {
            c.mail_to = Some(v.clone());
        }
        if let Some(v) = env.get("BEETLE_REDIS_SERVER") {
            c.redis_master_file = Some(v.clone());
        }
        if let Some(v) = env.get("BEETLE_DIAL_TIMEOUT").and_then(|v| v.parse().ok()) {
            c.dial_timeout = Some(v);
        }
        if let Some(v) = env.get("REDIS_FAILOVER_CONFIDENCE_LEVEL").and_then(|v| v.parse().ok()) {
            c.confidence_level = Some(v);
        }
        c.sanitize();
        c
    }

    pub fn from_toml_file(path: &str) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::File(path.to_string(), e))?;
        toml::from_str(&raw).map_err(|e| ConfigError::Parse(path.to_string(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_precedence_of_self() {
        let cli = Config {
            port: Some(1234),
            ..Default::default()
        };
        let file = Config {
            port: Some(9650),
            server: Some("10.0.0.1".to_string()),
            ..Default::default()
        };
        let merged = cli.merge(&file);
        assert_eq!(merged.port, Some(1234));
        assert_eq!(merged.server, Some("10.0.0.1".to_string()));
    }

    #[test]
    fn defaults_fill_every_unset_field() {
        let cfg = Config::default().with_defaults();
        assert_eq!(cfg.server.as_deref(), Some("127.0.0.1"));
        assert_eq!(cfg.port, Some(9650));
        assert_eq!(cfg.confidence_level, Some(100));
        assert_eq!(cfg.redis_master_file.as_deref(), Some("/etc/beetle/redis-master"));
    }

    #[test]
    fn failover_sets_parses_named_and_shorthand_lines() {
        let cfg = Config {
            redis_servers: Some("a1:5,a2:5".to_string()),
            ..Default::default()
        };
        assert_eq!(
            cfg.failover_sets(),
            vec![FailoverSetSpec {
                name: "system".to_string(),
                spec: "a1:5,a2:5".to_string()
            }]
        );

        let cfg = Config {
            redis_servers: Some("primary/a1:5,a2:5\nsecondary/b1:3,b2:3".to_string()),
            ..Default::default()
        };
        let sets = cfg.failover_sets();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].name, "primary");
        assert_eq!(sets[1].name, "secondary");
    }

    #[test]
    fn rejects_primary_file_path_that_looks_like_an_endpoint() {
        let cfg = Config {
            redis_master_file: Some("10.0.0.1:6379".to_string()),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
