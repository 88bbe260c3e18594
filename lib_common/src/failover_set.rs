//! A point-in-time view of a failover set's redis instances, refreshed by
//! re-probing every configured endpoint.
//!
//! Grounded on `original_source/go/redis_server_info.go`.

use futures_util::future::join_all;

use crate::redis_probe::{probe, Endpoint, RedisProbe, Role};

/// Snapshot of reachability/role for every endpoint configured for one
/// failover set (`system` in the single-system shorthand, or a named set).
#[derive(Debug, Clone)]
pub struct FailoverSetView {
    pub name: String,
    pub instances: Vec<Endpoint>,
    pub(crate) probes: Vec<RedisProbe>,
}

impl FailoverSetView {
    pub fn new(name: impl Into<String>, instances: Vec<Endpoint>) -> Self {
        FailoverSetView {
            name: name.into(),
            instances,
            probes: Vec::new(),
        }
    }

    /// Re-probes every configured instance.
    pub async fn refresh(&mut self) {
        let probed = join_all(self.instances.iter().map(probe)).await;
        self.probes = probed;
    }

    pub fn masters(&self) -> Vec<&RedisProbe> {
        self.probes.iter().filter(|p| p.is_master()).collect()
    }

    pub fn slaves(&self) -> Vec<&RedisProbe> {
        self.probes.iter().filter(|p| p.is_slave()).collect()
    }

    pub fn unknowns(&self) -> Vec<&RedisProbe> {
        self.probes
            .iter()
            .filter(|p| p.role == Role::Unknown)
            .collect()
    }

    pub fn find(&self, endpoint: &Endpoint) -> Option<&RedisProbe> {
        self.probes.iter().find(|p| &p.endpoint == endpoint)
    }

    /// Endpoints that believe `master` is their master.
    pub fn slaves_of(&self, master: &Endpoint) -> Vec<&RedisProbe> {
        self.probes
            .iter()
            .filter(|p| {
                p.is_slave()
                    && p.master_host.as_deref() == Some(master.host.as_str())
                    && p.master_port == Some(master.port)
            })
            .collect()
    }

    /// True when exactly one instance is a reachable master and every other
    /// configured instance is a reachable slave — the condition under which
    /// a master can be auto-detected rather than taken from the primary
    /// file.
    pub fn master_and_slaves_reachable(&self) -> bool {
        self.masters().len() == 1 && self.slaves().len() == self.instances.len() - 1
    }

    /// The unique master, if and only if the set is fully healthy.
    pub fn autodetect_master(&self) -> Option<Endpoint> {
        if !self.master_and_slaves_reachable() {
            return None;
        }
        self.masters().first().map(|p| p.endpoint.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view_with_probes(instances: Vec<Endpoint>, probes: Vec<RedisProbe>) -> FailoverSetView {
        FailoverSetView {
            name: "system".to_string(),
            instances,
            probes,
        }
    }

    #[test]
    fn healthy_set_autodetects_unique_master() {
        let m = Endpoint::new("a", 1);
        let s = Endpoint::new("b", 1);
        let probes = vec![
            RedisProbe {
                endpoint: m.clone(),
                role: Role::Master,
                master_host: None,
                master_port: None,
            },
            RedisProbe {
                endpoint: s.clone(),
                role: Role::Slave,
                master_host: Some("a".to_string()),
                master_port: Some(1),
            },
        ];
        let view = view_with_probes(vec![m.clone(), s], probes);
        assert!(view.master_and_slaves_reachable());
        assert_eq!(view.autodetect_master(), Some(m));
    }

    #[test]
    fn split_brain_does_not_autodetect() {
        let a = Endpoint::new("a", 1);
        let b = Endpoint::new("b", 1);
        let probes = vec![
            RedisProbe {
                endpoint: a.clone(),
                role: Role::Master,
                master_host: None,
                master_port: None,
            },
            RedisProbe {
                endpoint: b.clone(),
                role: Role::Master,
                master_host: None,
                master_port: None,
            },
        ];
        let view = view_with_probes(vec![a, b], probes);
        assert!(!view.master_and_slaves_reachable());
        assert_eq!(view.autodetect_master(), None);
    }

    #[test]
    fn unreachable_instance_breaks_health() {
        let a = Endpoint::new("a", 1);
        let b = Endpoint::new("b", 1);
        let probes = vec![
            RedisProbe {
                endpoint: a.clone(),
                role: Role::Master,
                master_host: None,
                master_port: None,
            },
            RedisProbe {
                endpoint: b.clone(),
                role: Role::Unknown,
                master_host: None,
                master_port: None,
            },
        ];
        let view = view_with_probes(vec![a, b], probes);
        assert!(!view.master_and_slaves_reachable());
    }
}
