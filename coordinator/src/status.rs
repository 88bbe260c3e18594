//! Admin status payload, served at `GET /.json`.
//!
//! Grounded on `original_source/go/server_state.go`'s `ServerStatus` and
//! `FailoverStatus` — a dropped-but-load-bearing detail from the original
//! that spec.md names the endpoint for without specifying the body.

use serde::Serialize;

use crate::dispatcher::Dispatcher;

#[derive(Debug, Serialize)]
pub struct FailoverStatus {
    pub system_name: String,
    pub configured_servers: Vec<String>,
    pub current_primary: Option<String>,
    pub primary_available: bool,
    pub available_replicas: Vec<String>,
    pub switch_in_progress: bool,
    pub last_gc_info: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ServerStatus {
    pub beetle_version: &'static str,
    pub configured_client_ids: Vec<String>,
    pub unknown_client_ids: Vec<String>,
    pub unresponsive_clients: Vec<String>,
    pub unseen_client_ids: Vec<String>,
    pub failover_status: Vec<FailoverStatus>,
    pub notification_channels: usize,
}

impl Dispatcher {
    pub fn status(&self) -> ServerStatus {
        let timeout = self.config.client_timeout_duration();
        let unresponsive = self
            .registry
            .unresponsive_clients(timeout)
            .into_iter()
            .map(|(id, age)| format!("{id}: last seen {} seconds ago", age.as_secs()))
            .collect();

        let failover_status = self
            .states
            .values()
            .map(|state| FailoverStatus {
                system_name: state.system_name.clone(),
                configured_servers: state.servers.iter().map(|e| e.to_string()).collect(),
                current_primary: state.current_master.as_ref().map(|e| e.to_string()),
                primary_available: self
                    .last_views
                    .get(&state.system_name)
                    .map(|v| state.master_is_available(v))
                    .unwrap_or(false),
                available_replicas: self
                    .last_views
                    .get(&state.system_name)
                    .map(|v| state.available_slaves(v).iter().map(|e| e.to_string()).collect())
                    .unwrap_or_default(),
                switch_in_progress: state.switch_in_progress(),
                last_gc_info: state.last_gc_info.clone(),
            })
            .collect();

        ServerStatus {
            beetle_version: env!("CARGO_PKG_VERSION"),
            configured_client_ids: self.registry.configured_client_ids().iter().cloned().collect(),
            unknown_client_ids: self.registry.unknown_client_ids(),
            unresponsive_clients: unresponsive,
            unseen_client_ids: self.registry.unseen_client_ids(),
            failover_status,
            notification_channels: self.registry.notification_channel_count(),
        }
    }
}
