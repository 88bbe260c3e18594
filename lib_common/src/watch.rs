//! Change stream for the remote key/value coordination service (the
//! original's consul client, `original_source/go/consul/consul.go`).
//!
//! `WatchConfig` issues a blocking HTTP "wait for a new value" query and
//! feeds every change onto an mpsc channel, matching `watchSpace`'s
//! poll-and-diff loop. The blocking request itself follows the teacher's
//! `config_cloud.rs` convention of running a blocking `reqwest` call inside
//! `spawn_blocking` rather than pulling in the async reqwest client for a
//! single long-poll GET.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::warn;

use crate::error::WatchError;

/// A flat key/value environment as handed back by the remote store.
pub type Env = HashMap<String, String>;

/// Long-polls a key/value prefix and reports every value change.
pub struct ConfigWatcher {
    base_url: String,
    token: Option<String>,
    prefix: String,
    modify_index: u64,
}

impl ConfigWatcher {
    pub fn new(base_url: impl Into<String>, token: Option<String>, prefix: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        ConfigWatcher {
            base_url,
            token,
            prefix: prefix.into(),
            modify_index: 0,
        }
    }

    fn kv_url(&self) -> String {
        format!("{}v1/kv/{}?recurse&index={}", self.base_url, self.prefix, self.modify_index)
    }

    /// One blocking fetch-and-diff cycle. Returns `Some(env)` if the value
    /// actually changed since the previous poll.
    async fn poll_once(&mut self) -> Result<Option<Env>, WatchError> {
        let url = self.kv_url();
        let token = self.token.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<(u64, Env), WatchError> {
            let client = reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .map_err(|e| WatchError::Request(url.clone(), e))?;
            let mut req = client.get(&url);
            if let Some(token) = token {
                req = req.header("X-Consul-Token", token);
            }
            let resp = req.send().map_err(|e| WatchError::Request(url.clone(), e))?;
            if !resp.status().is_success() {
                return Err(WatchError::Status(url.clone(), resp.status()));
            }
            let index = resp
                .headers()
                .get("X-Consul-Index")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let entries: Vec<Entry> = resp.json().map_err(|e| WatchError::Request(url.clone(), e))?;
            let env = entries_to_env(&entries);
            Ok((index, env))
        })
        .await??;

        let (index, env) = result;
        if index != 0 && index == self.modify_index {
            return Ok(None);
        }
        self.modify_index = index;
        Ok(Some(env))
    }

    /// Spawns a background task polling forever and sends every observed
    /// change on the returned channel. The task exits when the receiver is
    /// dropped.
    pub fn watch(mut self) -> mpsc::Receiver<Env> {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            loop {
                match self.poll_once().await {
                    Ok(Some(env)) => {
                        if tx.send(env).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "key/value watch poll failed, retrying");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });
        rx
    }
}

#[derive(serde::Deserialize)]
struct Entry {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: Option<String>,
}

fn entries_to_env(entries: &[Entry]) -> Env {
    let mut env = HashMap::new();
    for entry in entries {
        let Some(value) = &entry.value else { continue };
        let Ok(decoded) = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, value)
        else {
            continue;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            continue;
        };
        let key = entry
            .key
            .trim_start_matches(|c: char| c != '/')
            .trim_start_matches('/')
            .replace('/', "_")
            .to_uppercase();
        if key.is_empty() {
            continue;
        }
        env.insert(key, decoded);
    }
    env
}

