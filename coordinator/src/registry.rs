//! Bookkeeping for connected clients: who's configured, who's actually
//! connected, who we've heard from and when, and the bounded memory of
//! client ids we've seen but don't recognize.
//!
//! Grounded on `original_source/go/server_state.go`'s `AddUnknownClientId`,
//! `ForgetOldUnknownClientIds`, `ForgetOldLastSeenEntries` and
//! `ClientSeen`, and on the teacher's `lib_common/src/core/dispatcher.rs`
//! fan-out-by-per-client-channel idiom.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant};

use lib_common::message::WireMessage;
use tokio::sync::mpsc;
use tracing::warn;

/// Default cap on how many distinct unrecognized client ids we remember at
/// once, matching the original's FIFO bound.
pub const UNKNOWN_CLIENT_CAPACITY: usize = 1000;

pub struct ClientRegistry {
    configured_client_ids: BTreeSet<String>,
    connections: HashMap<String, mpsc::UnboundedSender<WireMessage>>,
    last_seen: HashMap<String, Instant>,
    unknown_ids: VecDeque<(String, Instant)>,
    unknown_capacity: usize,
    notification_channels: Vec<mpsc::UnboundedSender<String>>,
}

impl ClientRegistry {
    pub fn new(configured_client_ids: BTreeSet<String>) -> Self {
        ClientRegistry {
            configured_client_ids,
            connections: HashMap::new(),
            last_seen: HashMap::new(),
            unknown_ids: VecDeque::new(),
            unknown_capacity: UNKNOWN_CLIENT_CAPACITY,
            notification_channels: Vec::new(),
        }
    }

    pub fn configured_client_ids(&self) -> &BTreeSet<String> {
        &self.configured_client_ids
    }

    /// Replaces the set of client ids a reloaded configuration expects to
    /// hear from. Already-connected/known ids are left alone; only the
    /// "who counts as configured" bookkeeping changes.
    pub fn set_configured_client_ids(&mut self, configured_client_ids: BTreeSet<String>) {
        self.configured_client_ids = configured_client_ids;
    }

    /// Registers a new `/notifications` subscriber.
    pub fn add_notification_channel(&mut self, sender: mpsc::UnboundedSender<String>) {
        self.notification_channels.push(sender);
    }

    /// Sends `text` to every connected notification subscriber, pruning any
    /// that have disconnected.
    pub fn send_notification(&mut self, text: &str) {
        self.notification_channels
            .retain(|sender| sender.send(text.to_string()).is_ok());
    }

    pub fn notification_channel_count(&self) -> usize {
        self.notification_channels.len()
    }

    pub fn register(&mut self, id: String, sender: mpsc::UnboundedSender<WireMessage>) {
        self.connections.insert(id, sender);
    }

    pub fn unregister(&mut self, id: &str) {
        self.connections.remove(id);
    }

    /// Enqueues `message` on every connected client's writer queue.
    /// Disconnected clients (send failed) are pruned.
    pub fn broadcast(&mut self, message: &WireMessage) {
        self.connections.retain(|id, sender| {
            if sender.send(message.clone()).is_err() {
                warn!(client_id = %id, "dropping disconnected client from registry");
                false
            } else {
                true
            }
        });
    }

    /// Records that `id` is alive right now. Unrecognized ids are also
    /// remembered in the bounded FIFO.
    pub fn client_seen(&mut self, id: &str) {
        self.last_seen.insert(id.to_string(), Instant::now());
        if !self.configured_client_ids.contains(id) && !self.unknown_ids.iter().any(|(k, _)| k == id) {
            self.add_unknown_client_id(id);
        }
    }

    fn add_unknown_client_id(&mut self, id: &str) {
        if self.unknown_ids.len() >= self.unknown_capacity {
            if let Some((evicted, _)) = self.unknown_ids.pop_front() {
                self.last_seen.remove(&evicted);
            }
        }
        self.unknown_ids.push_back((id.to_string(), Instant::now()));
    }

    pub fn forget_old_unknown_client_ids(&mut self, max_age: Duration) {
        let now = Instant::now();
        while let Some((id, seen_at)) = self.unknown_ids.front() {
            if now.duration_since(*seen_at) <= max_age {
                break;
            }
            self.last_seen.remove(id);
            self.unknown_ids.pop_front();
        }
    }

    pub fn forget_old_last_seen_entries(&mut self, max_age: Duration) {
        let now = Instant::now();
        self.last_seen
            .retain(|_, seen_at| now.duration_since(*seen_at) <= max_age);
    }

    /// Configured clients that have gone quiet for longer than `timeout`,
    /// oldest first.
    pub fn unresponsive_clients(&self, timeout: Duration) -> Vec<(String, Duration)> {
        let now = Instant::now();
        let mut v: Vec<_> = self
            .configured_client_ids
            .iter()
            .filter_map(|id| {
                let seen_at = self.last_seen.get(id)?;
                let age = now.duration_since(*seen_at);
                (age > timeout).then_some((id.clone(), age))
            })
            .collect();
        v.sort_by_key(|(_, age)| std::cmp::Reverse(*age));
        v
    }

    /// Configured clients we have never heard from at all.
    pub fn unseen_client_ids(&self) -> Vec<String> {
        self.configured_client_ids
            .iter()
            .filter(|id| !self.last_seen.contains_key(*id))
            .cloned()
            .collect()
    }

    pub fn unknown_client_ids(&self) -> Vec<String> {
        self.unknown_ids.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ClientRegistry {
        ClientRegistry::new(["c1".to_string(), "c2".to_string()].into_iter().collect())
    }

    #[test]
    fn unknown_client_fifo_evicts_oldest_past_capacity() {
        let mut r = registry();
        r.unknown_capacity = 2;
        r.client_seen("u1");
        r.client_seen("u2");
        r.client_seen("u3");
        assert_eq!(r.unknown_client_ids(), vec!["u2".to_string(), "u3".to_string()]);
        assert!(!r.last_seen.contains_key("u1"));
    }

    #[test]
    fn unseen_excludes_clients_we_have_heard_from() {
        let mut r = registry();
        r.client_seen("c1");
        assert_eq!(r.unseen_client_ids(), vec!["c2".to_string()]);
    }

    #[test]
    fn unresponsive_clients_are_sorted_oldest_first() {
        let mut r = registry();
        r.client_seen("c1");
        std::thread::sleep(Duration::from_millis(5));
        r.client_seen("c2");
        let unresponsive = r.unresponsive_clients(Duration::from_millis(0));
        assert_eq!(unresponsive[0].0, "c1");
    }
}
