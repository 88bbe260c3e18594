//! Per-failover-set state machine.
//!
//! Grounded on `original_source/go/failover_state.go`. One `FailoverState`
//! tracks one failover set end to end: `Watching` while the primary answers
//! pings, `Pinging` while collecting pongs from clients after the primary
//! goes missing, `Invalidating` while collecting invalidation acks, and then
//! a switch to a new primary before returning to `Watching`.
//!
//! `FailoverState` itself performs no I/O; it is driven by `tick`/`on_*`
//! calls from the coordinator's dispatcher and returns the side effects the
//! caller must carry out as a list of [`Action`]s. That keeps the state
//! machine deterministic and trivially testable.

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime};

use crate::confidence::quorum_reached;
use crate::failover_set::FailoverSetView;
use crate::redis_probe::{Endpoint, Role};
use crate::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Normal operation: periodically check the primary is reachable.
    Watching,
    /// Primary went missing; waiting for clients to pong with the round's
    /// token so we know who still needs to be invalidated.
    Pinging,
    /// Waiting for clients to acknowledge they dropped their primary
    /// handle before a new primary is announced.
    Invalidating,
}

/// Side effects the coordinator must carry out after a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    BroadcastToClients(crate::message::WireMessage),
    SwitchMaster {
        system_name: String,
        from: Option<Endpoint>,
        to: Endpoint,
    },
    /// Demote every other configured instance to a replica of `master`,
    /// issued on every healthy watching tick (not just right after a
    /// switch), mirroring `ConfigureSlaves` being called from
    /// `MasterAvailable`.
    ConfigureReplicas {
        master: Endpoint,
        replicas: Vec<Endpoint>,
    },
    /// Re-read `beetle:lastgc` from the current primary.
    RefreshGcInfo(Endpoint),
    PersistPrimaryFile,
    Notify(String),
}

/// State for one failover set.
#[derive(Debug, Clone)]
pub struct FailoverState {
    pub system_name: String,
    pub servers: Vec<Endpoint>,
    pub current_master: Option<Endpoint>,
    pub phase: Phase,
    pub token: Token,
    pub confidence_level: u8,
    pub configured_client_ids: BTreeSet<String>,
    pong_ids: BTreeSet<String>,
    invalidated_ids: BTreeSet<String>,
    phase_started_at: SystemTime,
    pub retries_done: u32,
    pub max_retries: u32,
    pub retry_interval: Duration,
    pub last_gc_info: Option<String>,
}

impl FailoverState {
    pub fn new(
        system_name: impl Into<String>,
        servers: Vec<Endpoint>,
        confidence_level: u8,
        configured_client_ids: BTreeSet<String>,
        max_retries: u32,
        retry_interval: Duration,
    ) -> Self {
        FailoverState {
            system_name: system_name.into(),
            servers,
            current_master: None,
            phase: Phase::Watching,
            token: Token::zero(),
            confidence_level,
            configured_client_ids,
            pong_ids: BTreeSet::new(),
            invalidated_ids: BTreeSet::new(),
            phase_started_at: SystemTime::now(),
            retries_done: 0,
            max_retries,
            retry_interval,
            last_gc_info: None,
        }
    }

    pub fn update_gc_info(&mut self, info: Option<String>) {
        self.last_gc_info = info;
    }

    pub fn switch_in_progress(&self) -> bool {
        self.phase != Phase::Watching
    }

    pub fn master_is_available(&self, view: &FailoverSetView) -> bool {
        match &self.current_master {
            Some(master) => view.find(master).is_some_and(|p| p.is_master()),
            None => false,
        }
    }

    pub fn available_slaves(&self, view: &FailoverSetView) -> Vec<Endpoint> {
        view.slaves().into_iter().map(|p| p.endpoint.clone()).collect()
    }

    /// Picks the master to start with when no primary file entry exists:
    /// whatever the view auto-detects, or nothing if the set isn't healthy.
    pub fn determine_initial_master(&self, view: &FailoverSetView) -> Option<Endpoint> {
        view.autodetect_master()
    }

    /// Called once at startup (or whenever the primary file is silent on
    /// this system) to seed `current_master`.
    pub fn initialize(&mut self, view: &FailoverSetView) {
        if self.current_master.is_none() {
            self.current_master = self.determine_initial_master(view);
        }
    }

    /// Advances the watcher by one tick. Returns the actions the caller
    /// must perform. This is the main entry point driven by the
    /// dispatcher's periodic timer.
    pub fn tick(&mut self, view: &FailoverSetView) -> Vec<Action> {
        match self.phase {
            Phase::Watching => self.tick_watching(view),
            Phase::Pinging | Phase::Invalidating => self.tick_voting(view),
        }
    }

    fn tick_watching(&mut self, view: &FailoverSetView) -> Vec<Action> {
        if self.master_is_available(view) {
            self.retries_done = 0;
            return self.master_available_actions();
        }
        self.retries_done += 1;
        if self.retries_done < self.max_retries {
            return Vec::new();
        }
        self.start_pinging(view)
    }

    /// Shared by both voting phases: the primary coming back on its own
    /// cancels whichever round is in progress, regardless of whether it
    /// was still collecting pongs or invalidation acks.
    fn tick_voting(&mut self, view: &FailoverSetView) -> Vec<Action> {
        if self.master_is_available(view) {
            return self.cancel_invalidation();
        }
        Vec::new()
    }

    /// Every healthy watching tick republishes the current primary to all
    /// clients, demotes every other configured instance to follow it, and
    /// refreshes the cached GC info — not just the actions taken right
    /// after a switch.
    fn master_available_actions(&self) -> Vec<Action> {
        let Some(master) = self.current_master.clone() else {
            return Vec::new();
        };
        let replicas: Vec<Endpoint> = self
            .servers
            .iter()
            .filter(|e| *e != &master)
            .cloned()
            .collect();
        vec![
            Action::BroadcastToClients(crate::message::WireMessage::Reconfigure {
                system_name: self.system_name.clone(),
                token: self.token.clone(),
                server: master.to_string(),
            }),
            Action::ConfigureReplicas {
                master: master.clone(),
                replicas,
            },
            Action::RefreshGcInfo(master),
        ]
    }

    /// Primary went unreachable for `max_retries` consecutive ticks: begin
    /// a new round by generating a token and asking clients to pong.
    pub fn start_pinging(&mut self, view: &FailoverSetView) -> Vec<Action> {
        self.phase = Phase::Pinging;
        self.token = self.token.next();
        self.pong_ids.clear();
        self.invalidated_ids.clear();
        self.phase_started_at = SystemTime::now();
        if self.configured_client_ids.is_empty() {
            return self.proceed_to_switch(view);
        }
        vec![Action::BroadcastToClients(crate::message::WireMessage::Ping {
            system_name: self.system_name.clone(),
            token: self.token.clone(),
        })]
    }

    /// Records a `pong` from `client_id` for `token`. Stale or mismatched
    /// tokens are ignored. Returns the actions triggered if quorum is now
    /// reached.
    pub fn received_pong(&mut self, client_id: &str, token: &Token) -> Vec<Action> {
        if self.phase != Phase::Pinging || token != &self.token {
            return Vec::new();
        }
        self.pong_ids.insert(client_id.to_string());
        if self.enough_answers(self.pong_ids.len()) {
            return self.start_invalidating();
        }
        Vec::new()
    }

    fn start_invalidating(&mut self) -> Vec<Action> {
        self.phase = Phase::Invalidating;
        self.phase_started_at = SystemTime::now();
        vec![Action::BroadcastToClients(crate::message::WireMessage::Invalidate {
            system_name: self.system_name.clone(),
            token: self.token.clone(),
        })]
    }

    /// Records a `client_invalidated` ack. Unlike the message's original
    /// server-side handling, a stale or mismatched token is rejected here —
    /// see DESIGN.md decision 2.
    pub fn received_client_invalidated(
        &mut self,
        client_id: &str,
        token: &Token,
        view: &FailoverSetView,
    ) -> Vec<Action> {
        if self.phase != Phase::Invalidating || token != &self.token {
            return Vec::new();
        }
        self.invalidated_ids.insert(client_id.to_string());
        if self.enough_answers(self.invalidated_ids.len()) {
            return self.proceed_to_switch(view);
        }
        Vec::new()
    }

    fn enough_answers(&self, received: usize) -> bool {
        quorum_reached(
            self.confidence_level,
            self.configured_client_ids.len(),
            received,
        )
    }

    /// The primary came back on its own before quorum was reached: abort
    /// the round and resume watching without switching anything.
    fn cancel_invalidation(&mut self) -> Vec<Action> {
        self.phase = Phase::Watching;
        self.retries_done = 0;
        self.pong_ids.clear();
        self.invalidated_ids.clear();
        vec![Action::Notify(format!(
            "{}: primary became available again, cancelling failover",
            self.system_name
        ))]
    }

    fn proceed_to_switch(&mut self, view: &FailoverSetView) -> Vec<Action> {
        self.phase = Phase::Invalidating;
        self.switch_master(view)
    }

    /// Picks the replacement primary the way `DetermineNewMaster` does: if
    /// the old primary is still classified as something other than
    /// `Unknown` in the view, it is kept (an idempotent re-promote); only
    /// when the view has lost track of it do we look among replicas *of
    /// that specific old primary* for a candidate. With no old primary at
    /// all, fall back to whatever the view can auto-detect.
    fn determine_switch_candidate(&self, view: &FailoverSetView) -> Option<Endpoint> {
        let Some(old) = &self.current_master else {
            return view.autodetect_master();
        };
        let old_is_unknown = view.find(old).map(|p| p.role == Role::Unknown).unwrap_or(true);
        if !old_is_unknown {
            return Some(old.clone());
        }
        view.slaves_of(old).first().map(|p| p.endpoint.clone())
    }

    /// Switches to the new primary `determine_switch_candidate` picks. When
    /// no candidate is available the old primary is retained.
    pub fn switch_master(&mut self, view: &FailoverSetView) -> Vec<Action> {
        let candidate = self.determine_switch_candidate(view);
        let mut actions = Vec::new();
        let from = self.current_master.clone();
        match candidate {
            Some(new_master) => {
                self.current_master = Some(new_master.clone());
                self.token = self.token.next();
                actions.push(Action::SwitchMaster {
                    system_name: self.system_name.clone(),
                    from,
                    to: new_master.clone(),
                });
                actions.push(Action::PersistPrimaryFile);
                actions.push(Action::BroadcastToClients(crate::message::WireMessage::Reconfigure {
                    system_name: self.system_name.clone(),
                    token: self.token.clone(),
                    server: new_master.to_string(),
                }));
            }
            None => {
                actions.push(Action::Notify(format!(
                    "{}: no replica available to promote, retaining current primary",
                    self.system_name
                )));
            }
        }
        self.phase = Phase::Watching;
        self.retries_done = 0;
        self.pong_ids.clear();
        self.invalidated_ids.clear();
        actions
    }

    pub fn phase_elapsed(&self) -> Duration {
        self.phase_started_at.elapsed().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis_probe::RedisProbe;
    use std::time::Duration;

    fn state_with_clients(ids: &[&str]) -> FailoverState {
        FailoverState::new(
            "system",
            vec![Endpoint::new("a", 1), Endpoint::new("b", 1)],
            100,
            ids.iter().map(|s| s.to_string()).collect(),
            1,
            Duration::from_secs(1),
        )
    }

    fn unprobed_view() -> FailoverSetView {
        FailoverSetView::new("system", vec![Endpoint::new("a", 1), Endpoint::new("b", 1)])
    }

    fn view_with_probes(probes: Vec<RedisProbe>) -> FailoverSetView {
        FailoverSetView {
            name: "system".to_string(),
            instances: vec![Endpoint::new("a", 1), Endpoint::new("b", 1)],
            probes,
        }
    }

    #[test]
    fn unanimous_quorum_gates_the_switch() {
        let mut state = state_with_clients(&["c1", "c2"]);
        state.current_master = Some(Endpoint::new("a", 1));
        let view = unprobed_view();
        let actions = state.start_pinging(&view);
        assert_eq!(state.phase, Phase::Pinging);
        assert!(!actions.is_empty());

        let actions = state.received_pong("c1", &state.token.clone());
        assert!(actions.is_empty(), "one of two pongs must not reach quorum");
        assert_eq!(state.phase, Phase::Pinging);

        let actions = state.received_pong("c2", &state.token.clone());
        assert_eq!(state.phase, Phase::Invalidating);
        assert!(!actions.is_empty());
    }

    #[test]
    fn stale_token_pong_is_ignored() {
        let mut state = state_with_clients(&["c1"]);
        state.start_pinging(&unprobed_view());
        let stale = Token::zero();
        let actions = state.received_pong("c1", &stale);
        assert!(actions.is_empty());
    }

    #[test]
    fn zero_configured_clients_switches_without_voting() {
        let mut state = state_with_clients(&[]);
        state.current_master = Some(Endpoint::new("a", 1));
        let actions = state.start_pinging(&unprobed_view());
        assert_eq!(state.phase, Phase::Watching);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Notify(_))));
    }

    #[test]
    fn cancel_invalidation_resumes_watching() {
        let mut state = state_with_clients(&["c1"]);
        state.current_master = Some(Endpoint::new("a", 1));
        state.start_pinging(&unprobed_view());
        let actions = state.cancel_invalidation();
        assert_eq!(state.phase, Phase::Watching);
        assert!(!actions.is_empty());
    }

    #[test]
    fn switch_master_without_candidate_retains_old_primary() {
        let mut state = state_with_clients(&["c1"]);
        let old = Endpoint::new("a", 1);
        state.current_master = Some(old.clone());
        let actions = state.switch_master(&unprobed_view());
        assert_eq!(state.current_master, Some(old));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Notify(_))));
    }

    #[test]
    fn switch_master_with_no_reachable_slave_in_view_retains_primary() {
        let mut state = state_with_clients(&["c1"]);
        state.current_master = Some(Endpoint::new("a", 1));
        let before = state.token.clone();
        let view = unprobed_view();
        let actions = state.switch_master(&view);
        assert_eq!(state.token, before, "no candidate available in an unprobed view");
        assert!(actions.iter().any(|a| matches!(a, Action::Notify(_))));
    }

    #[test]
    fn switch_master_promotes_a_slave_of_the_unreachable_old_primary() {
        let mut state = state_with_clients(&["c1"]);
        let old = Endpoint::new("a", 1);
        let replica = Endpoint::new("b", 1);
        state.current_master = Some(old.clone());
        let view = view_with_probes(vec![
            RedisProbe {
                endpoint: old.clone(),
                role: Role::Unknown,
                master_host: None,
                master_port: None,
            },
            RedisProbe {
                endpoint: replica.clone(),
                role: Role::Slave,
                master_host: Some("a".to_string()),
                master_port: Some(1),
            },
        ]);
        let actions = state.switch_master(&view);
        assert_eq!(state.current_master, Some(replica.clone()));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::SwitchMaster { to, .. } if *to == replica
        )));
    }

    #[test]
    fn switch_master_does_not_promote_a_slave_of_a_different_master() {
        let mut state = state_with_clients(&["c1"]);
        let old = Endpoint::new("a", 1);
        let unrelated_replica = Endpoint::new("b", 1);
        state.current_master = Some(old.clone());
        let view = view_with_probes(vec![
            RedisProbe {
                endpoint: old.clone(),
                role: Role::Unknown,
                master_host: None,
                master_port: None,
            },
            RedisProbe {
                endpoint: unrelated_replica,
                role: Role::Slave,
                master_host: Some("c".to_string()),
                master_port: Some(1),
            },
        ]);
        let actions = state.switch_master(&view);
        assert_eq!(state.current_master, Some(old));
        assert!(actions.iter().any(|a| matches!(a, Action::Notify(_))));
    }

    #[test]
    fn healthy_tick_republishes_reconfigure_and_configures_replicas() {
        let mut state = state_with_clients(&["c1"]);
        let master = Endpoint::new("a", 1);
        state.current_master = Some(master.clone());
        let view = view_with_probes(vec![RedisProbe {
            endpoint: master.clone(),
            role: Role::Master,
            master_host: None,
            master_port: None,
        }]);
        let actions = state.tick(&view);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::BroadcastToClients(crate::message::WireMessage::Reconfigure { .. }))));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::ConfigureReplicas { master: m, .. } if *m == master)));
        assert!(actions.iter().any(|a| matches!(a, Action::RefreshGcInfo(_))));
    }

    #[test]
    fn invalidating_phase_recovers_when_primary_comes_back() {
        let mut state = state_with_clients(&["c1"]);
        let master = Endpoint::new("a", 1);
        state.current_master = Some(master.clone());
        state.phase = Phase::Invalidating;
        let view = view_with_probes(vec![RedisProbe {
            endpoint: master,
            role: Role::Master,
            master_host: None,
            master_port: None,
        }]);
        let actions = state.tick(&view);
        assert_eq!(state.phase, Phase::Watching);
        assert!(actions.iter().any(|a| matches!(a, Action::Notify(_))));
    }
}
