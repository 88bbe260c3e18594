//! The coordinator's single-threaded serializing dispatcher.
//!
//! Grounded on `original_source/go/server_state.go`'s `dispatcher()` select
//! loop and `Evaluate`, and on the teacher's single-consumer-task idiom in
//! `lib_common/src/core/upstream_manager.rs`. One task owns every piece of
//! mutable coordinator state (failover sets, client registry, primary-file
//! contents) and is the only place that mutates it; everything else talks
//! to it through channels.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use lib_common::config::Config;
use lib_common::failover_set::FailoverSetView;
use lib_common::message::WireMessage;
use lib_common::primary_file;
use lib_common::redis_probe::{self, Endpoint};
use lib_common::state::{Action, FailoverState};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::registry::ClientRegistry;

const LAST_SEEN_EVICTION_WINDOW: Duration = Duration::from_secs(24 * 3600);

/// A unit of work the dispatcher task runs against its own state, boxed so
/// arbitrary closures from HTTP handlers can be scheduled without the
/// dispatcher knowing their concrete type ahead of time.
type BoxedTask = Box<dyn FnOnce(&mut Dispatcher) + Send>;

/// An admin request that needs to run `await`-ing work (redis probes) on
/// the dispatcher task, unlike `evaluate`'s synchronous closures.
enum AdminCommand {
    InitiateMasterSwitch {
        system_name: String,
        reply: oneshot::Sender<Option<bool>>,
    },
}

#[derive(Clone)]
pub struct DispatcherHandle {
    tasks: mpsc::UnboundedSender<BoxedTask>,
    client_messages: mpsc::UnboundedSender<WireMessage>,
    admin_commands: mpsc::UnboundedSender<AdminCommand>,
}

impl DispatcherHandle {
    /// Runs `f` against the dispatcher's state on its own task and returns
    /// its result. This is the "submit(closure) -> awaitable" RPC used by
    /// HTTP handlers to read or mutate dispatcher-owned state without
    /// locks.
    pub async fn evaluate<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut Dispatcher) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let task: BoxedTask = Box::new(move |dispatcher| {
            let _ = reply_tx.send(f(dispatcher));
        });
        self.tasks.send(task).ok()?;
        reply_rx.await.ok()
    }

    pub fn submit_message(&self, message: WireMessage) {
        let _ = self.client_messages.send(message);
    }

    /// `POST /initiate_master_switch`'s entry point. `None` means the
    /// system name is unknown (caller should answer 400); `Some(true)`
    /// means a switch was just started (201); `Some(false)` means one
    /// wasn't necessary (200).
    pub async fn initiate_master_switch(&self, system_name: String) -> Option<bool> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.admin_commands
            .send(AdminCommand::InitiateMasterSwitch {
                system_name,
                reply: reply_tx,
            })
            .ok()?;
        reply_rx.await.ok().flatten()
    }
}

pub struct Dispatcher {
    pub states: HashMap<String, FailoverState>,
    pub registry: ClientRegistry,
    pub config: Config,
    pub last_views: HashMap<String, FailoverSetView>,
}

fn configured_client_ids_from(config: &Config) -> std::collections::BTreeSet<String> {
    config
        .client_ids
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn build_state(
    name: String,
    spec: &str,
    config: &Config,
    configured_client_ids: std::collections::BTreeSet<String>,
) -> FailoverState {
    let servers: Vec<Endpoint> = spec
        .split(',')
        .filter_map(|s| s.parse::<Endpoint>().ok())
        .collect();
    FailoverState::new(
        name,
        servers,
        config.confidence_level.unwrap_or(100),
        configured_client_ids,
        config.redis_master_retries.unwrap_or(3),
        config.redis_master_retry_interval_duration(),
    )
}

impl Dispatcher {
    pub fn new(config: Config) -> Self {
        let configured_client_ids = configured_client_ids_from(&config);
        let mut states = HashMap::new();
        for set in config.failover_sets() {
            let state = build_state(set.name.clone(), &set.spec, &config, configured_client_ids.clone());
            states.insert(set.name, state);
        }
        Dispatcher {
            states,
            registry: ClientRegistry::new(configured_client_ids),
            config,
            last_views: HashMap::new(),
        }
    }

    /// Spawns the dispatcher loop. Returns a cheaply-cloneable handle used
    /// to submit client messages and ad hoc evaluations.
    pub fn spawn(
        mut self,
        shutdown: tokio_graceful::ShutdownGuard,
        mut config_changes: mpsc::Receiver<Config>,
    ) -> DispatcherHandle {
        let (task_tx, mut task_rx) = mpsc::unbounded_channel::<BoxedTask>();
        let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<WireMessage>();
        let (admin_tx, mut admin_rx) = mpsc::unbounded_channel::<AdminCommand>();
        let handle = DispatcherHandle {
            tasks: task_tx,
            client_messages: msg_tx,
            admin_commands: admin_tx,
        };

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("dispatcher shutting down");
                        break;
                    }
                    Some(task) = task_rx.recv() => {
                        task(&mut self);
                    }
                    Some(msg) = msg_rx.recv() => {
                        self.handle_client_message(msg).await;
                    }
                    Some(cfg) = config_changes.recv() => {
                        self.apply_config_change(cfg).await;
                    }
                    Some(cmd) = admin_rx.recv() => {
                        match cmd {
                            AdminCommand::InitiateMasterSwitch { system_name, reply } => {
                                let result = self.initiate_master_switch(&system_name).await;
                                let _ = reply.send(result);
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        self.run_tick().await;
                    }
                }
            }
        });

        handle
    }

    async fn apply_config_change(&mut self, incoming: Config) {
        info!("applying configuration change from remote key/value store");
        self.config = std::mem::take(&mut self.config).merge(&incoming);
        self.reconcile_states();
        self.refresh_views().await;
    }

    /// Adds/removes `FailoverState`s to match the newly merged config's
    /// failover sets, and re-parses `confidence_level`/client ids into the
    /// ones that survive. A set whose server list changed gets a fresh
    /// state (any in-flight vote for the old server list is meaningless)
    /// rather than having its servers patched in place.
    fn reconcile_states(&mut self) {
        let configured_client_ids = configured_client_ids_from(&self.config);
        let sets = self.config.failover_sets();
        let wanted: std::collections::HashSet<String> = sets.iter().map(|s| s.name.clone()).collect();

        self.states.retain(|name, _| wanted.contains(name));
        self.last_views.retain(|name, _| wanted.contains(name));

        for set in &sets {
            let servers: Vec<Endpoint> = set
                .spec
                .split(',')
                .filter_map(|s| s.parse::<Endpoint>().ok())
                .collect();
            match self.states.get_mut(&set.name) {
                Some(state) if state.servers == servers => {
                    state.confidence_level = self.config.confidence_level.unwrap_or(100);
                    state.configured_client_ids = configured_client_ids.clone();
                }
                _ => {
                    let state = build_state(
                        set.name.clone(),
                        &set.spec,
                        &self.config,
                        configured_client_ids.clone(),
                    );
                    self.states.insert(set.name.clone(), state);
                    self.last_views.remove(&set.name);
                }
            }
        }
        self.registry.set_configured_client_ids(configured_client_ids);
    }

    async fn refresh_views(&mut self) {
        for (name, state) in self.states.iter() {
            let mut view = FailoverSetView::new(name.clone(), state.servers.clone());
            view.refresh().await;
            self.last_views.insert(name.clone(), view);
        }
    }

    async fn run_tick(&mut self) {
        self.refresh_views().await;
        let names: Vec<String> = self.states.keys().cloned().collect();
        for name in names {
            let view = self.last_views.get(&name).cloned();
            let Some(view) = view else { continue };
            let actions = {
                let state = self.states.get_mut(&name).expect("name came from states.keys()");
                state.tick(&view)
            };
            self.execute_actions(&name, actions).await;
        }
        self.registry.forget_old_unknown_client_ids(LAST_SEEN_EVICTION_WINDOW);
        self.registry.forget_old_last_seen_entries(LAST_SEEN_EVICTION_WINDOW);
    }

    async fn handle_client_message(&mut self, message: WireMessage) {
        if let WireMessage::Unsubscribe { id } = &message {
            self.registry.unregister(id);
            return;
        }
        if let Some(id) = message.client_id() {
            self.registry.client_seen(id);
        }
        let Some(system_name) = message.system_name().map(str::to_string) else {
            return;
        };
        let view = self
            .last_views
            .get(&system_name)
            .cloned()
            .unwrap_or_else(|| match self.states.get(&system_name) {
                Some(state) => FailoverSetView::new(system_name.clone(), state.servers.clone()),
                None => FailoverSetView::new(system_name.clone(), Vec::new()),
            });
        let actions = match (&message, self.states.get_mut(&system_name)) {
            (WireMessage::Pong { id, token, .. }, Some(state)) => state.received_pong(id, token),
            (WireMessage::ClientInvalidated { id, token, .. }, Some(state)) => {
                state.received_client_invalidated(id, token, &view)
            }
            _ => Vec::new(),
        };
        self.execute_actions(&system_name, actions).await;
    }

    /// Drives `POST /initiate_master_switch`. Mirrors `InitiateMasterSwitch`:
    /// refresh the view, and if the primary isn't available (or a switch is
    /// already underway) force a vote to start; otherwise there is nothing
    /// to do.
    async fn initiate_master_switch(&mut self, system_name: &str) -> Option<bool> {
        if !self.states.contains_key(system_name) {
            return None;
        }
        let mut view = FailoverSetView::new(
            system_name.to_string(),
            self.states.get(system_name)?.servers.clone(),
        );
        view.refresh().await;
        self.last_views.insert(system_name.to_string(), view.clone());

        let state = self.states.get_mut(system_name)?;
        if state.switch_in_progress() {
            return Some(false);
        }
        if state.master_is_available(&view) {
            return Some(false);
        }
        let actions = state.start_pinging(&view);
        self.execute_actions(system_name, actions).await;
        Some(true)
    }

    async fn execute_actions(&mut self, system_name: &str, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::BroadcastToClients(message) => self.registry.broadcast(&message),
                Action::SwitchMaster { from, to, .. } => {
                    info!(system_name, from = ?from, to = %to, "switching primary");
                    if let Err(e) = redis_probe::make_master(&to).await {
                        error!(system_name, %to, error = %e, "failed to promote new primary");
                    }
                    if let Some(old) = &from {
                        if let Err(e) = redis_probe::make_slave_of(old, &to).await {
                            warn!(system_name, %old, error = %e, "could not reconfigure old primary as a replica");
                        }
                    }
                }
                Action::ConfigureReplicas { master, replicas } => {
                    for replica in &replicas {
                        if let Err(e) = redis_probe::make_slave_of(replica, &master).await {
                            warn!(system_name, %replica, %master, error = %e, "failed to reconfigure replica");
                        }
                    }
                }
                Action::RefreshGcInfo(endpoint) => {
                    let info = redis_probe::fetch_last_gc_info(&endpoint).await;
                    if let Some(state) = self.states.get_mut(system_name) {
                        state.update_gc_info(info);
                    }
                }
                Action::PersistPrimaryFile => self.persist_primary_file(),
                Action::Notify(message) => {
                    info!(system_name, %message, "failover notice");
                    self.registry.send_notification(&message);
                }
            }
        }
    }

    fn persist_primary_file(&self) {
        let mut masters = BTreeMap::new();
        for (name, state) in &self.states {
            if let Some(master) = &state.current_master {
                masters.insert(name.clone(), master.to_string());
            }
        }
        let Some(path) = &self.config.redis_master_file else {
            return;
        };
        let content = primary_file::marshal(&masters);
        if let Err(e) = primary_file::write_primary_file(path, &content) {
            error!(path, error = %e, "failed to persist primary file");
        }
    }
}
