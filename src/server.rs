//! Top-level lifecycle: wires the registry, bridge, acceptor and discovery
//! responder together and drives `start`/`halt` (spec §4.H).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::acceptor::Acceptor;
use crate::agent::{Agent, AuthorizationHook};
use crate::bridge::{CommitEvent, EventBridge};
use crate::config::ServerConfig;
use crate::connection::{ConnectionHolder, ConnectionId};
use crate::discovery::{DiscoveryCodes, MulticastResponder};
use crate::error::ServerError;
use crate::registry::{JournalKey, PublishAfterStart, Writer, WriterIndex, WriterRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Running,
    Halting,
}

/// One-shot cluster-loss signal a Handler raises and the Server's watcher
/// task reacts to by halting with a zero deadline (spec §4.H, §9).
pub struct HaltHandle {
    requested: AtomicBool,
    notify: tokio::sync::Notify,
}

impl HaltHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            requested: AtomicBool::new(false),
            notify: tokio::sync::Notify::new(),
        })
    }

    pub fn request_cluster_loss(&self) {
        if !self.requested.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    async fn wait(&self) {
        let notified = self.notify.notified();
        if self.requested.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }
}

/// A connection plus the task driving its Handler loop.
struct ChannelEntry {
    holder: Arc<ConnectionHolder>,
    task: JoinHandle<()>,
}

/// Replication server: owns a [`WriterRegistry`] of published journals, an
/// [`EventBridge`] fanning commits out to subscribers, a TCP/TLS
/// [`Acceptor`], and an optional multicast [`MulticastResponder`].
///
/// `Agent`/`AuthorizationHook` are behind trait objects rather than a
/// generic type parameter: the protocol implementation is an external
/// collaborator (spec §1 Non-goals), and a concrete `Server<A, H, ...>`
/// would otherwise force every caller to name it.
pub struct Server<W> {
    config: ServerConfig,
    registry: Arc<WriterRegistry<W>>,
    bridge: Arc<EventBridge>,
    agent_factory: Box<dyn Fn(SocketAddr) -> Box<dyn Agent> + Send + Sync>,
    auth_hook: Arc<dyn AuthorizationHook>,
    discovery_codes: DiscoveryCodes,
    state: Mutex<ServerState>,
    channels: Mutex<HashMap<ConnectionId, ChannelEntry>>,
    halt_handle: Arc<HaltHandle>,
    acceptor_task: Mutex<Option<JoinHandle<()>>>,
    cluster_watch_task: Mutex<Option<JoinHandle<()>>>,
    responder: Mutex<Option<MulticastResponder>>,
    /// Lets `&self` methods hand an owned `Arc<Self>` to spawned tasks
    /// without requiring callers to use the unstable `self: &Arc<Self>`
    /// receiver type.
    self_ref: Weak<Self>,
}

impl<W: Writer + 'static> Server<W> {
    pub fn new(
        config: ServerConfig,
        agent_factory: impl Fn(SocketAddr) -> Box<dyn Agent> + Send + Sync + 'static,
        auth_hook: Arc<dyn AuthorizationHook>,
        discovery_codes: DiscoveryCodes,
    ) -> Arc<Self> {
        let bridge = Arc::new(EventBridge::new(
            config.heartbeat_frequency,
            config.bridge_queue_capacity,
        ));
        Arc::new_cyclic(|self_ref| Self {
            registry: Arc::new(WriterRegistry::new()),
            bridge,
            agent_factory: Box::new(agent_factory),
            auth_hook,
            discovery_codes,
            state: Mutex::new(ServerState::Stopped),
            channels: Mutex::new(HashMap::new()),
            halt_handle: HaltHandle::new(),
            acceptor_task: Mutex::new(None),
            cluster_watch_task: Mutex::new(None),
            responder: Mutex::new(None),
            self_ref: self_ref.clone(),
            config,
        })
    }

    fn arc_self(&self) -> Arc<Self> {
        self.self_ref
            .upgrade()
            .expect("Server always outlives its own handle")
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock().unwrap()
    }

    /// Registers a writer under `key`. Must be called before `start`
    /// (spec §4.A, §9).
    pub fn publish(&self, key: JournalKey, writer: W) -> Result<WriterIndex, PublishAfterStart> {
        self.registry.publish(key, writer)
    }

    pub fn auth_hook(&self) -> &Arc<dyn AuthorizationHook> {
        &self.auth_hook
    }

    pub fn bridge(&self) -> &Arc<EventBridge> {
        &self.bridge
    }

    pub fn registry(&self) -> &Arc<WriterRegistry<W>> {
        &self.registry
    }

    /// Seals the registry, starts the bridge, binds the acceptor and
    /// (if configured) the multicast responder, and begins accepting
    /// connections (spec §4.H start sequence).
    pub async fn start(&self) -> Result<(), ServerError> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != ServerState::Stopped {
                return Err(ServerError::InvalidState);
            }
            *state = ServerState::Running;
        }

        self.config.validate()?;
        self.registry.seal();
        self.install_commit_listeners();
        self.bridge.start();

        let node = self.config.this_node().ok_or_else(|| {
            ServerError::Configuration("no node entry for this instance".to_string())
        })?;
        let bind_addr: SocketAddr = format!("0.0.0.0:{}", node.port)
            .parse()
            .map_err(|_| ServerError::Configuration("invalid bind port".to_string()))?;
        let acceptor = Arc::new(
            Acceptor::bind(bind_addr, &self.config.ssl, self.config.client_socket_options).await?,
        );
        let local_port = acceptor.local_addr()?.port();

        let responder = MulticastResponder::start(&self.config, self.discovery_codes, local_port)
            .await
            .map_err(ServerError::Io)?;
        *self.responder.lock().unwrap() = responder;

        let server = self.arc_self();
        let accept_loop = tokio::spawn(async move {
            loop {
                if server.state() != ServerState::Running {
                    break;
                }
                match acceptor.accept().await {
                    Ok(holder) => server.dispatch(holder),
                    Err(err) => log::warn!("accept failed: {err}"),
                }
            }
        });
        *self.acceptor_task.lock().unwrap() = Some(accept_loop);

        let server = self.arc_self();
        let halt_handle = Arc::clone(&self.halt_handle);
        let watcher = tokio::spawn(async move {
            halt_handle.wait().await;
            server.halt_from_cluster_loss().await;
        });
        *self.cluster_watch_task.lock().unwrap() = Some(watcher);

        Ok(())
    }

    /// For each published writer, installs a listener that tags its
    /// commits with the writer's index and feeds them to the bridge
    /// (spec §4.H start step 2).
    fn install_commit_listeners(&self) {
        for index in self.registry.indices() {
            let bridge = Arc::clone(&self.bridge);
            self.registry.with_writer(index, |writer| {
                writer.install_commit_listener(Arc::new(move |sequence, payload| {
                    bridge.publish(
                        index,
                        CommitEvent {
                            writer_index: index,
                            sequence,
                            payload,
                        },
                    );
                }));
            });
        }
    }

    /// For each published writer, detaches its commit listener so no
    /// further callback can enqueue into the bridge (spec §4.H halt
    /// step 3).
    fn detach_commit_listeners(&self) {
        for index in self.registry.indices() {
            self.registry
                .with_writer(index, |writer| writer.detach_commit_listener());
        }
    }

    /// Rejects the connection outright if the server is no longer
    /// `Running` (spec §4.F "SubmissionRejected"), else registers it and
    /// spawns its Handler.
    fn dispatch(&self, holder: Arc<ConnectionHolder>) {
        if self.state() != ServerState::Running {
            log::info!("{}", ServerError::SubmissionRejected);
            holder.close(true);
            return;
        }
        let id = holder.id();
        let agent = (self.agent_factory)(holder.remote_addr());
        let halt_handle = Arc::clone(&self.halt_handle);
        let server = self.arc_self();
        let holder_for_task = Arc::clone(&holder);
        let task = tokio::spawn(async move {
            crate::handler::run(holder_for_task, agent, halt_handle).await;
            server.channels.lock().unwrap().remove(&id);
        });
        self.channels
            .lock()
            .unwrap()
            .insert(id, ChannelEntry { holder, task });
    }

    /// Stops accepting, stops the discovery responder and bridge, waits
    /// up to `deadline` for in-flight handlers to finish on their own,
    /// then force-closes and aborts whatever remains (spec §4.H halt
    /// sequence).
    pub async fn halt(&self, deadline: Duration) {
        {
            let mut state = self.state.lock().unwrap();
            if *state != ServerState::Running {
                return;
            }
            *state = ServerState::Halting;
        }

        if let Some(task) = self.acceptor_task.lock().unwrap().take() {
            task.abort();
        }
        if let Some(task) = self.cluster_watch_task.lock().unwrap().take() {
            task.abort();
        }
        self.detach_commit_listeners();
        let responder = self.responder.lock().unwrap().take();
        if let Some(mut responder) = responder {
            responder.halt().await;
        }
        self.bridge.halt().await;

        let deadline_instant = tokio::time::Instant::now() + deadline;
        loop {
            let empty = self.channels.lock().unwrap().is_empty();
            if empty || tokio::time::Instant::now() >= deadline_instant {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stragglers: Vec<ChannelEntry> = self.channels.lock().unwrap().drain().map(|(_, v)| v).collect();
        for entry in stragglers {
            entry.holder.close(true);
            entry.task.abort();
        }

        *self.state.lock().unwrap() = ServerState::Stopped;
    }

    /// Non-blocking, reentrancy-safe: a peer reporting it lost the
    /// cluster quorum vote forces an immediate self-halt (spec §9).
    /// Safe to call concurrently or more than once — `halt` no-ops once
    /// the state has left `Running`.
    pub async fn halt_from_cluster_loss(&self) {
        self.halt(Duration::ZERO).await;
    }
}
