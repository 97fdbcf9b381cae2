//! The hub controller: global state (node table, edge tables, delay table,
//! proxy listeners) and the control operations described in the top-level
//! crate documentation — `start_listeners`, `connect`, `disconnect`,
//! `set_delay`, `connect_graph`, `connect_line`.
//!
//! Mirrors the shape of the teacher crate's `Node`: a struct owning shared
//! state behind locks, with handler tasks holding only non-owning handles
//! back into it (here, an `Arc<Hub>` clone) and reporting closure through
//! `disconnect` rather than closing transports directly.

mod relay;

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::time::Instant as TokioInstant;

use crate::async_runtime as rt;
use crate::async_runtime::JoinHandle;
use crate::communication::socket::{self, Listener};
use crate::communication::{DirectedEdge, NodeIndex, PortMap};
use crate::error::*;

/// The verb passed to a node's `addnode` control command.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AddNodeMode {
    /// Register the address as a persistent peer.
    Add,
    /// Dial the address once, right now.
    OneTry,
}

impl AddNodeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddNodeMode::Add => "add",
            AddNodeMode::OneTry => "onetry",
        }
    }
}

/// The out-of-scope collaborator that drives a node's text-form control
/// interface (spec §6): `addnode(address, "add")` followed by
/// `addnode(address, "onetry")`. The node implementation itself, and how
/// this command reaches it, are outside this crate's concerns.
pub trait NodeController: Send + Sync {
    fn addnode(&self, node: NodeIndex, addr: SocketAddr, mode: AddNodeMode) -> Result<()>;
}

/// A `NodeController` that does nothing; useful for tests that only
/// exercise the relay and never expect a real node to dial back.
#[derive(Default)]
pub struct NullController;

impl NodeController for NullController {
    fn addnode(&self, _node: NodeIndex, _addr: SocketAddr, _mode: AddNodeMode) -> Result<()> {
        Ok(())
    }
}

/// A `NodeController` that records every `addnode` call it receives instead
/// of acting on it, so a test can assert on what the hub asked of a node's
/// control interface without standing up a real one.
#[derive(Default)]
pub struct InProcessController {
    calls: Mutex<Vec<(NodeIndex, SocketAddr, AddNodeMode)>>,
}

impl InProcessController {
    pub fn new() -> Self {
        InProcessController::default()
    }

    /// Every `(node, addr, mode)` triple passed to `addnode` so far, in call
    /// order.
    pub fn calls(&self) -> Vec<(NodeIndex, SocketAddr, AddNodeMode)> {
        self.calls.lock().clone()
    }
}

impl NodeController for InProcessController {
    fn addnode(&self, node: NodeIndex, addr: SocketAddr, mode: AddNodeMode) -> Result<()> {
        self.calls.lock().push((node, addr, mode));
        Ok(())
    }
}

/// Configuration used to bootstrap a [`Hub`].
pub struct HubConfig {
    /// The host every listener binds on, and every outbound dial targets.
    pub host: IpAddr,
    /// `N`, the number of nodes in the experiment.
    pub node_count: usize,
    /// Maps a node index (`0..node_count` for real nodes, or
    /// `node_count + 1 + i` for the proxy representing node `i`) to a TCP
    /// port. This is the out-of-scope port-allocation convention of the
    /// embedding test framework.
    pub node_port: Arc<dyn Fn(NodeIndex) -> u16 + Send + Sync>,
}

type SharedWriteHalf = Arc<AsyncMutex<OwnedWriteHalf>>;

struct EdgeState {
    sender_write: Option<SharedWriteHalf>,
    receiver_write: Option<SharedWriteHalf>,
    sender_task: Option<JoinHandle<()>>,
    receiver_task: Option<JoinHandle<()>>,
    // per-direction deadline trackers, serializing delayed writes so that
    // bursts on the same direction cannot be reordered by their sleeps
    // (spec §9's correction over independent per-burst sleeping tasks).
    sender_deadline: Arc<Mutex<TokioInstant>>,
    receiver_deadline: Arc<Mutex<TokioInstant>>,
}

impl EdgeState {
    fn new() -> Self {
        let now = TokioInstant::now();
        EdgeState {
            sender_write: None,
            receiver_write: None,
            sender_task: None,
            receiver_task: None,
            sender_deadline: Arc::new(Mutex::new(now)),
            receiver_deadline: Arc::new(Mutex::new(now)),
        }
    }

    fn is_open(&self) -> bool {
        self.sender_write.is_some() && self.receiver_write.is_some()
    }
}

#[derive(Default)]
struct HubState {
    pending: Option<DirectedEdge>,
    edges: HashMap<DirectedEdge, EdgeState>,
    delays: HashMap<DirectedEdge, Duration>,
}

/// Owns every piece of global state described in the data model: the node
/// table, the edge transport tables, the delay table, and the listener
/// fleet. All mutation happens through its methods; handlers only hold an
/// `Arc<Hub>` back-reference and a non-owning handle to their own socket.
pub struct Hub {
    host: IpAddr,
    node_count: usize,
    node_port_fn: Arc<dyn Fn(NodeIndex) -> u16 + Send + Sync>,
    controller: Arc<dyn NodeController>,
    ports: PortMap,
    state: Mutex<HubState>,
    edge_notify: Notify,
    // held for the duration of one connect() call; the async equivalent of
    // the source's single-slot PendingConnect lock (spec §9).
    connect_lock: AsyncMutex<()>,
}

impl Hub {
    /// Builds a `Hub`. The node/proxy port map (data model invariant 3) is
    /// established immediately; no listener is bound yet until
    /// [`Hub::start_listeners`] is called.
    pub fn new(config: HubConfig, controller: Arc<dyn NodeController>) -> Arc<Hub> {
        let mut ports = PortMap::new();
        for i in 0..config.node_count {
            let node = NodeIndex::from(i as u32);
            ports.insert((config.node_port)(node), node);
            let proxy_of_node = NodeIndex::from((config.node_count + 1 + i) as u32);
            ports.insert((config.node_port)(proxy_of_node), node);
        }

        Arc::new(Hub {
            host: config.host,
            node_count: config.node_count,
            node_port_fn: config.node_port,
            controller,
            ports,
            state: Mutex::new(HubState::default()),
            edge_notify: Notify::new(),
            connect_lock: AsyncMutex::new(()),
        })
    }

    pub fn node_port(&self, node: NodeIndex) -> u16 {
        (self.node_port_fn)(node)
    }

    pub fn proxy_port(&self, node: NodeIndex) -> u16 {
        let proxy_of_node = NodeIndex::from((self.node_count + 1 + usize::from(node)) as u32);
        (self.node_port_fn)(proxy_of_node)
    }

    fn proxy_addr(&self, node: NodeIndex) -> SocketAddr {
        SocketAddr::new(self.host, self.proxy_port(node))
    }

    fn node_addr(&self, node: NodeIndex) -> SocketAddr {
        SocketAddr::new(self.host, self.node_port(node))
    }

    /// Binds one TCP listener per node, all on `self.host`. Returns only
    /// once every listener is accepting. On any bind failure, every
    /// already-bound listener is dropped (closing it) and `BindFailed` is
    /// returned.
    pub async fn start_listeners(self: &Arc<Self>) -> Result<()> {
        let mut binds = Vec::with_capacity(self.node_count);
        for i in 0..self.node_count {
            let addr = self.proxy_addr(NodeIndex::from(i as u32));
            binds.push(rt::spawn(async move { socket::bind(addr).await }));
        }

        let mut listeners = Vec::with_capacity(self.node_count);
        for bind in binds {
            match bind.await {
                Ok(Ok(listener)) => listeners.push(listener),
                _ => {
                    log::error!("hub: failed to bind a proxy listener, aborting startup");
                    // dropping `listeners` here closes every socket bound so far
                    return Err(Error::simple(ErrorKind::HubBindFailed));
                }
            }
        }

        for (i, listener) in listeners.into_iter().enumerate() {
            let node = NodeIndex::from(i as u32);
            let hub = self.clone();
            rt::spawn(hub.listener_loop(node, listener));
        }

        Ok(())
    }

    async fn listener_loop(self: Arc<Self>, node: NodeIndex, listener: Listener) {
        log::info!("hub: listening for node {} on {:?}", u32::from(node), listener.local_addr());
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    log::debug!("hub: accepted sender connection from {} on proxy for node {}", peer, u32::from(node));
                    let hub = self.clone();
                    rt::spawn(hub.handle_sender_accept(socket));
                }
                Err(e) => {
                    log::warn!("hub: listener for node {} stopped accepting: {}", u32::from(node), e);
                    return;
                }
            }
        }
    }

    /// Mutates (or removes, if `seconds == 0`) the delay entry for the
    /// directed edge `(out, in)`. Affects subsequent scheduling decisions
    /// only; bytes already waiting on an earlier-scheduled wake-up are not
    /// re-timed.
    pub fn set_delay(&self, out: NodeIndex, inn: NodeIndex, seconds: f64) {
        // a self-loop edge can never exist in any table; nothing to set.
        let Some(edge) = DirectedEdge::new(out, inn) else {
            return;
        };
        let mut state = self.state.lock();
        if seconds <= 0.0 {
            state.delays.remove(&edge);
        } else {
            state.delays.insert(edge, Duration::from_secs_f64(seconds));
        }
    }

    /// Establishes both halves of edge `(out, in)`. Fails with
    /// `EdgeAlreadyExists` if either half is already present.
    pub async fn connect(self: &Arc<Self>, out: NodeIndex, inn: NodeIndex) -> Result<()> {
        let edge = DirectedEdge::new(out, inn).ok_or_else(|| Error::simple(ErrorKind::HubSelfLoopEdge))?;

        // serializes concurrent connect() calls, the async-native
        // equivalent of the source's single-slot PendingConnect lock.
        let _guard = self.connect_lock.lock().await;

        {
            let mut state = self.state.lock();
            let already_exists = state
                .edges
                .get(&edge)
                .is_some_and(|e| e.sender_write.is_some() || e.receiver_write.is_some());
            if already_exists {
                return Err(Error::simple(ErrorKind::HubEdgeAlreadyExists));
            }
            state.edges.entry(edge).or_insert_with(EdgeState::new);
            state.pending = Some(edge);
        }

        log::info!("hub: connecting edge {} -> {}", u32::from(out), u32::from(inn));

        let proxy_addr = self.proxy_addr(inn);
        if let Err(e) = self
            .controller
            .addnode(out, proxy_addr, AddNodeMode::Add)
            .and_then(|()| self.controller.addnode(out, proxy_addr, AddNodeMode::OneTry))
        {
            // abandon the half-registered edge rather than leaving a phantom
            // `state.pending`/`state.edges` entry that the next unrelated
            // accept could be misattributed to (handle_sender_accept reads
            // `state.pending` unconditionally).
            self.disconnect(out, inn);
            return Err(e);
        }

        let hub = self.clone();
        rt::spawn(hub.dial_receiver(edge));

        loop {
            let notified = self.edge_notify.notified();
            let is_open = {
                let state = self.state.lock();
                state.edges.get(&edge).is_some_and(EdgeState::is_open)
            };
            if is_open {
                break;
            }
            notified.await;
        }

        {
            let mut state = self.state.lock();
            if state.pending == Some(edge) {
                state.pending = None;
            }
        }

        log::info!("hub: edge {} -> {} is open", u32::from(out), u32::from(inn));
        Ok(())
    }

    /// Closes both transports of edge `(out, in)` and removes every
    /// edge-indexed entry. Idempotent: missing entries are silently
    /// skipped, so it is safe to call from a handler's own close callback,
    /// including re-entrantly.
    pub fn disconnect(&self, out: NodeIndex, inn: NodeIndex) {
        // a self-loop edge can never exist in any table; nothing to close.
        let Some(edge) = DirectedEdge::new(out, inn) else {
            return;
        };

        let removed = {
            let mut state = self.state.lock();
            if state.pending == Some(edge) {
                state.pending = None;
            }
            state.edges.remove(&edge)
        };

        let Some(mut edge_state) = removed else {
            return;
        };

        log::info!("hub: disconnecting edge {} -> {}", u32::from(out), u32::from(inn));

        if let Some(task) = edge_state.sender_task.take() {
            task.abort();
        }
        if let Some(task) = edge_state.receiver_task.take() {
            task.abort();
        }
        // dropping `edge_state` here releases this hub's references to
        // both write halves; the aborted tasks release the other two
        // (each peer handler holds a clone of the write half it relays
        // into), fully closing both sockets.
    }

    /// Connects every edge in `edges`, deduplicating first (spec §9 open
    /// question: a set of edges may legitimately contain duplicates if the
    /// caller built it carelessly; we treat that as a no-op rather than an
    /// error).
    pub async fn connect_graph<I>(self: &Arc<Self>, edges: I) -> Result<()>
    where
        I: IntoIterator<Item = (NodeIndex, NodeIndex)>,
    {
        let mut deduped: HashSet<DirectedEdge> = HashSet::new();
        for (out, inn) in edges {
            let edge = DirectedEdge::new(out, inn).ok_or_else(|| Error::simple(ErrorKind::HubSelfLoopEdge))?;
            deduped.insert(edge);
        }

        let mut handles = Vec::with_capacity(deduped.len());
        for edge in deduped {
            let hub = self.clone();
            handles.push(rt::spawn(
                async move { hub.connect(edge.out(), edge.inn()).await },
            ));
        }

        for handle in handles {
            handle
                .await
                .map_err(|e| Error::wrapped(ErrorKind::Hub, e))??;
        }
        Ok(())
    }

    /// Opens `(i, i+1)` and `(i+1, i)` for each adjacent pair in `indices`.
    pub async fn connect_line(self: &Arc<Self>, indices: &[NodeIndex]) -> Result<()> {
        let mut edges = Vec::new();
        for pair in indices.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            edges.push((a, b));
            edges.push((b, a));
        }
        self.connect_graph(edges).await
    }
}
