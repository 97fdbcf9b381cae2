//! The sender-side and receiver-side handlers (spec §4.3–§4.4): the two
//! transport callbacks that cooperate to relay one directed edge's bytes,
//! and the frame scanner invocation that sits between them.

use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant as TokioInstant;

use crate::async_runtime as rt;
use crate::communication::frame;
use crate::communication::socket::Socket;
use crate::communication::DirectedEdge;

use super::{EdgeState, Hub, SharedWriteHalf};

// bytes read from a socket in one `read()` call before being appended to
// the handler's ReceiveBuffer and re-scanned for complete frames.
const READ_CHUNK: usize = 16 * 1024;

impl Hub {
    /// Runs when a sender node's TCP connection to a proxy listener is
    /// accepted: learns which edge it belongs to from the `PendingConnect`
    /// slot (safe to read synchronously here because `connect()` serializes
    /// all connect attempts and only clears the slot once both transports
    /// are registered), registers the sender-side transport, and spawns the
    /// read loop that relays bytes toward the receiver.
    pub(super) async fn handle_sender_accept(self: Arc<Self>, socket: Socket) {
        let edge = {
            let state = self.state.lock();
            match state.pending {
                Some(edge) => edge,
                None => {
                    log::warn!("hub: sender connected with no pending edge, dropping it");
                    return;
                }
            }
        };

        let _ = socket.set_nodelay(true);
        let (read, write) = socket.into_split();
        let write: SharedWriteHalf = Arc::new(AsyncMutex::new(write));

        {
            let mut state = self.state.lock();
            let Some(entry) = state.edges.get_mut(&edge) else {
                log::warn!("hub: edge {:?} vanished before sender registration", edge);
                return;
            };
            entry.sender_write = Some(write);
        }
        self.edge_notify.notify_waiters();

        let hub = self.clone();
        let task = rt::spawn(hub.sender_relay_loop(edge, read));

        let mut state = self.state.lock();
        if let Some(entry) = state.edges.get_mut(&edge) {
            entry.sender_task = Some(task);
        } else {
            task.abort();
        }
    }

    /// Opens the hub's own outbound connection to the real receiver node,
    /// registering the receiver-side transport and spawning the read loop
    /// that relays bytes back toward the sender.
    pub(super) async fn dial_receiver(self: Arc<Self>, edge: DirectedEdge) {
        let addr = self.node_addr(edge.inn());
        let socket = match crate::communication::socket::connect(addr).await {
            Ok(socket) => socket,
            Err(e) => {
                log::warn!(
                    "hub: failed to dial receiver node {} for edge {} -> {}: {}",
                    u32::from(edge.inn()),
                    u32::from(edge.out()),
                    u32::from(edge.inn()),
                    e
                );
                return;
            }
        };

        let _ = socket.set_nodelay(true);
        let (read, write) = socket.into_split();
        let write: SharedWriteHalf = Arc::new(AsyncMutex::new(write));

        {
            let mut state = self.state.lock();
            let Some(entry) = state.edges.get_mut(&edge) else {
                log::warn!("hub: edge {:?} vanished before receiver registration", edge);
                return;
            };
            entry.receiver_write = Some(write);
        }
        self.edge_notify.notify_waiters();

        let hub = self.clone();
        let task = rt::spawn(hub.receiver_relay_loop(edge, read));

        let mut state = self.state.lock();
        if let Some(entry) = state.edges.get_mut(&edge) {
            entry.receiver_task = Some(task);
        } else {
            task.abort();
        }
    }

    /// Relays bytes arriving from sender `edge.out()` toward receiver
    /// `edge.inn()`, delayed per the `edge` entry in the delay table.
    async fn sender_relay_loop(self: Arc<Self>, edge: DirectedEdge, mut read: OwnedReadHalf) {
        self.relay_loop(
            edge,
            edge,
            &mut read,
            |e| e.receiver_write.clone(),
            |e| e.sender_deadline.clone(),
        )
        .await;
        self.disconnect(edge.out(), edge.inn());
    }

    /// Relays bytes arriving from receiver `edge.inn()` back toward sender
    /// `edge.out()`, delayed per the *reverse* edge `(in, out)` (spec §4.4).
    async fn receiver_relay_loop(self: Arc<Self>, edge: DirectedEdge, mut read: OwnedReadHalf) {
        self.relay_loop(
            edge,
            edge.reversed(),
            &mut read,
            |e| e.sender_write.clone(),
            |e| e.receiver_deadline.clone(),
        )
        .await;
        self.disconnect(edge.out(), edge.inn());
    }

    /// Shared read/scan/delay/write loop for both handler directions.
    ///
    /// `edge` identifies which `EdgeState` entry to look at; `delay_edge`
    /// identifies which delay-table entry applies to this direction;
    /// `peer_write_of` picks the write half bytes should be relayed *into*
    /// (the opposite transport from the one `read` belongs to);
    /// `deadline_of` picks this direction's own deadline tracker, so
    /// concurrent bursts on the same direction cannot be reordered by
    /// their sleeps (spec §9).
    async fn relay_loop(
        self: &Arc<Self>,
        edge: DirectedEdge,
        delay_edge: DirectedEdge,
        read: &mut OwnedReadHalf,
        peer_write_of: impl Fn(&EdgeState) -> Option<SharedWriteHalf>,
        deadline_of: impl Fn(&EdgeState) -> Arc<SyncMutex<TokioInstant>>,
    ) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            let n = match read.read(&mut chunk).await {
                Ok(0) => return,
                Ok(n) => n,
                Err(e) => {
                    log::debug!("hub: transport error on edge {:?}: {}", edge, e);
                    return;
                }
            };
            buf.extend_from_slice(&chunk[..n]);

            // wait until the other half of this edge is registered; see
            // spec §4.3/§4.4 ("waits until receiver_side[edge] exists").
            let peer_write = loop {
                let notified = self.edge_notify.notified();
                let peer_write = {
                    let state = self.state.lock();
                    state.edges.get(&edge).and_then(&peer_write_of)
                };
                if let Some(write) = peer_write {
                    break write;
                }
                notified.await;
            };

            let delay = {
                let state = self.state.lock();
                state.delays.get(&delay_edge).copied()
            };

            if let Some(delay) = delay {
                let deadline = {
                    let state = self.state.lock();
                    match state.edges.get(&edge) {
                        Some(entry) => deadline_of(entry),
                        None => return,
                    }
                };
                let wake = {
                    let mut deadline = deadline.lock();
                    let now = TokioInstant::now();
                    let wake = std::cmp::max(now, *deadline) + delay;
                    *deadline = wake;
                    wake
                };
                tokio::time::sleep_until(wake).await;
            }

            let frames = match frame::scan_and_rewrite(&mut buf, &self.ports, |n| self.proxy_port(n)) {
                Ok(frames) => frames,
                Err(e) => {
                    log::warn!("hub: rewriter error on edge {:?}, tearing it down: {}", edge, e);
                    return;
                }
            };

            let mut writer = peer_write.lock().await;
            for rewritten in frames {
                if let Err(e) = writer.write_all(&rewritten).await {
                    log::debug!("hub: write error relaying edge {:?}: {}", edge, e);
                    return;
                }
            }
        }
    }
}
