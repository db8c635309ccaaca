//! In-process memory mesh
//!
//! Every peer that joins a `MemoryMesh` shares one room. Messages are
//! pushed straight into the target's inbound channel; a full or closed
//! channel loses the message the way a congested network would.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use meshdiag_core::{ConnectionStatus, DiagError, DiagResult, PeerId};

use crate::{InboundMessage, InboundReceiver, InboundSender, Transport};

#[derive(Default)]
struct MeshInner {
    /// Inbound channel per joined peer
    peers: HashMap<PeerId, InboundSender>,
    /// Directed link state overrides (from, to)
    links: HashMap<(PeerId, PeerId), ConnectionStatus>,
    /// Peers whose traffic is silently discarded
    muted: HashSet<PeerId>,
    sent: u64,
    lost: u64,
}

/// Shared in-process room
#[derive(Clone)]
pub struct MemoryMesh {
    inner: Arc<Mutex<MeshInner>>,
    buffer_size: usize,
}

impl MemoryMesh {
    /// Create a mesh whose peers get inbound channels of `buffer_size`
    pub fn new(buffer_size: usize) -> Self {
        MemoryMesh {
            inner: Arc::new(Mutex::new(MeshInner::default())),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Join the room as `id`, returning its transport and inbound channel
    pub fn join(&self, id: impl Into<PeerId>) -> (MemoryTransport, InboundReceiver) {
        let id = id.into();
        let (tx, rx) = mpsc::channel(self.buffer_size);
        self.inner.lock().peers.insert(id.clone(), tx);
        tracing::debug!(peer = %id, "joined memory mesh");

        let transport = MemoryTransport {
            mesh: self.clone(),
            local: id,
        };
        (transport, rx)
    }

    /// Remove `id` from the room; its inbound channel closes
    pub fn leave(&self, id: &PeerId) {
        let mut inner = self.inner.lock();
        inner.peers.remove(id);
        inner.links.retain(|(from, to), _| from != id && to != id);
        inner.muted.remove(id);
    }

    /// Override the status `from` reports toward `to`
    pub fn set_link(&self, from: &PeerId, to: &PeerId, status: ConnectionStatus) {
        self.inner
            .lock()
            .links
            .insert((from.clone(), to.clone()), status);
    }

    /// Override the link status in both directions
    pub fn set_link_symmetric(&self, a: &PeerId, b: &PeerId, status: ConnectionStatus) {
        self.set_link(a, b, status.clone());
        self.set_link(b, a, status);
    }

    /// Silently drop all traffic to and from `id`
    pub fn set_muted(&self, id: &PeerId, muted: bool) {
        let mut inner = self.inner.lock();
        if muted {
            inner.muted.insert(id.clone());
        } else {
            inner.muted.remove(id);
        }
    }

    /// Current members
    pub fn members(&self) -> BTreeSet<PeerId> {
        self.inner.lock().peers.keys().cloned().collect()
    }

    /// Messages handed to an inbound channel
    pub fn sent_count(&self) -> u64 {
        self.inner.lock().sent
    }

    /// Messages discarded (muted peer or full channel)
    pub fn lost_count(&self) -> u64 {
        self.inner.lock().lost
    }

    fn status(&self, from: &PeerId, to: &PeerId) -> ConnectionStatus {
        let inner = self.inner.lock();
        if !inner.peers.contains_key(to) {
            return ConnectionStatus::NotConnected;
        }
        inner
            .links
            .get(&(from.clone(), to.clone()))
            .cloned()
            .unwrap_or(ConnectionStatus::Connected)
    }

    fn deliver(&self, from: &PeerId, to: &PeerId, channel: &str, payload: Bytes) -> DiagResult<()> {
        let mut inner = self.inner.lock();
        let Some(tx) = inner.peers.get(to).cloned() else {
            return Err(DiagError::TransportError(format!("unknown peer {}", to)));
        };

        if inner.muted.contains(from) || inner.muted.contains(to) {
            inner.lost += 1;
            return Ok(());
        }

        let message = InboundMessage::new(from.clone(), channel, payload);
        match tx.try_send(message) {
            Ok(()) => inner.sent += 1,
            Err(e) => {
                inner.lost += 1;
                tracing::warn!(from = %from, to = %to, "memory mesh dropped message: {}", e);
            }
        }
        Ok(())
    }
}

/// One peer's handle onto a `MemoryMesh`
#[derive(Clone)]
pub struct MemoryTransport {
    mesh: MemoryMesh,
    local: PeerId,
}

impl MemoryTransport {
    pub fn mesh(&self) -> &MemoryMesh {
        &self.mesh
    }
}

impl Transport for MemoryTransport {
    fn local_id(&self) -> PeerId {
        self.local.clone()
    }

    fn room_members(&self) -> BTreeSet<PeerId> {
        self.mesh.members()
    }

    fn connection_status(&self, peer: &PeerId) -> ConnectionStatus {
        self.mesh.status(&self.local, peer)
    }

    fn send_message(&self, target: &PeerId, channel: &str, payload: Bytes) -> DiagResult<()> {
        self.mesh.deliver(&self.local, target, channel, payload)
    }
}
