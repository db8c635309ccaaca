//! Transport collaborator interface

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use meshdiag_core::{ConnectionStatus, DiagResult, PeerId};

/// Best-effort peer messaging channel plus the session's room view.
///
/// Implementations own room membership and per-peer connection state;
/// diagnostics only reads them. `send_message` gives no delivery
/// guarantee: an `Ok` means the message left this process, nothing more.
pub trait Transport: Send + Sync + 'static {
    /// Identity of the local peer
    fn local_id(&self) -> PeerId;

    /// Current room members, including the local peer
    fn room_members(&self) -> BTreeSet<PeerId>;

    /// Local view of the connection toward `peer`
    fn connection_status(&self, peer: &PeerId) -> ConnectionStatus;

    /// Send `payload` to `target` on `channel`
    fn send_message(&self, target: &PeerId, channel: &str, payload: Bytes) -> DiagResult<()>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn local_id(&self) -> PeerId {
        (**self).local_id()
    }

    fn room_members(&self) -> BTreeSet<PeerId> {
        (**self).room_members()
    }

    fn connection_status(&self, peer: &PeerId) -> ConnectionStatus {
        (**self).connection_status(peer)
    }

    fn send_message(&self, target: &PeerId, channel: &str, payload: Bytes) -> DiagResult<()> {
        (**self).send_message(target, channel, payload)
    }
}

/// A message delivered by the transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    /// Sending peer
    pub from: PeerId,
    /// Channel tag the sender used
    pub channel: String,
    /// Raw envelope bytes
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(from: PeerId, channel: impl Into<String>, payload: Bytes) -> Self {
        InboundMessage {
            from,
            channel: channel.into(),
            payload,
        }
    }
}

/// Inbound message receiver channel
pub type InboundReceiver = mpsc::Receiver<InboundMessage>;

/// Inbound message sender channel
pub type InboundSender = mpsc::Sender<InboundMessage>;
