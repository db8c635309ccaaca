//! Connection status and diagnostic report types
//!
//! A peer answers a connectivity probe with its local view of the mesh:
//! - ConnectionStatus: state between the answering peer and one other peer
//! - StatusReport: the answering peer's id plus its full status map
//! - RoomReport: aggregate of every report collected in one room probe

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::PeerId;

/// Wire value for an established peer connection
pub const STATUS_CONNECTED: &str = "is connected";
/// Wire value for a connection still negotiating
pub const STATUS_CONNECTING: &str = "connection in progress";
/// Wire value for no connection
pub const STATUS_NOT_CONNECTED: &str = "not connected";

/// State of the link between two peers, as seen by one of them.
///
/// The transport produces this value and the diagnostics layer only
/// relays it. Values outside the three known states are carried through
/// unvalidated in `Other`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    NotConnected,
    Other(String),
}

impl ConnectionStatus {
    /// Parse from the wire string
    pub fn from_wire(s: &str) -> Self {
        match s {
            STATUS_CONNECTED => ConnectionStatus::Connected,
            STATUS_CONNECTING => ConnectionStatus::Connecting,
            STATUS_NOT_CONNECTED => ConnectionStatus::NotConnected,
            other => ConnectionStatus::Other(other.to_owned()),
        }
    }

    /// Convert to the wire string
    pub fn as_wire(&self) -> &str {
        match self {
            ConnectionStatus::Connected => STATUS_CONNECTED,
            ConnectionStatus::Connecting => STATUS_CONNECTING,
            ConnectionStatus::NotConnected => STATUS_NOT_CONNECTED,
            ConnectionStatus::Other(s) => s,
        }
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    /// Is this one of the three recognized states?
    pub fn is_known(&self) -> bool {
        !matches!(self, ConnectionStatus::Other(_))
    }
}

impl From<String> for ConnectionStatus {
    fn from(s: String) -> Self {
        match ConnectionStatus::from_wire(&s) {
            ConnectionStatus::Other(_) => ConnectionStatus::Other(s),
            known => known,
        }
    }
}

impl From<ConnectionStatus> for String {
    fn from(status: ConnectionStatus) -> Self {
        match status {
            ConnectionStatus::Other(s) => s,
            known => known.as_wire().to_owned(),
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Peer id -> status, from one peer's point of view
pub type StatusMap = BTreeMap<PeerId, ConnectionStatus>;

/// One peer's answer to a connectivity probe
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusReport {
    /// Identity of the peer that produced the report
    #[serde(rename = "myPeerId")]
    pub my_peer_id: PeerId,
    /// Its status toward every other room member except the requester
    #[serde(default)]
    pub data: StatusMap,
}

impl StatusReport {
    pub fn new(my_peer_id: PeerId, data: StatusMap) -> Self {
        StatusReport { my_peer_id, data }
    }

    /// Status the reporting peer sees toward `peer`, if reported
    pub fn status_of(&self, peer: &PeerId) -> Option<&ConnectionStatus> {
        self.data.get(peer)
    }

    /// Number of peers in the report that are fully connected
    pub fn connected_count(&self) -> usize {
        self.data.values().filter(|s| s.is_connected()).count()
    }
}

/// Aggregate result of probing every member of a room
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct RoomReport {
    /// Replies keyed by the peer that was probed
    pub replies: BTreeMap<PeerId, StatusReport>,
    /// Peers whose probe expired or was cancelled before a reply arrived
    pub unanswered: BTreeSet<PeerId>,
}

impl RoomReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of replies collected
    pub fn len(&self) -> usize {
        self.replies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty() && self.unanswered.is_empty()
    }

    /// Every probed peer answered
    pub fn is_complete(&self) -> bool {
        self.unanswered.is_empty()
    }

    /// Peers that were probed, answered or not
    pub fn probed(&self) -> impl Iterator<Item = &PeerId> {
        self.replies.keys().chain(self.unanswered.iter())
    }

    /// Pairs (a, b) where `a` reports a link to `b` but `b` does not
    /// report the link back as connected.
    pub fn asymmetric_links(&self) -> Vec<(PeerId, PeerId)> {
        let mut out = Vec::new();
        for (a, report) in &self.replies {
            for (b, status) in &report.data {
                if !status.is_connected() {
                    continue;
                }
                let Some(reverse) = self.replies.get(b) else {
                    continue;
                };
                if !matches!(reverse.status_of(a), Some(s) if s.is_connected()) {
                    out.push((a.clone(), b.clone()));
                }
            }
        }
        out
    }
}
