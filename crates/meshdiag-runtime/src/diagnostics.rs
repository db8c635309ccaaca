//! Fan-out aggregator
//!
//! `probe_peer` sends one correlated probe and returns at once; the reply
//! surfaces later through the returned `ProbeHandle`. `probe_room` fans a
//! probe out to every other room member and joins the handles into one
//! `RoomReport`.

use std::collections::BTreeSet;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use meshdiag_core::{
    ConnectionStatus, DiagError, DiagResult, PeerId, RoomReport, StatusReport, TransactionId,
};
use meshdiag_transport::Transport;
use meshdiag_wire::Envelope;

use crate::{DiagnosticsConfig, Outcome, PendingReply, StatsCounters, TransactionRegistry};

/// Boxed future returned by the probe handles
pub type ProbeFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Outward diagnostics API for one local peer
pub struct Diagnostics<T: Transport> {
    transport: Arc<T>,
    registry: Arc<TransactionRegistry<StatusReport>>,
    config: Arc<DiagnosticsConfig>,
    stats: Arc<StatsCounters>,
}

impl<T: Transport> Clone for Diagnostics<T> {
    fn clone(&self) -> Self {
        Diagnostics {
            transport: Arc::clone(&self.transport),
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T: Transport> Diagnostics<T> {
    pub fn new(
        transport: Arc<T>,
        registry: Arc<TransactionRegistry<StatusReport>>,
        config: Arc<DiagnosticsConfig>,
        stats: Arc<StatsCounters>,
    ) -> Self {
        Diagnostics {
            transport,
            registry,
            config,
            stats,
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.transport.local_id()
    }

    /// Current room members, including ourselves
    pub fn room_members(&self) -> BTreeSet<PeerId> {
        self.transport.room_members()
    }

    /// Our own view of the connection toward `peer`
    pub fn connection_status(&self, peer: &PeerId) -> DiagResult<ConnectionStatus> {
        if peer.is_empty() {
            return Err(DiagError::InvalidArgument("peer id is required"));
        }
        Ok(self.transport.connection_status(peer))
    }

    /// Room members a room probe would target
    pub fn targets(&self) -> BTreeSet<PeerId> {
        let local = self.transport.local_id();
        let mut members = self.transport.room_members();
        members.remove(&local);
        members
    }

    /// Send one probe to `peer`.
    ///
    /// Fails synchronously, registering nothing, when `peer` is empty.
    pub fn probe_peer(&self, peer: &PeerId) -> DiagResult<ProbeHandle> {
        if peer.is_empty() {
            return Err(DiagError::InvalidArgument("peer id is required"));
        }

        let (id, reply) = self.registry.open(peer.clone())?;
        let deadline = self.config.probe_timeout.map(|t| Instant::now() + t);

        let sent = Envelope::probe(id)
            .encode()
            .and_then(|payload| self.transport.send_message(peer, &self.config.channel, payload));
        if let Err(e) = sent {
            self.registry.cancel(id);
            self.stats.send_failed();
            tracing::warn!(peer = %peer, id = %id, "probe send failed: {}", e);
            return Err(e);
        }

        self.stats.probe_sent();
        tracing::debug!(peer = %peer, id = %id, pending = self.registry.pending_count(), "probe sent");

        Ok(ProbeHandle {
            id,
            peer: peer.clone(),
            reply,
            deadline,
            settled: false,
            registry: Arc::clone(&self.registry),
            stats: Arc::clone(&self.stats),
        })
    }

    /// Probe every room member except ourselves
    pub fn probe_room(&self) -> RoomProbe {
        let targets = self.targets();
        let mut probes = Vec::with_capacity(targets.len());
        let mut failed = BTreeSet::new();

        for peer in targets {
            match self.probe_peer(&peer) {
                Ok(handle) => probes.push(handle),
                Err(_) => {
                    failed.insert(peer);
                }
            }
        }

        if probes.is_empty() && failed.is_empty() {
            tracing::warn!(
                complete_empty_room = self.config.complete_empty_room,
                "room probe has no targets"
            );
        }

        RoomProbe {
            probes,
            failed,
            complete_empty_room: self.config.complete_empty_room,
        }
    }
}

/// One in-flight probe.
///
/// Dropping the handle before it settles cancels the transaction.
pub struct ProbeHandle {
    id: TransactionId,
    peer: PeerId,
    reply: PendingReply<StatusReport>,
    deadline: Option<Instant>,
    settled: bool,
    registry: Arc<TransactionRegistry<StatusReport>>,
    stats: Arc<StatsCounters>,
}

impl fmt::Debug for ProbeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl ProbeHandle {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Wait for the reply, honoring the deadline if one was configured
    pub async fn wait(mut self) -> DiagResult<StatusReport> {
        let received = match self.deadline {
            None => (&mut self.reply).await,
            Some(deadline) => match tokio::time::timeout_at(deadline, &mut self.reply).await {
                Ok(received) => received,
                Err(_) => {
                    if self.registry.expire(self.id) {
                        self.stats.timed_out(1);
                    }
                    // A reply may have slipped in between the deadline and the expiry
                    match self.reply.try_recv() {
                        Ok(outcome) => Ok(outcome),
                        Err(_) => Ok(Outcome::TimedOut),
                    }
                }
            },
        };
        self.settled = true;

        match received {
            Ok(Outcome::Reply(report)) => Ok(report),
            Ok(Outcome::TimedOut) => Err(DiagError::TimedOut {
                peer: self.peer.clone(),
                id: self.id,
            }),
            Err(_) => Err(DiagError::Cancelled(self.id)),
        }
    }

    /// Invoke `f` with the result once it is known.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_complete<F>(self, f: F) -> JoinHandle<()>
    where
        F: FnOnce(DiagResult<StatusReport>) + Send + 'static,
    {
        tokio::spawn(async move { f(self.wait().await) })
    }
}

impl Drop for ProbeHandle {
    fn drop(&mut self) {
        if !self.settled && self.registry.cancel(self.id) {
            tracing::debug!(peer = %self.peer, id = %self.id, "probe dropped before reply");
        }
    }
}

impl IntoFuture for ProbeHandle {
    type Output = DiagResult<StatusReport>;
    type IntoFuture = ProbeFuture<Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

/// A fan-out probe of the whole room
#[derive(Debug)]
pub struct RoomProbe {
    probes: Vec<ProbeHandle>,
    failed: BTreeSet<PeerId>,
    complete_empty_room: bool,
}

impl RoomProbe {
    /// Number of replies the probe waits for
    pub fn expected(&self) -> usize {
        self.probes.len()
    }

    /// Peers a probe was sent to
    pub fn targets(&self) -> Vec<PeerId> {
        self.probes.iter().map(|p| p.peer.clone()).collect()
    }

    /// Transaction ids in flight, in issue order
    pub fn transaction_ids(&self) -> Vec<TransactionId> {
        self.probes.iter().map(|p| p.id).collect()
    }

    /// Join every probe into one report.
    ///
    /// Completes only after every probe has either been answered or
    /// expired. Dropping the future cancels every outstanding probe. With nobody to probe it never completes unless the
    /// runtime is configured to complete empty rooms.
    pub async fn wait(self) -> RoomReport {
        let RoomProbe {
            probes,
            failed,
            complete_empty_room,
        } = self;

        if probes.is_empty() && failed.is_empty() && !complete_empty_room {
            std::future::pending::<()>().await;
        }

        let mut report = RoomReport::new();
        report.unanswered = failed;

        // Wait on every probe at once so each expires at its own deadline
        let results = join_all(probes.into_iter().map(|probe| {
            let peer = probe.peer.clone();
            async move { (peer, probe.wait().await) }
        }))
        .await;

        for (peer, result) in results {
            match result {
                Ok(reply) => {
                    report.replies.insert(peer, reply);
                }
                Err(e) => {
                    tracing::debug!(peer = %peer, "no reply in room probe: {}", e);
                    report.unanswered.insert(peer);
                }
            }
        }

        tracing::debug!(
            replies = report.replies.len(),
            unanswered = report.unanswered.len(),
            "room probe complete"
        );
        report
    }

    /// Invoke `f` exactly once with the joined report.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_complete<F>(self, f: F) -> JoinHandle<()>
    where
        F: FnOnce(RoomReport) + Send + 'static,
    {
        tokio::spawn(async move { f(self.wait().await) })
    }
}

impl IntoFuture for RoomProbe {
    type Output = RoomReport;
    type IntoFuture = ProbeFuture<Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}
