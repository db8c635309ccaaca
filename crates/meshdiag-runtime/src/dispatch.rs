//! Inbound message dispatcher
//!
//! Routes every inbound diagnostics envelope:
//! - Probe: answer with our local view
//! - Response: resolve the matching pending transaction
//! - Command: hand to the application command handler
//! - Unknown: log and drop
//!
//! The channel is untrusted, so nothing here panics or returns an error
//! to the transport.

use std::sync::Arc;

use serde_json::Value;

use meshdiag_core::{PeerId, StatusReport, TransactionId};
use meshdiag_transport::{InboundMessage, Transport};
use meshdiag_wire::Envelope;

use crate::responder::local_report;
use crate::{Resolution, StatsCounters, TransactionRegistry};

/// Application command collaborator
pub trait CommandHandler: Send + Sync {
    /// Does this handler own `opcode`?
    fn handles(&self, opcode: &str) -> bool;

    /// Handle one command from `from`
    fn handle(&self, from: &PeerId, opcode: &str, cmd_data: Value);
}

/// What the dispatcher did with a message
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Answered a remote probe
    Answered(TransactionId),
    /// Resolved one of our transactions
    Resolved(TransactionId),
    /// Reply with no matching pending transaction
    Stale(TransactionId),
    /// Passed to the command handler
    Delegated,
    /// Malformed, unrecognized or unanswerable; dropped
    Dropped,
}

/// Routes inbound envelopes for one local peer
pub struct Dispatcher<T: Transport> {
    transport: Arc<T>,
    registry: Arc<TransactionRegistry<StatusReport>>,
    handler: Option<Arc<dyn CommandHandler>>,
    channel: String,
    stats: Arc<StatsCounters>,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(
        transport: Arc<T>,
        registry: Arc<TransactionRegistry<StatusReport>>,
        channel: impl Into<String>,
        stats: Arc<StatsCounters>,
    ) -> Self {
        Dispatcher {
            transport,
            registry,
            handler: None,
            channel: channel.into(),
            stats,
        }
    }

    /// Install the application command handler
    pub fn with_command_handler(mut self, handler: Arc<dyn CommandHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Dispatch a message delivered by the transport
    pub fn dispatch_message(&self, msg: &InboundMessage) -> DispatchOutcome {
        if msg.channel != self.channel {
            tracing::warn!(
                from = %msg.from,
                channel = %msg.channel,
                "message on foreign channel dropped"
            );
            self.stats.message_dropped();
            return DispatchOutcome::Dropped;
        }
        self.dispatch(&msg.from, &msg.payload)
    }

    /// Dispatch raw envelope bytes from `from`
    pub fn dispatch(&self, from: &PeerId, payload: &[u8]) -> DispatchOutcome {
        self.dispatch_envelope(from, Envelope::classify(payload))
    }

    /// Dispatch an already classified envelope
    pub fn dispatch_envelope(&self, from: &PeerId, envelope: Envelope) -> DispatchOutcome {
        match envelope {
            Envelope::Probe { id } => self.answer_probe(from, id),
            Envelope::Response { id, report } => self.accept_reply(from, id, report),
            Envelope::Command { opcode, cmd_data } => match &self.handler {
                Some(handler) if handler.handles(&opcode) => {
                    tracing::debug!(from = %from, opcode = %opcode, "delegating command");
                    handler.handle(from, &opcode, cmd_data);
                    self.stats.command_delegated();
                    DispatchOutcome::Delegated
                }
                _ => {
                    tracing::warn!(from = %from, opcode = %opcode, "unrecognized operation dropped");
                    self.stats.message_dropped();
                    DispatchOutcome::Dropped
                }
            },
            Envelope::Unknown { opcode, reason } => {
                tracing::warn!(
                    from = %from,
                    opcode = opcode.as_deref().unwrap_or("<none>"),
                    "malformed envelope dropped: {}",
                    reason
                );
                self.stats.message_dropped();
                DispatchOutcome::Dropped
            }
        }
    }

    fn answer_probe(&self, from: &PeerId, id: TransactionId) -> DispatchOutcome {
        let report = local_report(self.transport.as_ref(), from);
        tracing::debug!(from = %from, id = %id, peers = report.data.len(), "answering probe");

        let payload = match Envelope::response(id, report).encode() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(from = %from, id = %id, "could not encode reply: {}", e);
                self.stats.message_dropped();
                return DispatchOutcome::Dropped;
            }
        };

        if let Err(e) = self.transport.send_message(from, &self.channel, payload) {
            tracing::warn!(to = %from, id = %id, "reply send failed: {}", e);
            self.stats.send_failed();
            return DispatchOutcome::Dropped;
        }

        self.stats.probe_answered();
        DispatchOutcome::Answered(id)
    }

    fn accept_reply(&self, from: &PeerId, id: TransactionId, report: StatusReport) -> DispatchOutcome {
        match self.registry.resolve_from(id, from, report) {
            Resolution::Resolved | Resolution::Abandoned => {
                tracing::debug!(from = %from, id = %id, "reply resolved");
                self.stats.reply_resolved();
                DispatchOutcome::Resolved(id)
            }
            Resolution::Unknown | Resolution::WrongPeer => {
                tracing::warn!(from = %from, id = %id, "stale reply dropped");
                self.stats.stale_reply();
                DispatchOutcome::Stale(id)
            }
        }
    }
}
