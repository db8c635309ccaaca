//! Diagnostics counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the runtime counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiagnosticsStats {
    /// Probes we sent
    pub probes_sent: u64,
    /// Probes from other peers we answered
    pub probes_answered: u64,
    /// Replies matched to one of our pending transactions
    pub replies_resolved: u64,
    /// Replies with no pending transaction (duplicate, late, forged)
    pub stale_replies: u64,
    /// Application commands handed to the command handler
    pub commands_delegated: u64,
    /// Inbound messages dropped as malformed or unrecognized
    pub messages_dropped: u64,
    /// Transactions that expired without a reply
    pub timeouts: u64,
    /// Sends the transport refused
    pub send_failures: u64,
    /// Transactions currently pending
    pub pending: usize,
}

/// Shared live counters
#[derive(Debug, Default)]
pub struct StatsCounters {
    probes_sent: AtomicU64,
    probes_answered: AtomicU64,
    replies_resolved: AtomicU64,
    stale_replies: AtomicU64,
    commands_delegated: AtomicU64,
    messages_dropped: AtomicU64,
    timeouts: AtomicU64,
    send_failures: AtomicU64,
}

impl StatsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn probe_sent(&self) {
        self.probes_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn probe_answered(&self) {
        self.probes_answered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reply_resolved(&self) {
        self.replies_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stale_reply(&self) {
        self.stale_replies.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn command_delegated(&self) {
        self.commands_delegated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn timed_out(&self, n: u64) {
        self.timeouts.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn send_failed(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot; `pending` is filled in by the owner of the registry
    pub fn snapshot(&self) -> DiagnosticsStats {
        DiagnosticsStats {
            probes_sent: self.probes_sent.load(Ordering::Relaxed),
            probes_answered: self.probes_answered.load(Ordering::Relaxed),
            replies_resolved: self.replies_resolved.load(Ordering::Relaxed),
            stale_replies: self.stale_replies.load(Ordering::Relaxed),
            commands_delegated: self.commands_delegated.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            pending: 0,
        }
    }
}
