//! Diagnostics node - wires the registry, dispatcher and aggregator
//! around one transport and drives the inbound loop

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use meshdiag_core::{DiagError, DiagResult, StatusReport};
use meshdiag_transport::{InboundReceiver, Transport};

use crate::{
    CommandHandler, Diagnostics, DiagnosticsConfig, DiagnosticsStats, Dispatcher, PendingInfo,
    StatsCounters, TransactionRegistry,
};

/// One local peer's diagnostics runtime
pub struct DiagnosticsNode<T: Transport> {
    transport: Arc<T>,
    config: Arc<DiagnosticsConfig>,
    registry: Arc<TransactionRegistry<StatusReport>>,
    stats: Arc<StatsCounters>,
    dispatcher: Arc<Dispatcher<T>>,
    diagnostics: Diagnostics<T>,
}

impl<T: Transport> DiagnosticsNode<T> {
    pub fn new(transport: T, config: DiagnosticsConfig) -> DiagResult<Self> {
        if config.channel.is_empty() {
            return Err(DiagError::InvalidConfig {
                key: "channel",
                reason: "empty channel".into(),
            });
        }
        if config.max_pending == 0 {
            return Err(DiagError::InvalidConfig {
                key: "max_pending",
                reason: "must be at least 1".into(),
            });
        }
        if config.sweep_interval.is_some_and(|period| period.is_zero()) {
            return Err(DiagError::InvalidConfig {
                key: "sweep_interval",
                reason: "must be non-zero".into(),
            });
        }

        let transport = Arc::new(transport);
        let config = Arc::new(config);
        let registry = Arc::new(TransactionRegistry::new(config.max_pending));
        let stats = Arc::new(StatsCounters::new());

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&transport),
            Arc::clone(&registry),
            config.channel.clone(),
            Arc::clone(&stats),
        ));
        let diagnostics = Diagnostics::new(
            Arc::clone(&transport),
            Arc::clone(&registry),
            Arc::clone(&config),
            Arc::clone(&stats),
        );

        Ok(DiagnosticsNode {
            transport,
            config,
            registry,
            stats,
            dispatcher,
            diagnostics,
        })
    }

    /// Install the application command handler
    pub fn with_command_handler(mut self, handler: Arc<dyn CommandHandler>) -> Self {
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.registry),
            self.config.channel.clone(),
            Arc::clone(&self.stats),
        )
        .with_command_handler(handler);
        self.dispatcher = Arc::new(dispatcher);
        self
    }

    /// Outward probe API
    pub fn diagnostics(&self) -> &Diagnostics<T> {
        &self.diagnostics
    }

    pub fn dispatcher(&self) -> &Dispatcher<T> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &TransactionRegistry<StatusReport> {
        &self.registry
    }

    pub fn config(&self) -> &DiagnosticsConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Counter snapshot including the current pending count
    pub fn stats(&self) -> DiagnosticsStats {
        let mut stats = self.stats.snapshot();
        stats.pending = self.registry.pending_count();
        stats
    }

    /// Pending transactions, oldest id first
    pub fn pending(&self) -> Vec<PendingInfo> {
        self.registry.pending()
    }

    /// Start the inbound loop (and the reaper, if configured).
    ///
    /// Inbound messages are dispatched one at a time in arrival order.
    pub fn spawn(&self, mut inbound: InboundReceiver) -> NodeHandle {
        let local = self.transport.local_id();
        let dispatcher = Arc::clone(&self.dispatcher);
        let inbound_local = local.clone();
        let inbound_task = tokio::spawn(async move {
            tracing::info!(peer = %inbound_local, channel = dispatcher.channel(), "diagnostics node started");
            while let Some(msg) = inbound.recv().await {
                let outcome = dispatcher.dispatch_message(&msg);
                tracing::trace!(peer = %inbound_local, from = %msg.from, ?outcome, "dispatched");
            }
            tracing::info!(peer = %inbound_local, "inbound channel closed");
        });

        let reaper_task = self.config.sweep_interval.map(|period| {
            let registry = Arc::clone(&self.registry);
            let stats = Arc::clone(&self.stats);
            let stale_after = self.config.stale_after;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let expired = registry.expire_older_than(stale_after);
                    if !expired.is_empty() {
                        stats.timed_out(expired.len() as u64);
                        tracing::info!(
                            peer = %local,
                            expired = expired.len(),
                            pending = registry.pending_count(),
                            "reaper swept stale transactions"
                        );
                    }
                }
            })
        });

        NodeHandle {
            inbound: inbound_task,
            reaper: reaper_task,
            registry: Arc::clone(&self.registry),
        }
    }
}

/// Running tasks of a spawned node
pub struct NodeHandle {
    inbound: JoinHandle<()>,
    reaper: Option<JoinHandle<()>>,
    registry: Arc<TransactionRegistry<StatusReport>>,
}

impl NodeHandle {
    /// Has the inbound loop exited (channel closed or aborted)?
    pub fn is_finished(&self) -> bool {
        self.inbound.is_finished()
    }

    /// Stop both tasks and cancel every pending transaction.
    ///
    /// Returns the number of transactions cancelled; their waiters
    /// observe `DiagError::Cancelled`.
    pub fn shutdown(self) -> usize {
        self.inbound.abort();
        if let Some(reaper) = self.reaper {
            reaper.abort();
        }
        let cancelled = self.registry.cancel_all();
        tracing::info!(cancelled, "diagnostics node stopped");
        cancelled
    }
}
