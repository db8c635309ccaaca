//! Chaos transport for mesh diagnostics
//!
//! Wraps any `Transport` and makes sends behave like a hostile network:
//! - Latency and jitter
//! - Message loss
//! - Reordering
//! - Duplication

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use meshdiag_core::{ConnectionStatus, DiagResult, PeerId};
use meshdiag_transport::Transport;

/// Network chaos configuration
#[derive(Clone, Debug, PartialEq)]
pub struct ChaosConfig {
    /// Base latency added to every delivered message
    pub base_latency: Duration,
    /// Upper bound of uniform jitter on top of the base latency
    pub max_jitter: Duration,
    /// Message loss rate (0.0 - 1.0)
    pub loss_rate: f64,
    /// Probability a message is held back behind later ones
    pub reorder_prob: f64,
    /// Extra delay applied to a reordered message
    pub reorder_delay: Duration,
    /// Probability a message is delivered twice
    pub duplicate_prob: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self::none()
    }
}

impl ChaosConfig {
    /// Perfect network; sends pass straight through
    pub fn none() -> Self {
        ChaosConfig {
            base_latency: Duration::ZERO,
            max_jitter: Duration::ZERO,
            loss_rate: 0.0,
            reorder_prob: 0.0,
            reorder_delay: Duration::ZERO,
            duplicate_prob: 0.0,
        }
    }

    /// Good network conditions
    pub fn good() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(20),
            max_jitter: Duration::from_millis(10),
            loss_rate: 0.001,
            reorder_prob: 0.01,
            reorder_delay: Duration::from_millis(30),
            duplicate_prob: 0.001,
        }
    }

    /// Poor network conditions
    pub fn poor() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(100),
            max_jitter: Duration::from_millis(150),
            loss_rate: 0.05,
            reorder_prob: 0.1,
            reorder_delay: Duration::from_millis(200),
            duplicate_prob: 0.02,
        }
    }

    /// Hostile network conditions (2G-class)
    pub fn hostile() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(200),
            max_jitter: Duration::from_millis(400),
            loss_rate: 0.15,
            reorder_prob: 0.2,
            reorder_delay: Duration::from_millis(500),
            duplicate_prob: 0.05,
        }
    }

    /// Lossless, but every message is duplicated and most are reordered
    pub fn scrambled() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(5),
            max_jitter: Duration::from_millis(50),
            loss_rate: 0.0,
            reorder_prob: 0.5,
            reorder_delay: Duration::from_millis(100),
            duplicate_prob: 1.0,
        }
    }

    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_duplicate_prob(mut self, prob: f64) -> Self {
        self.duplicate_prob = prob.clamp(0.0, 1.0);
        self
    }

    fn is_transparent(&self) -> bool {
        self.base_latency.is_zero()
            && self.max_jitter.is_zero()
            && self.loss_rate <= 0.0
            && self.reorder_prob <= 0.0
            && self.duplicate_prob <= 0.0
    }
}

/// Chaos transport statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChaosStats {
    pub messages_sent: u64,
    pub messages_lost: u64,
    pub messages_reordered: u64,
    pub messages_duplicated: u64,
}

impl ChaosStats {
    pub fn loss_rate(&self) -> f64 {
        if self.messages_sent == 0 {
            0.0
        } else {
            self.messages_lost as f64 / self.messages_sent as f64
        }
    }
}

/// `Transport` decorator that injects chaos into every send
pub struct ChaosTransport<T: Transport> {
    inner: Arc<T>,
    config: ChaosConfig,
    rng: Mutex<StdRng>,
    stats: Mutex<ChaosStats>,
}

impl<T: Transport> ChaosTransport<T> {
    /// Wrap `inner`; `seed` makes the chaos reproducible
    pub fn new(inner: T, config: ChaosConfig, seed: u64) -> Self {
        ChaosTransport {
            inner: Arc::new(inner),
            config,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            stats: Mutex::new(ChaosStats::default()),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    pub fn stats(&self) -> ChaosStats {
        self.stats.lock().clone()
    }

    /// Delays for each copy to deliver; empty when the message is lost
    fn plan(&self) -> Vec<Duration> {
        let mut rng = self.rng.lock();
        let mut stats = self.stats.lock();
        stats.messages_sent += 1;

        if rng.gen::<f64>() < self.config.loss_rate {
            stats.messages_lost += 1;
            return Vec::new();
        }

        let copies = if rng.gen::<f64>() < self.config.duplicate_prob {
            stats.messages_duplicated += 1;
            2
        } else {
            1
        };

        let mut delays = Vec::with_capacity(copies);
        for _ in 0..copies {
            let mut delay = self.config.base_latency + jitter(&mut rng, self.config.max_jitter);
            if rng.gen::<f64>() < self.config.reorder_prob {
                stats.messages_reordered += 1;
                delay += self.config.reorder_delay;
            }
            delays.push(delay);
        }
        delays
    }
}

fn jitter(rng: &mut StdRng, max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rng.gen_range(0..=max_ms))
}

impl<T: Transport> Transport for ChaosTransport<T> {
    fn local_id(&self) -> PeerId {
        self.inner.local_id()
    }

    fn room_members(&self) -> BTreeSet<PeerId> {
        self.inner.room_members()
    }

    fn connection_status(&self, peer: &PeerId) -> ConnectionStatus {
        self.inner.connection_status(peer)
    }

    fn send_message(&self, target: &PeerId, channel: &str, payload: Bytes) -> DiagResult<()> {
        if self.config.is_transparent() {
            self.stats.lock().messages_sent += 1;
            return self.inner.send_message(target, channel, payload);
        }

        for delay in self.plan() {
            if delay.is_zero() {
                self.inner.send_message(target, channel, payload.clone())?;
                continue;
            }

            let inner = Arc::clone(&self.inner);
            let target = target.clone();
            let channel = channel.to_owned();
            let payload = payload.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = inner.send_message(&target, &channel, payload) {
                    tracing::debug!(to = %target, "delayed chaos send failed: {}", e);
                }
            });
        }
        Ok(())
    }
}
