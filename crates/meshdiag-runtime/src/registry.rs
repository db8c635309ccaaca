//! Transaction registry
//!
//! Maps transaction ids to the one-shot completion of the probe that
//! created them. This is the only shared mutable state in the runtime;
//! every access goes through one lock, and completions are delivered
//! after the lock is released.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use meshdiag_core::{DiagError, DiagResult, PeerId, TransactionId};

/// What a pending transaction eventually receives
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The peer answered
    Reply(T),
    /// The transaction was expired before an answer arrived
    TimedOut,
}

/// Sending half of a transaction's completion
pub type Completion<T> = oneshot::Sender<Outcome<T>>;

/// Receiving half of a transaction's completion
pub type PendingReply<T> = oneshot::Receiver<Outcome<T>>;

/// Result of feeding a reply into the registry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Completion delivered, entry removed
    Resolved,
    /// Entry removed, but nobody was waiting any more
    Abandoned,
    /// No such pending transaction (never registered, already resolved, expired)
    Unknown,
    /// Transaction is pending for a different peer; left untouched
    WrongPeer,
}

impl Resolution {
    /// Did this resolution consume the transaction?
    pub fn consumed(self) -> bool {
        matches!(self, Resolution::Resolved | Resolution::Abandoned)
    }
}

/// Observability snapshot of one pending transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingInfo {
    pub id: TransactionId,
    pub peer: PeerId,
    pub age: Duration,
}

struct PendingEntry<T> {
    peer: PeerId,
    completion: Completion<T>,
    registered_at: Instant,
}

struct RegistryInner<T> {
    /// Next id to hand out
    next_id: u64,
    /// Allocated by `allocate` but not yet registered
    reserved: HashSet<TransactionId>,
    pending: HashMap<TransactionId, PendingEntry<T>>,
}

impl<T> RegistryInner<T> {
    fn insert(&mut self, id: TransactionId, peer: PeerId, completion: Completion<T>) {
        self.pending.insert(
            id,
            PendingEntry {
                peer,
                completion,
                registered_at: Instant::now(),
            },
        );
    }
}

/// Owned transaction registry
pub struct TransactionRegistry<T> {
    inner: Mutex<RegistryInner<T>>,
    max_pending: usize,
}

impl<T> TransactionRegistry<T> {
    /// Create a registry holding at most `max_pending` transactions
    pub fn new(max_pending: usize) -> Self {
        TransactionRegistry {
            inner: Mutex::new(RegistryInner {
                next_id: 1,
                reserved: HashSet::new(),
                pending: HashMap::new(),
            }),
            max_pending,
        }
    }

    /// Allocate a fresh id, strictly greater than every earlier one
    pub fn allocate(&self) -> TransactionId {
        let mut inner = self.inner.lock();
        let id = TransactionId::new(inner.next_id);
        inner.next_id += 1;
        inner.reserved.insert(id);
        id
    }

    /// Store `completion` under `id` for a probe sent to `peer`.
    ///
    /// `id` must come from `allocate` and must never have been registered
    /// before; an id is usable exactly once, even after it resolves.
    pub fn register(&self, id: TransactionId, peer: PeerId, completion: Completion<T>) -> DiagResult<()> {
        let mut inner = self.inner.lock();

        if id.get() == 0 || id.get() >= inner.next_id {
            return Err(DiagError::UnallocatedTransaction(id));
        }
        if !inner.reserved.contains(&id) {
            return Err(DiagError::DuplicateTransaction(id));
        }
        if inner.pending.len() >= self.max_pending {
            return Err(DiagError::RegistryFull {
                limit: self.max_pending,
            });
        }

        inner.reserved.remove(&id);
        inner.insert(id, peer, completion);
        Ok(())
    }

    /// Allocate and register in one step
    pub fn open(&self, peer: PeerId) -> DiagResult<(TransactionId, PendingReply<T>)> {
        let mut inner = self.inner.lock();
        if inner.pending.len() >= self.max_pending {
            return Err(DiagError::RegistryFull {
                limit: self.max_pending,
            });
        }

        let id = TransactionId::new(inner.next_id);
        inner.next_id += 1;
        let (tx, rx) = oneshot::channel();
        inner.insert(id, peer, tx);
        Ok((id, rx))
    }

    /// Deliver `payload` to the transaction `id`, whoever sent it
    pub fn resolve(&self, id: TransactionId, payload: T) -> Resolution {
        self.resolve_inner(id, None, payload)
    }

    /// Deliver `payload` only if `id` was issued to `from`
    pub fn resolve_from(&self, id: TransactionId, from: &PeerId, payload: T) -> Resolution {
        self.resolve_inner(id, Some(from), payload)
    }

    fn resolve_inner(&self, id: TransactionId, from: Option<&PeerId>, payload: T) -> Resolution {
        let entry = {
            let mut inner = self.inner.lock();
            let Some(pending) = inner.pending.get(&id) else {
                tracing::debug!(id = %id, "reply for unknown transaction");
                return Resolution::Unknown;
            };
            if let Some(from) = from {
                if *from != pending.peer {
                    tracing::warn!(
                        id = %id,
                        from = %from,
                        expected = %pending.peer,
                        "reply for transaction from wrong peer"
                    );
                    return Resolution::WrongPeer;
                }
            }
            inner.pending.remove(&id)
        };

        let Some(entry) = entry else {
            return Resolution::Unknown;
        };

        match entry.completion.send(Outcome::Reply(payload)) {
            Ok(()) => Resolution::Resolved,
            Err(_) => {
                tracing::debug!(id = %id, peer = %entry.peer, "transaction waiter went away");
                Resolution::Abandoned
            }
        }
    }

    /// Remove `id`, completing it as timed out. Returns false if it was
    /// not pending.
    pub fn expire(&self, id: TransactionId) -> bool {
        let entry = self.inner.lock().pending.remove(&id);
        match entry {
            Some(entry) => {
                tracing::warn!(id = %id, peer = %entry.peer, "transaction expired");
                let _ = entry.completion.send(Outcome::TimedOut);
                true
            }
            None => false,
        }
    }

    /// Expire every transaction pending for at least `max_age`
    pub fn expire_older_than(&self, max_age: Duration) -> Vec<TransactionId> {
        let now = Instant::now();
        let expired: Vec<(TransactionId, PendingEntry<T>)> = {
            let mut inner = self.inner.lock();
            let ids: Vec<TransactionId> = inner
                .pending
                .iter()
                .filter(|(_, e)| now.duration_since(e.registered_at) >= max_age)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| inner.pending.remove(&id).map(|e| (id, e)))
                .collect()
        };

        let mut ids = Vec::with_capacity(expired.len());
        for (id, entry) in expired {
            tracing::warn!(id = %id, peer = %entry.peer, "stale transaction expired");
            let _ = entry.completion.send(Outcome::TimedOut);
            ids.push(id);
        }
        ids.sort();
        ids
    }

    /// Drop `id` without completing it; its waiter observes cancellation
    pub fn cancel(&self, id: TransactionId) -> bool {
        self.inner.lock().pending.remove(&id).is_some()
    }

    /// Drop every pending transaction
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.inner.lock().pending.drain().collect();
        drained.len()
    }

    pub fn is_pending(&self, id: TransactionId) -> bool {
        self.inner.lock().pending.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Snapshot of all pending transactions, oldest first
    pub fn pending(&self) -> Vec<PendingInfo> {
        let now = Instant::now();
        let inner = self.inner.lock();
        let mut out: Vec<PendingInfo> = inner
            .pending
            .iter()
            .map(|(id, e)| PendingInfo {
                id: *id,
                peer: e.peer.clone(),
                age: now.duration_since(e.registered_at),
            })
            .collect();
        out.sort_by_key(|p| p.id);
        out
    }

    /// Age of the oldest pending transaction
    pub fn oldest_pending_age(&self) -> Option<Duration> {
        let now = Instant::now();
        self.inner
            .lock()
            .pending
            .values()
            .map(|e| now.duration_since(e.registered_at))
            .max()
    }

    pub fn max_pending(&self) -> usize {
        self.max_pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn peer(s: &str) -> PeerId {
        PeerId::new(s)
    }

    #[test]
    fn test_allocate_strictly_increasing() {
        let registry: TransactionRegistry<u32> = TransactionRegistry::new(16);
        let a = registry.allocate();
        let b = registry.allocate();
        let c = registry.allocate();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_resolve_delivers_once() {
        let registry = TransactionRegistry::new(16);
        let (id, mut rx) = registry.open(peer("b")).unwrap();

        assert_eq!(registry.resolve(id, 7u32), Resolution::Resolved);
        assert_eq!(rx.try_recv().unwrap(), Outcome::Reply(7));

        // Duplicate reply is a no-op
        assert_eq!(registry.resolve(id, 8u32), Resolution::Unknown);
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_unknown_resolve_leaves_others_untouched() {
        let registry = TransactionRegistry::new(16);
        let (id, mut rx) = registry.open(peer("b")).unwrap();

        assert_eq!(
            registry.resolve(TransactionId::new(999), 1u32),
            Resolution::Unknown
        );
        assert!(registry.is_pending(id));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_register_rejects_duplicates_and_unallocated() {
        let registry: TransactionRegistry<u32> = TransactionRegistry::new(16);
        let id = registry.allocate();

        let (tx1, _rx1) = oneshot::channel();
        registry.register(id, peer("b"), tx1).unwrap();

        let (tx2, _rx2) = oneshot::channel();
        assert_eq!(
            registry.register(id, peer("b"), tx2),
            Err(DiagError::DuplicateTransaction(id))
        );

        let (tx3, _rx3) = oneshot::channel();
        let future_id = TransactionId::new(id.get() + 100);
        assert_eq!(
            registry.register(future_id, peer("b"), tx3),
            Err(DiagError::UnallocatedTransaction(future_id))
        );
    }

    #[test]
    fn test_finished_id_cannot_be_registered_again() {
        let registry: TransactionRegistry<u32> = TransactionRegistry::new(16);
        let (resolved, _rx) = registry.open(peer("b")).unwrap();
        assert_eq!(registry.resolve(resolved, 1), Resolution::Resolved);

        let (tx, mut rx2) = oneshot::channel();
        assert_eq!(
            registry.register(resolved, peer("b"), tx),
            Err(DiagError::DuplicateTransaction(resolved))
        );

        // A late duplicate of the old reply finds nothing to complete
        assert_eq!(registry.resolve(resolved, 99), Resolution::Unknown);
        assert!(rx2.try_recv().is_err());

        let (expired, _rx3) = registry.open(peer("c")).unwrap();
        assert!(registry.expire(expired));
        let (tx, _rx4) = oneshot::channel();
        assert_eq!(
            registry.register(expired, peer("c"), tx),
            Err(DiagError::DuplicateTransaction(expired))
        );
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_reserved_ids_register_in_any_order() {
        let registry: TransactionRegistry<u32> = TransactionRegistry::new(16);
        let first = registry.allocate();
        let second = registry.allocate();

        let (tx2, _rx2) = oneshot::channel();
        registry.register(second, peer("c"), tx2).unwrap();
        let (tx1, _rx1) = oneshot::channel();
        registry.register(first, peer("b"), tx1).unwrap();
        assert_eq!(registry.pending_count(), 2);
    }

    #[test]
    fn test_registry_capacity() {
        let registry: TransactionRegistry<u32> = TransactionRegistry::new(2);
        let _a = registry.open(peer("a")).unwrap();
        let _b = registry.open(peer("b")).unwrap();
        assert_eq!(
            registry.open(peer("c")).unwrap_err(),
            DiagError::RegistryFull { limit: 2 }
        );
    }

    #[test]
    fn test_out_of_order_resolution() {
        let registry = TransactionRegistry::new(16);
        let (first, mut rx1) = registry.open(peer("b")).unwrap();
        let (second, mut rx2) = registry.open(peer("c")).unwrap();

        assert!(registry.resolve(second, "two").consumed());
        assert!(registry.resolve(first, "one").consumed());

        assert_eq!(rx1.try_recv().unwrap(), Outcome::Reply("one"));
        assert_eq!(rx2.try_recv().unwrap(), Outcome::Reply("two"));
    }

    #[test]
    fn test_wrong_peer_is_rejected() {
        let registry = TransactionRegistry::new(16);
        let (id, mut rx) = registry.open(peer("b")).unwrap();

        assert_eq!(
            registry.resolve_from(id, &peer("mallory"), 1u32),
            Resolution::WrongPeer
        );
        assert!(registry.is_pending(id));

        assert_eq!(
            registry.resolve_from(id, &peer("b"), 2u32),
            Resolution::Resolved
        );
        assert_eq!(rx.try_recv().unwrap(), Outcome::Reply(2));
    }

    #[test]
    fn test_abandoned_waiter() {
        let registry = TransactionRegistry::new(16);
        let (id, rx) = registry.open(peer("b")).unwrap();
        drop(rx);
        assert_eq!(registry.resolve(id, 1u32), Resolution::Abandoned);
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_expire_sends_timed_out() {
        let registry: TransactionRegistry<u32> = TransactionRegistry::new(16);
        let (id, mut rx) = registry.open(peer("b")).unwrap();

        assert!(registry.expire(id));
        assert_eq!(rx.try_recv().unwrap(), Outcome::TimedOut);
        assert!(!registry.expire(id));
        assert_eq!(registry.resolve(id, 1), Resolution::Unknown);
    }

    #[test]
    fn test_cancel_closes_waiter() {
        let registry: TransactionRegistry<u32> = TransactionRegistry::new(16);
        let (id, mut rx) = registry.open(peer("b")).unwrap();
        let (_id2, _rx2) = registry.open(peer("c")).unwrap();

        assert!(registry.cancel(id));
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        assert_eq!(registry.cancel_all(), 1);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_older_than() {
        let registry: TransactionRegistry<u32> = TransactionRegistry::new(16);
        let (old, mut old_rx) = registry.open(peer("b")).unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        let (fresh, _fresh_rx) = registry.open(peer("c")).unwrap();

        assert_eq!(
            registry.oldest_pending_age(),
            Some(Duration::from_secs(30))
        );

        let expired = registry.expire_older_than(Duration::from_secs(10));
        assert_eq!(expired, vec![old]);
        assert_eq!(old_rx.try_recv().unwrap(), Outcome::TimedOut);

        let pending = registry.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, fresh);
        assert_eq!(pending[0].peer, peer("c"));
    }

    proptest! {
        #[test]
        fn ids_never_repeat(n in 1usize..500) {
            let registry: TransactionRegistry<()> = TransactionRegistry::new(1);
            let mut last = TransactionId::ZERO;
            for _ in 0..n {
                let id = registry.allocate();
                prop_assert!(id > last);
                last = id;
            }
        }

        #[test]
        fn each_transaction_resolves_at_most_once(
            resolves in proptest::collection::vec(0usize..8, 0..64)
        ) {
            let registry = TransactionRegistry::new(16);
            let mut handles = Vec::new();
            for i in 0..8 {
                handles.push(registry.open(PeerId::new(format!("p{}", i))).unwrap());
            }

            let mut consumed = [0u32; 8];
            for idx in resolves {
                let (id, _) = &handles[idx];
                if registry.resolve(*id, idx).consumed() {
                    consumed[idx] += 1;
                }
            }

            for (idx, (_, rx)) in handles.iter_mut().enumerate() {
                prop_assert!(consumed[idx] <= 1);
                match rx.try_recv() {
                    Ok(Outcome::Reply(v)) => {
                        prop_assert_eq!(v, idx);
                        prop_assert_eq!(consumed[idx], 1);
                    }
                    _ => prop_assert_eq!(consumed[idx], 0),
                }
            }
        }
    }
}
