//! End-to-end diagnostics scenarios over a `MeshHarness`

use std::collections::BTreeSet;
use std::time::Duration;

use meshdiag_core::{PeerId, RoomReport};
use meshdiag_runtime::DiagnosticsStats;
use meshdiag_transport::Transport;

use crate::harness::MeshHarness;

// ============================================================================
// SCENARIO RESULTS
// ============================================================================

/// Outcome of one room probe issued from one node
#[derive(Clone, Debug)]
pub struct RoomProbeResult {
    /// Node the probe was issued from
    pub origin: PeerId,
    /// Number of peers targeted
    pub expected: usize,
    /// Joined report
    pub report: RoomReport,
    /// Origin node counters after the probe completed
    pub stats: DiagnosticsStats,
    /// Invariant violations found in the report
    pub violations: Vec<String>,
}

impl RoomProbeResult {
    /// Every targeted peer is accounted for and no invariant was broken
    pub fn passed(&self) -> bool {
        self.violations.is_empty() && self.report.probed().count() == self.expected
    }

    pub fn answered(&self) -> usize {
        self.report.len()
    }
}

/// Probe the room from `origin` and check the report against the room.
///
/// Returns `None` if `origin` is not in the harness or the probe did
/// not complete within `limit`.
pub async fn run_room_probe(
    harness: &MeshHarness,
    origin: &PeerId,
    limit: Duration,
) -> Option<RoomProbeResult> {
    let node = harness.node(origin)?;
    let room = node.diagnostics().probe_room();
    let expected = room.expected();

    let report = tokio::time::timeout(limit, room.wait()).await.ok()?;
    let violations = check_report(origin, &node.transport().room_members(), &report);

    Some(RoomProbeResult {
        origin: origin.clone(),
        expected,
        report,
        stats: node.stats(),
        violations,
    })
}

/// Structural checks every room report must pass
pub fn check_report(
    origin: &PeerId,
    members: &BTreeSet<PeerId>,
    report: &RoomReport,
) -> Vec<String> {
    let mut violations = Vec::new();

    if report.replies.contains_key(origin) || report.unanswered.contains(origin) {
        violations.push(format!("{} probed itself", origin));
    }

    for (peer, reply) in &report.replies {
        if report.unanswered.contains(peer) {
            violations.push(format!("{} both answered and unanswered", peer));
        }
        if &reply.my_peer_id != peer {
            violations.push(format!("reply for {} came from {}", peer, reply.my_peer_id));
        }
        if reply.data.contains_key(peer) {
            violations.push(format!("{} reported on itself", peer));
        }
        if reply.data.contains_key(origin) {
            violations.push(format!("{} reported on the requester {}", peer, origin));
        }
        for listed in reply.data.keys() {
            if !members.contains(listed) {
                violations.push(format!("{} reported non-member {}", peer, listed));
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use meshdiag_core::{ConnectionStatus, StatusMap, StatusReport};
    use meshdiag_runtime::{DispatchOutcome, DiagnosticsConfig};
    use meshdiag_wire::Envelope;
    use tokio::sync::oneshot;

    use crate::chaos::ChaosConfig;
    use crate::harness::HarnessConfig;

    const LIMIT: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_room_probe_collects_every_peer() {
        let harness = MeshHarness::new(HarnessConfig::standard()).unwrap();
        for origin in harness.peer_ids() {
            let result = run_room_probe(&harness, &origin, LIMIT).await.unwrap();
            assert!(result.passed(), "{:?}", result.violations);
            assert_eq!(result.expected, 3);
            assert_eq!(result.answered(), 3);
            assert_eq!(result.stats.pending, 0);
        }
    }

    #[tokio::test]
    async fn test_responder_excludes_requester_and_self() {
        let harness = MeshHarness::new(HarnessConfig::minimal()).unwrap();
        let ids = harness.peer_ids();
        let (a, b, c) = (&ids[0], &ids[1], &ids[2]);
        harness.set_link(b, c, ConnectionStatus::Connecting);

        let report = harness
            .node(a)
            .unwrap()
            .diagnostics()
            .probe_peer(b)
            .unwrap()
            .await
            .unwrap();

        assert_eq!(&report.my_peer_id, b);
        assert_eq!(report.data.keys().collect::<Vec<_>>(), vec![c]);
        assert_eq!(report.status_of(c), Some(&ConnectionStatus::Connecting));
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_callback_waits_for_last_reply() {
        let mut harness = MeshHarness::new(HarnessConfig::standard()).unwrap();
        let ids = harness.peer_ids();
        let origin = ids[0].clone();
        let silent = ids[3].clone();
        harness.silence(&silent);

        let node = harness.node(&origin).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();
        let counter = calls.clone();
        let task = node.diagnostics().probe_room().on_complete(move |report| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(report);
        });

        // N-1 replies arrive, the last never does
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let pending = node.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].peer, silent);
        assert!(pending[0].age >= Duration::from_secs(30));

        // Deliver the missing reply by hand
        let late = Envelope::response(pending[0].id, StatusReport::new(silent.clone(), StatusMap::new()));
        assert_eq!(
            node.dispatcher().dispatch_envelope(&silent, late),
            DispatchOutcome::Resolved(pending[0].id)
        );

        task.await.unwrap();
        let report = rx.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.len(), 3);
        assert!(report.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lone_peer_room_probe_never_completes() {
        let harness = MeshHarness::new(HarnessConfig::minimal().with_nodes(1)).unwrap();
        let origin = harness.peer_ids()[0].clone();
        assert!(run_room_probe(&harness, &origin, Duration::from_secs(3600))
            .await
            .is_none());
        assert_eq!(harness.pending_total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outer_timeout_leaves_nothing_pending() {
        let mut harness = MeshHarness::new(HarnessConfig::standard()).unwrap();
        let ids = harness.peer_ids();
        harness.silence(&ids[3]);

        for _ in 0..3 {
            assert!(run_room_probe(&harness, &ids[0], Duration::from_secs(10))
                .await
                .is_none());
            assert_eq!(harness.pending_total(), 0);
        }
    }

    #[tokio::test]
    async fn test_lone_peer_room_probe_completes_when_configured() {
        let config = HarnessConfig::minimal()
            .with_nodes(1)
            .with_diagnostics(DiagnosticsConfig::default().with_complete_empty_room(true));
        let harness = MeshHarness::new(config).unwrap();
        let origin = harness.peer_ids()[0].clone();

        let result = run_room_probe(&harness, &origin, LIMIT).await.unwrap();
        assert!(result.passed());
        assert!(result.report.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicated_and_reordered_replies() {
        let harness = MeshHarness::new(
            HarnessConfig::standard()
                .with_nodes(6)
                .with_chaos(ChaosConfig::scrambled()),
        )
        .unwrap();
        let ids = harness.peer_ids();
        let origin = harness.node(&ids[0]).unwrap();

        let handles: Vec<_> = ids[1..]
            .iter()
            .map(|peer| origin.diagnostics().probe_peer(peer).unwrap())
            .collect();
        for (peer, handle) in ids[1..].iter().zip(handles) {
            assert_eq!(&handle.await.unwrap().my_peer_id, peer);
        }

        // Let every duplicate land
        tokio::time::sleep(Duration::from_secs(5)).await;
        let stats = origin.stats();
        assert_eq!(stats.replies_resolved, 5);
        assert!(stats.stale_replies >= 5);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hostile_network_with_deadlines() {
        let harness = MeshHarness::new(
            HarnessConfig::stress()
                .with_chaos(ChaosConfig::hostile())
                .with_seed(2024),
        )
        .unwrap();

        for origin in harness.peer_ids() {
            let result = run_room_probe(&harness, &origin, LIMIT).await.unwrap();
            assert!(result.passed(), "{:?}", result.violations);
            assert_eq!(result.expected, 7);
            assert_eq!(
                result.stats.timeouts as usize,
                result.report.unanswered.len()
            );
            assert_eq!(result.stats.pending, 0);
        }
    }

    #[tokio::test]
    async fn test_asymmetric_link_detection() {
        let harness = MeshHarness::new(HarnessConfig::standard()).unwrap();
        let ids = harness.peer_ids();
        harness.set_link(&ids[2], &ids[1], ConnectionStatus::NotConnected);

        let result = run_room_probe(&harness, &ids[0], LIMIT).await.unwrap();
        assert!(result.passed());
        assert_eq!(
            result.report.asymmetric_links(),
            vec![(ids[1].clone(), ids[2].clone())]
        );
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_probes() {
        let mut harness = MeshHarness::new(HarnessConfig::minimal()).unwrap();
        let ids = harness.peer_ids();
        harness.silence(&ids[1]);

        let handle = harness
            .node(&ids[0])
            .unwrap()
            .diagnostics()
            .probe_peer(&ids[1])
            .unwrap();
        assert_eq!(harness.pending_total(), 1);
        assert_eq!(harness.shutdown(), 1);
        assert!(handle.await.is_err());
    }
}
