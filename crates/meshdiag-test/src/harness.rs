//! Mesh harness - N diagnostics nodes on one in-process mesh

use std::collections::BTreeMap;

use meshdiag_core::{ConnectionStatus, DiagError, DiagResult, PeerId};
use meshdiag_runtime::{DiagnosticsConfig, DiagnosticsNode, NodeHandle};
use meshdiag_transport::{MemoryMesh, MemoryTransport};

use crate::chaos::{ChaosConfig, ChaosTransport};

/// Transport every harness node runs on
pub type HarnessTransport = ChaosTransport<MemoryTransport>;

/// Harness configuration
#[derive(Clone, Debug)]
pub struct HarnessConfig {
    /// Number of nodes in the room
    pub node_count: usize,
    /// Chaos applied to every node's outbound traffic
    pub chaos: ChaosConfig,
    /// Base seed; node `i` uses `seed + i`
    pub seed: u64,
    /// Per-node diagnostics configuration
    pub diagnostics: DiagnosticsConfig,
    /// Capacity of each node's inbound channel
    pub buffer_size: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            node_count: 4,
            chaos: ChaosConfig::none(),
            seed: 0x5eed,
            diagnostics: DiagnosticsConfig::default(),
            buffer_size: 1024,
        }
    }
}

impl HarnessConfig {
    /// Three nodes, perfect network
    pub fn minimal() -> Self {
        HarnessConfig {
            node_count: 3,
            ..Default::default()
        }
    }

    pub fn standard() -> Self {
        Self::default()
    }

    /// Eight nodes on a poor network with probe deadlines
    pub fn stress() -> Self {
        HarnessConfig {
            node_count: 8,
            chaos: ChaosConfig::poor(),
            diagnostics: DiagnosticsConfig::default()
                .with_probe_timeout(std::time::Duration::from_secs(5)),
            ..Default::default()
        }
    }

    pub fn with_nodes(mut self, count: usize) -> Self {
        self.node_count = count;
        self
    }

    pub fn with_chaos(mut self, chaos: ChaosConfig) -> Self {
        self.chaos = chaos;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: DiagnosticsConfig) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }
}

struct HarnessNode {
    node: DiagnosticsNode<HarnessTransport>,
    handle: Option<NodeHandle>,
}

/// Running room of diagnostics nodes.
///
/// Must be created inside a tokio runtime.
pub struct MeshHarness {
    mesh: MemoryMesh,
    nodes: BTreeMap<PeerId, HarnessNode>,
}

impl MeshHarness {
    pub fn new(config: HarnessConfig) -> DiagResult<Self> {
        if config.buffer_size == 0 {
            return Err(DiagError::InvalidConfig {
                key: "buffer_size",
                reason: "must be at least 1".into(),
            });
        }
        let mesh = MemoryMesh::new(config.buffer_size);
        let mut nodes = BTreeMap::new();

        for i in 0..config.node_count {
            let id = peer_name(i);
            let (transport, inbound) = mesh.join(id.clone());
            let transport =
                ChaosTransport::new(transport, config.chaos.clone(), config.seed + i as u64);
            let node = DiagnosticsNode::new(transport, config.diagnostics.clone())?;
            let handle = node.spawn(inbound);
            nodes.insert(
                id,
                HarnessNode {
                    node,
                    handle: Some(handle),
                },
            );
        }

        tracing::debug!(nodes = nodes.len(), "mesh harness started");
        Ok(MeshHarness { mesh, nodes })
    }

    pub fn mesh(&self) -> &MemoryMesh {
        &self.mesh
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.nodes.keys().cloned().collect()
    }

    pub fn node(&self, id: &PeerId) -> Option<&DiagnosticsNode<HarnessTransport>> {
        self.nodes.get(id).map(|n| &n.node)
    }

    /// Node with the lowest peer id
    pub fn first(&self) -> Option<&DiagnosticsNode<HarnessTransport>> {
        self.nodes.values().next().map(|n| &n.node)
    }

    /// Set the status `from` reports toward `to`
    pub fn set_link(&self, from: &PeerId, to: &PeerId, status: ConnectionStatus) {
        self.mesh.set_link(from, to, status);
    }

    /// Stop a node's tasks; it stays in the room but never answers
    pub fn silence(&mut self, id: &PeerId) -> bool {
        match self.nodes.get_mut(id).and_then(|n| n.handle.take()) {
            Some(handle) => {
                handle.shutdown();
                true
            }
            None => false,
        }
    }

    /// Total pending transactions across all nodes
    pub fn pending_total(&self) -> usize {
        self.nodes
            .values()
            .map(|n| n.node.registry().pending_count())
            .sum()
    }

    /// Stop every node; returns the number of transactions cancelled
    pub fn shutdown(self) -> usize {
        self.nodes
            .into_values()
            .filter_map(|n| n.handle)
            .map(NodeHandle::shutdown)
            .sum()
    }
}

fn peer_name(i: usize) -> PeerId {
    PeerId::new(format!("peer-{:02}", i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshdiag_transport::Transport;

    #[tokio::test]
    async fn test_harness_creation() {
        let harness = MeshHarness::new(HarnessConfig::minimal()).unwrap();
        assert_eq!(harness.peer_ids().len(), 3);
        assert_eq!(harness.mesh().members().len(), 3);
        assert_eq!(harness.first().unwrap().transport().local_id(), peer_name(0));
        assert_eq!(harness.shutdown(), 0);
    }

    #[tokio::test]
    async fn test_silence_node() {
        let mut harness = MeshHarness::new(HarnessConfig::minimal()).unwrap();
        let id = peer_name(1);
        assert!(harness.silence(&id));
        assert!(!harness.silence(&id));
        assert!(!harness.silence(&PeerId::new("missing")));
    }

    #[tokio::test]
    async fn test_zero_buffer_rejected() {
        let err = MeshHarness::new(HarnessConfig::minimal().with_buffer_size(0))
            .err()
            .unwrap();
        assert!(matches!(err, DiagError::InvalidConfig { key: "buffer_size", .. }));

        let harness = MeshHarness::new(HarnessConfig::minimal().with_buffer_size(1)).unwrap();
        assert_eq!(harness.peer_ids().len(), 3);
    }
}
