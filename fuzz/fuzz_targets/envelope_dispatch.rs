//! Feeds arbitrary bytes from arbitrary senders into a dispatcher that
//! has a few transactions in flight.

#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use meshdiag_core::{PeerId, StatusReport};
use meshdiag_runtime::{Dispatcher, StatsCounters, TransactionRegistry};
use meshdiag_transport::MemoryMesh;
use meshdiag_wire::DIAGNOSTICS_CHANNEL;

#[derive(Arbitrary, Debug)]
struct Input {
    open: u8,
    messages: Vec<(u8, Vec<u8>)>,
}

const PEERS: [&str; 3] = ["A", "B", "C"];

fuzz_target!(|input: Input| {
    let mesh = MemoryMesh::new(64);
    let (local, _local_rx) = mesh.join(PEERS[0]);
    let _others: Vec<_> = PEERS[1..].iter().map(|p| mesh.join(*p)).collect();

    let registry = Arc::new(TransactionRegistry::<StatusReport>::new(16));
    let dispatcher = Dispatcher::new(
        Arc::new(local),
        registry.clone(),
        DIAGNOSTICS_CHANNEL,
        Arc::new(StatsCounters::new()),
    );

    let mut receivers = Vec::new();
    for i in 0..(input.open % 8) {
        let peer = PeerId::new(PEERS[1 + (i as usize % 2)]);
        if let Ok(pending) = registry.open(peer) {
            receivers.push(pending);
        }
    }
    let opened = registry.pending_count();

    for (sender, payload) in &input.messages {
        let from = PeerId::new(PEERS[*sender as usize % PEERS.len()]);
        let _ = dispatcher.dispatch(&from, payload);
    }

    // Nothing is ever resurrected or duplicated
    assert!(registry.pending_count() <= opened);
});
