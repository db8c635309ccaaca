//! Connectivity status responder
//!
//! Computes the answer to someone else's probe: our own view of every
//! room member except the requester and ourselves.

use meshdiag_core::{PeerId, StatusMap, StatusReport};
use meshdiag_transport::Transport;

/// Build the local status report for a probe sent by `requester`
pub fn local_report<T: Transport + ?Sized>(transport: &T, requester: &PeerId) -> StatusReport {
    let local = transport.local_id();

    let data: StatusMap = transport
        .room_members()
        .into_iter()
        .filter(|peer| peer != requester && *peer != local)
        .map(|peer| {
            let status = transport.connection_status(&peer);
            tracing::trace!(peer = %peer, status = %status, "local link status");
            (peer, status)
        })
        .collect();

    StatusReport::new(local, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshdiag_core::ConnectionStatus;
    use meshdiag_transport::MemoryMesh;

    #[test]
    fn test_excludes_requester_and_self() {
        let mesh = MemoryMesh::new(8);
        let (a, _ra) = mesh.join("A");
        let (_b, _rb) = mesh.join("B");
        let (_c, _rc) = mesh.join("C");

        let report = local_report(&a, &PeerId::new("B"));

        assert_eq!(report.my_peer_id, PeerId::new("A"));
        assert_eq!(report.data.len(), 1);
        assert_eq!(
            report.status_of(&PeerId::new("C")),
            Some(&ConnectionStatus::Connected)
        );
        assert!(report.status_of(&PeerId::new("A")).is_none());
        assert!(report.status_of(&PeerId::new("B")).is_none());
    }

    #[test]
    fn test_relays_transport_status() {
        let mesh = MemoryMesh::new(8);
        let (a, _ra) = mesh.join("A");
        let (_b, _rb) = mesh.join("B");
        let (_c, _rc) = mesh.join("C");
        let (_d, _rd) = mesh.join("D");
        mesh.set_link(
            &PeerId::new("A"),
            &PeerId::new("C"),
            ConnectionStatus::Connecting,
        );
        mesh.set_link(
            &PeerId::new("A"),
            &PeerId::new("D"),
            ConnectionStatus::Other("ice-failed".into()),
        );

        let report = local_report(&a, &PeerId::new("B"));
        assert_eq!(
            report.status_of(&PeerId::new("C")),
            Some(&ConnectionStatus::Connecting)
        );
        assert_eq!(
            report.status_of(&PeerId::new("D")),
            Some(&ConnectionStatus::Other("ice-failed".into()))
        );
    }

    #[test]
    fn test_requester_outside_room() {
        let mesh = MemoryMesh::new(8);
        let (a, _ra) = mesh.join("A");
        let (_b, _rb) = mesh.join("B");

        let report = local_report(&a, &PeerId::new("stranger"));
        assert_eq!(report.data.keys().collect::<Vec<_>>(), vec![&PeerId::new("B")]);
    }
}
