use crate::transport::AccessoryTransport;
use crate::types::{FindResult, PeerHandle, PeerStatus};

/// Single-slot holder for the connected peer.
///
/// A handle is released back to the transport before another one replaces it,
/// so at most one live peer handle exists at a time.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    current: Option<PeerHandle>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&PeerHandle> {
        self.current.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.current.is_some()
    }

    /// Apply a discovery outcome. Returns true if `peer` was adopted.
    pub fn on_discovery_result(
        &mut self,
        transport: &mut dyn AccessoryTransport,
        peer: Option<PeerHandle>,
        status: PeerStatus,
        result: FindResult,
    ) -> bool {
        match result {
            FindResult::DeviceNotConnected => {
                log::debug!("Peer search: device is not connected");
                false
            }
            FindResult::Found => match (peer, status) {
                (Some(peer), PeerStatus::Available) => {
                    self.adopt(transport, peer);
                    true
                }
                (Some(peer), PeerStatus::Unavailable) => {
                    log::debug!("Found peer {} is unavailable, destroying it", peer.raw());
                    transport.destroy_peer(peer);
                    false
                }
                (None, _) => {
                    log::warn!("Peer search reported found without a peer handle");
                    false
                }
            },
            FindResult::ServiceNotFound => {
                log::debug!("Peer search: service not found");
                false
            }
            FindResult::TimedOut => {
                log::debug!("Peer search timed out");
                false
            }
            FindResult::InternalError => {
                log::debug!("Peer search failed");
                false
            }
        }
    }

    /// Store `peer` as the current peer, releasing any different prior handle.
    pub fn adopt(&mut self, transport: &mut dyn AccessoryTransport, peer: PeerHandle) {
        if self.current.as_ref() == Some(&peer) {
            return;
        }
        if let Some(prior) = self.current.take() {
            log::debug!("Releasing peer {} for {}", prior.raw(), peer.raw());
            transport.destroy_peer(prior);
        }
        log::info!("Peer agent {} bound", peer.raw());
        self.current = Some(peer);
    }

    /// The device went away: drop the peer unconditionally.
    pub fn on_transport_detach(&mut self, transport: &mut dyn AccessoryTransport) {
        log::debug!("Device got disconnected");
        self.release(transport);
    }

    /// The device came back. Returns true if a new discovery should be requested.
    pub fn on_transport_attach(&self, registered: bool) -> bool {
        if !registered {
            log::debug!("Device connected before agent registration, not searching");
        }
        registered
    }

    pub fn release(&mut self, transport: &mut dyn AccessoryTransport) {
        if let Some(peer) = self.current.take() {
            transport.destroy_peer(peer);
        }
    }
}
