use crate::types::{AgentHandle, AgentRole, PeerFeatures, PeerHandle};

/// The accessory SDK calls the session makes.
///
/// Results of asynchronous calls (`initialize_agent`, `find_peer`, sends) come
/// back later as [`SessionEvent`](crate::SessionEvent)s. Error payloads are the
/// SDK's raw result codes.
pub trait AccessoryTransport: Send {
    /// Allocate a local agent. `None` when the SDK cannot.
    fn create_agent(&mut self) -> Option<AgentHandle>;

    /// Request registration under `profile_id`. `Ok` means the call was accepted;
    /// the outcome arrives as `SessionEvent::AgentInitialized`.
    fn initialize_agent(
        &mut self,
        agent: AgentHandle,
        profile_id: &str,
        role: AgentRole,
    ) -> Result<(), i32>;

    /// Route inbound data for `agent` to the session.
    fn enable_data_received(&mut self, agent: AgentHandle) -> Result<(), i32>;

    /// Start peer discovery; the result arrives as `SessionEvent::PeerUpdated`.
    fn find_peer(&mut self, agent: AgentHandle) -> Result<(), i32>;

    fn peer_features(&self, peer: &PeerHandle) -> PeerFeatures;

    /// Send `data` to `peer`. Positive results are transaction ids.
    fn send_data(&mut self, peer: &PeerHandle, data: &[u8], secure: bool) -> i32;

    /// Release a peer handle back to the SDK.
    fn destroy_peer(&mut self, peer: PeerHandle);

    fn destroy_agent(&mut self, agent: AgentHandle) {
        let _ = agent;
    }
}

/// The one presentation-surface call the session needs.
pub trait Notifier: Send {
    fn show_transient_notice(&mut self, text: &str);
}

/// Notifier that only logs.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show_transient_notice(&mut self, text: &str) {
        log::info!("Notice: {}", text);
    }
}
