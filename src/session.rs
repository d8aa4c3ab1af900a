//! Agent session: the top-level state machine.
//!
//! ```text
//! Uninitialized --start--> Registering --AgentInitialized(Success)--> Registered
//!                               ^   |                                     |
//!                               +---+ rejected: retry after backoff        | find_peer
//!                                                                         v
//!                                        PeerBound <--found--  PeerSearching
//!                                        PeerAbsent <--detach / not found
//! ```
//!
//! Registration retries are deadlines polled by the event loop, never a
//! blocking spin.

use crate::channel::DeliveryChannel;
use crate::config::SessionConfig;
use crate::dispatch::SessionEvent;
use crate::keypad::KeyPad;
use crate::protocol;
use crate::registry::PeerRegistry;
use crate::sensor::SensorSampler;
use crate::transport::{AccessoryTransport, Notifier};
use crate::types::{
    AgentHandle, AgentInitResult, DeviceStatus, PeerHandle, SessionState, TransactionId,
    TransportType,
};
use crate::{MexError, Result};
use std::time::Instant;

#[derive(Debug, Default)]
struct Registration {
    attempts: u32,
    retry_at: Option<Instant>,
}

pub struct AgentSession {
    config: SessionConfig,
    state: SessionState,
    agent: Option<AgentHandle>,
    transport: Box<dyn AccessoryTransport>,
    notifier: Box<dyn Notifier>,
    sampler: SensorSampler,
    keys: KeyPad,
    registry: PeerRegistry,
    channel: DeliveryChannel,
    registration: Registration,
    discovery_requests: u32,
    closed: bool,
}

impl AgentSession {
    pub fn new(
        config: SessionConfig,
        transport: Box<dyn AccessoryTransport>,
        notifier: Box<dyn Notifier>,
        sampler: SensorSampler,
    ) -> Self {
        Self {
            config,
            state: SessionState::Uninitialized,
            agent: None,
            transport,
            notifier,
            sampler,
            keys: KeyPad::new(),
            registry: PeerRegistry::new(),
            channel: DeliveryChannel::new(),
            registration: Registration::default(),
            discovery_requests: 0,
            closed: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn agent(&self) -> Option<AgentHandle> {
        self.agent
    }

    /// Handle for UI code to record key presses.
    pub fn keypad(&self) -> KeyPad {
        self.keys.clone()
    }

    pub fn sampler(&self) -> &SensorSampler {
        &self.sampler
    }

    pub fn sampler_mut(&mut self) -> &mut SensorSampler {
        &mut self.sampler
    }

    pub fn peer(&self) -> Option<&PeerHandle> {
        self.registry.current()
    }

    pub fn registration_attempts(&self) -> u32 {
        self.registration.attempts
    }

    /// Discovery requests the transport accepted so far.
    pub fn discovery_requests(&self) -> u32 {
        self.discovery_requests
    }

    pub fn pending_deliveries(&self) -> usize {
        self.channel.pending_count()
    }

    /// When the next registration retry is due.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            SessionState::Registering => self.registration.retry_at,
            _ => None,
        }
    }

    /// Allocate the agent, begin registration, start the accelerometer and take
    /// the display lock.
    ///
    /// Allocation and sensor failures are fatal and returned; everything
    /// acquired so far is released first.
    pub fn start(&mut self, now: Instant) -> Result<()> {
        if self.state != SessionState::Uninitialized {
            log::warn!("Session already started ({:?})", self.state);
            return Ok(());
        }
        self.closed = false;

        let agent = match self.transport.create_agent() {
            Some(agent) => agent,
            None => {
                log::error!("Error in creating accessory agent");
                return Err(MexError::AllocationFailure);
            }
        };
        log::debug!("Created accessory agent {:?}", agent);
        self.agent = Some(agent);
        self.keys.clear();

        self.state = SessionState::Registering;
        self.registration = Registration::default();
        if let Err(e) = self.attempt_registration(now) {
            self.finalize();
            return Err(e);
        }

        if let Err(e) = self.sampler.start() {
            log::error!("Accelerometer start failed: {}", e);
            self.finalize();
            return Err(e);
        }
        self.sampler.hold_display();
        Ok(())
    }

    fn attempt_registration(&mut self, now: Instant) -> Result<()> {
        let agent = self.agent.ok_or(MexError::AllocationFailure)?;
        self.registration.attempts += 1;
        self.registration.retry_at = None;

        match self
            .transport
            .initialize_agent(agent, &self.config.profile_id, self.config.role)
        {
            Ok(()) => {
                log::debug!(
                    "Registration call {} for {} accepted",
                    self.registration.attempts,
                    self.config.profile_id
                );
                Ok(())
            }
            Err(code) => {
                log::debug!(
                    "Registration call {} failed: {}",
                    self.registration.attempts,
                    MexError::RegistrationCall(code)
                );
                self.schedule_retry(now)
            }
        }
    }

    fn schedule_retry(&mut self, now: Instant) -> Result<()> {
        let attempts = self.registration.attempts;
        if self.config.retry.exhausted(attempts) {
            log::error!("Agent registration gave up after {} attempts", attempts);
            self.finalize();
            return Err(MexError::RegistrationExhausted { attempts });
        }
        let delay = self.config.retry.backoff(attempts);
        log::debug!("Retrying registration in {:?}", delay);
        self.registration.retry_at = Some(now + delay);
        Ok(())
    }

    /// Fire a due registration retry.
    pub fn poll_timers(&mut self, now: Instant) -> Result<()> {
        match self.next_deadline() {
            Some(deadline) if deadline <= now => self.attempt_registration(now),
            _ => Ok(()),
        }
    }

    /// Dispatch one event. Only fatal errors are returned; everything else is
    /// logged and absorbed.
    pub fn handle_event(&mut self, event: SessionEvent, now: Instant) -> Result<()> {
        match event {
            SessionEvent::AgentInitialized(result) => self.on_agent_initialized(result, now),
            SessionEvent::PeerUpdated {
                peer,
                status,
                result,
            } => {
                let adopted =
                    self.registry
                        .on_discovery_result(self.transport.as_mut(), peer, status, result);
                if self.state.is_registered() {
                    self.state = if adopted || self.registry.is_bound() {
                        SessionState::PeerBound
                    } else {
                        SessionState::PeerAbsent
                    };
                }
                Ok(())
            }
            SessionEvent::DeviceStatusChanged { status, transport } => {
                self.on_device_status_changed(status, transport);
                Ok(())
            }
            SessionEvent::DataReceived { peer, payload } => {
                log::trace!("Peer {} requested data ({} bytes)", peer.raw(), payload.len());
                if let Err(e) = self.on_data_received(peer) {
                    log::debug!("Data request not answered: {}", e);
                }
                Ok(())
            }
            SessionEvent::DeliveryStatus {
                transaction,
                status,
            } => {
                self.channel.on_delivery_status(transaction, status);
                Ok(())
            }
            SessionEvent::KeyPressed(index) => {
                if let Err(e) = self.keys.press(index) {
                    log::warn!("Ignoring key press: {}", e);
                }
                Ok(())
            }
            SessionEvent::Sample(sample) => {
                self.sampler.sink().store(sample);
                Ok(())
            }
            SessionEvent::Shutdown => {
                self.finalize();
                Ok(())
            }
        }
    }

    fn on_agent_initialized(&mut self, result: AgentInitResult, now: Instant) -> Result<()> {
        if self.state != SessionState::Registering {
            log::warn!("Agent initialized ({:?}) while {:?}, ignoring", result, self.state);
            return Ok(());
        }

        match result {
            AgentInitResult::Success => {
                log::info!("Agent is initialized");
                self.on_registered();
                Ok(())
            }
            AgentInitResult::Duplicated if self.config.duplicate_is_registered => {
                log::info!("Duplicate registration, treating agent as registered");
                self.on_registered();
                Ok(())
            }
            rejected => {
                match rejected {
                    AgentInitResult::Duplicated => log::debug!("Duplicate registration"),
                    AgentInitResult::InvalidArguments => log::debug!("Invalid arguments"),
                    AgentInitResult::InternalError => log::debug!("Internal accessory error"),
                    AgentInitResult::Unknown(code) => log::debug!("Unknown status ({})", code),
                    AgentInitResult::Success => {}
                }
                log::debug!("{}", MexError::RegistrationRejected(rejected));
                self.schedule_retry(now)
            }
        }
    }

    fn on_registered(&mut self) {
        self.registration.retry_at = None;
        self.state = SessionState::Registered;
        if let Some(agent) = self.agent {
            if let Err(code) = self.transport.enable_data_received(agent) {
                log::error!("Installing data handler failed ({})", code);
            }
        }
        self.request_discovery();
    }

    /// Ask the transport to search for the peer.
    pub fn request_discovery(&mut self) {
        let Some(agent) = self.agent else {
            log::warn!("Peer search requested without an agent");
            return;
        };
        match self.transport.find_peer(agent) {
            Ok(()) => {
                log::debug!("Find peer call succeeded");
                self.discovery_requests += 1;
                if !self.registry.is_bound() {
                    self.state = SessionState::PeerSearching;
                }
            }
            Err(code) => log::debug!("Find peer call failed ({})", code),
        }
    }

    fn on_device_status_changed(&mut self, status: DeviceStatus, transport: TransportType) {
        if transport != TransportType::Bluetooth {
            log::debug!("Unknown connectivity type ({:?})", transport);
            return;
        }
        log::info!("Connectivity type: bluetooth");

        match status {
            DeviceStatus::Detached => {
                self.registry.on_transport_detach(self.transport.as_mut());
                if self.state.is_registered() {
                    self.state = SessionState::PeerAbsent;
                }
            }
            DeviceStatus::Attached => {
                log::debug!("Device is connected");
                if self.registry.on_transport_attach(self.state.is_registered()) {
                    self.request_discovery();
                }
            }
            DeviceStatus::Unknown(code) => log::debug!("Unknown device status ({})", code),
        }
    }

    /// Answer a peer's data request: snapshot, encode, send, clear the keys.
    ///
    /// Only the slots carried by the frame are cleared, and only once the send
    /// produced a transaction. Presses arriving mid-send wait for the next one.
    pub fn on_data_received(&mut self, peer: PeerHandle) -> Result<TransactionId> {
        self.registry.adopt(self.transport.as_mut(), peer);
        if self.state.is_registered() {
            self.state = SessionState::PeerBound;
        }

        let sample = self.sampler.snapshot();
        let keys = self.keys.snapshot();
        let frame = protocol::encode_frame(&sample, &keys).inspect_err(|e| {
            log::error!("Not sending sample: {}", e);
        })?;

        let transaction = self.channel.send(
            self.transport.as_mut(),
            self.notifier.as_mut(),
            self.registry.current(),
            &frame,
            self.config.secure,
        )?;
        self.keys.clear_sent(&keys);
        Ok(transaction)
    }

    /// Release the sensor, display lock, peer and agent. Idempotent.
    pub fn finalize(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.sampler.finalize();
        self.registry.release(self.transport.as_mut());
        if let Some(agent) = self.agent.take() {
            self.transport.destroy_agent(agent);
        }
        self.registration.retry_at = None;
        self.state = SessionState::Uninitialized;
        log::info!("Session finalized");
    }
}

impl Drop for AgentSession {
    fn drop(&mut self) {
        self.finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::sensor::{ListenerId, PowerLock, SampleSink, SensorId, SensorPlatform};
    use crate::transport::testing::FakeTransport;
    use crate::types::{AccelSample, FindResult, PeerStatus};
    use std::time::Duration;

    struct StubSensor;

    impl SensorPlatform for StubSensor {
        fn default_accelerometer(&mut self) -> Option<SensorId> {
            Some(SensorId(1))
        }
        fn create_listener(&mut self, _: SensorId) -> std::result::Result<ListenerId, String> {
            Ok(ListenerId(1))
        }
        fn set_sample_sink(
            &mut self,
            _: ListenerId,
            _: SampleSink,
        ) -> std::result::Result<(), String> {
            Ok(())
        }
        fn start_listener(&mut self, _: ListenerId) -> std::result::Result<(), String> {
            Ok(())
        }
        fn stop_listener(&mut self, _: ListenerId) -> std::result::Result<(), String> {
            Ok(())
        }
        fn read_listener(&mut self, _: ListenerId) -> std::result::Result<AccelSample, String> {
            Ok(AccelSample::default())
        }
        fn destroy_listener(&mut self, _: ListenerId) -> std::result::Result<(), String> {
            Ok(())
        }
    }

    struct StubPower;

    impl PowerLock for StubPower {
        fn acquire_display(&mut self) -> std::result::Result<(), String> {
            Ok(())
        }
        fn release_display(&mut self) -> std::result::Result<(), String> {
            Ok(())
        }
    }

    fn session(config: SessionConfig) -> (AgentSession, FakeTransport) {
        let transport = FakeTransport::default();
        let sampler = SensorSampler::new(Box::new(StubSensor), Box::new(StubPower));
        let session = AgentSession::new(
            config,
            Box::new(transport.clone()),
            Box::new(transport.clone()),
            sampler,
        );
        (session, transport)
    }

    #[test]
    fn test_allocation_failure_is_fatal() {
        let (mut session, transport) = session(SessionConfig::default());
        transport.record.lock().unwrap().fail_create = true;
        let err = session.start(Instant::now()).unwrap_err();
        assert!(matches!(err, MexError::AllocationFailure));
        assert!(err.is_fatal());
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[test]
    fn test_registration_success_installs_handler_and_searches() {
        let (mut session, transport) = session(SessionConfig::default());
        let now = Instant::now();
        session.start(now).unwrap();
        assert_eq!(session.state(), SessionState::Registering);
        assert!(session.sampler().holds_display());

        session
            .handle_event(SessionEvent::AgentInitialized(AgentInitResult::Success), now)
            .unwrap();
        assert_eq!(session.state(), SessionState::PeerSearching);
        let rec = transport.record.lock().unwrap();
        assert_eq!(rec.data_handler_for, Some(AgentHandle(1)));
        assert_eq!(rec.find_calls, 1);
    }

    #[test]
    fn test_rejected_registration_retries_after_backoff() {
        let (mut session, transport) = session(SessionConfig::default());
        let now = Instant::now();
        session.start(now).unwrap();
        session
            .handle_event(SessionEvent::AgentInitialized(AgentInitResult::InternalError), now)
            .unwrap();
        assert_eq!(session.next_deadline(), Some(now + Duration::from_millis(100)));

        session.poll_timers(now + Duration::from_millis(50)).unwrap();
        assert_eq!(transport.record.lock().unwrap().init_calls, 1);
        session.poll_timers(now + Duration::from_millis(100)).unwrap();
        assert_eq!(transport.record.lock().unwrap().init_calls, 2);
        assert_eq!(session.registration_attempts(), 2);
    }

    #[test]
    fn test_failed_call_retries_until_exhausted() {
        let config = SessionConfig {
            retry: RetryPolicy {
                max_attempts: Some(3),
                initial_backoff: Duration::ZERO,
                max_backoff: Duration::ZERO,
                multiplier: 1,
            },
            ..SessionConfig::default()
        };
        let (mut session, transport) = session(config);
        transport.record.lock().unwrap().init_results = vec![-1, -1, -1];
        let now = Instant::now();
        session.start(now).unwrap();
        session.poll_timers(now).unwrap();
        let err = session.poll_timers(now).unwrap_err();
        assert!(matches!(err, MexError::RegistrationExhausted { attempts: 3 }));
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(session.agent().is_none());
        assert!(!session.sampler().is_running());
        assert!(!session.sampler().holds_display());
    }

    #[test]
    fn test_duplicate_keeps_retrying_by_default() {
        let (mut session, _) = session(SessionConfig::default());
        let now = Instant::now();
        session.start(now).unwrap();
        session
            .handle_event(SessionEvent::AgentInitialized(AgentInitResult::Duplicated), now)
            .unwrap();
        assert_eq!(session.state(), SessionState::Registering);
        assert!(session.next_deadline().is_some());
    }

    #[test]
    fn test_duplicate_can_count_as_registered() {
        let config = SessionConfig {
            duplicate_is_registered: true,
            ..SessionConfig::default()
        };
        let (mut session, _) = session(config);
        let now = Instant::now();
        session.start(now).unwrap();
        session
            .handle_event(SessionEvent::AgentInitialized(AgentInitResult::Duplicated), now)
            .unwrap();
        assert!(session.state().is_registered());
    }

    #[test]
    fn test_attach_before_registration_does_not_search() {
        let (mut session, transport) = session(SessionConfig::default());
        let now = Instant::now();
        session.start(now).unwrap();
        session
            .handle_event(
                SessionEvent::DeviceStatusChanged {
                    status: DeviceStatus::Attached,
                    transport: TransportType::Bluetooth,
                },
                now,
            )
            .unwrap();
        assert_eq!(transport.record.lock().unwrap().find_calls, 0);
    }

    #[test]
    fn test_found_peer_binds_session() {
        let (mut session, _) = session(SessionConfig::default());
        let now = Instant::now();
        session.start(now).unwrap();
        session
            .handle_event(SessionEvent::AgentInitialized(AgentInitResult::Success), now)
            .unwrap();
        session
            .handle_event(
                SessionEvent::PeerUpdated {
                    peer: Some(PeerHandle::new(9)),
                    status: PeerStatus::Available,
                    result: FindResult::Found,
                },
                now,
            )
            .unwrap();
        assert_eq!(session.state(), SessionState::PeerBound);
        assert_eq!(session.peer().map(|p| p.raw()), Some(9));
    }

    #[test]
    fn test_finalize_releases_peer_once() {
        let (mut session, transport) = session(SessionConfig::default());
        let now = Instant::now();
        session.start(now).unwrap();
        session.on_data_received(PeerHandle::new(3)).unwrap();
        session.finalize();
        session.finalize();
        assert_eq!(transport.record.lock().unwrap().destroyed, vec![3]);
        assert!(!session.sampler().holds_display());
    }
}
