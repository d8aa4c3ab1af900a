use crate::session::AgentSession;
use crate::types::{
    AccelSample, AgentInitResult, DeliveryStatus, DeviceStatus, FindResult, PeerHandle,
    PeerStatus, TransactionId, TransportType,
};
use crate::{MexError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::time::Instant;

/// Everything the session reacts to, in one closed set.
#[derive(Debug)]
pub enum SessionEvent {
    /// Asynchronous outcome of agent registration.
    AgentInitialized(AgentInitResult),
    /// Peer discovery finished.
    PeerUpdated {
        peer: Option<PeerHandle>,
        status: PeerStatus,
        result: FindResult,
    },
    DeviceStatusChanged {
        status: DeviceStatus,
        transport: TransportType,
    },
    /// The peer asked for the current sensor and key state.
    DataReceived { peer: PeerHandle, payload: Vec<u8> },
    DeliveryStatus {
        transaction: TransactionId,
        status: DeliveryStatus,
    },
    KeyPressed(usize),
    Sample(AccelSample),
    Shutdown,
}

/// Cloneable handle collaborators post events through.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: Sender<SessionEvent>,
}

impl EventSender {
    pub fn post(&self, event: SessionEvent) -> Result<()> {
        self.sender
            .send(event)
            .map_err(|_| MexError::SessionClosed)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.post(SessionEvent::Shutdown)
    }
}

/// Single-threaded dispatcher feeding a session.
///
/// Callbacks from any thread are queued; [`EventLoop::run`] drains them one at
/// a time and wakes for registration retry deadlines in between.
pub struct EventLoop {
    sender: Sender<SessionEvent>,
    receiver: Receiver<SessionEvent>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    pub fn sender(&self) -> EventSender {
        EventSender {
            sender: self.sender.clone(),
        }
    }

    /// Handle one event or timer. Returns false once shutdown was seen.
    pub fn step(&self, session: &mut AgentSession) -> Result<bool> {
        let event = match session.next_deadline() {
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(Instant::now());
                match self.receiver.recv_timeout(wait) {
                    Ok(event) => Some(event),
                    Err(RecvTimeoutError::Timeout) => None,
                    // We hold a sender ourselves, so this cannot happen.
                    Err(RecvTimeoutError::Disconnected) => return Err(MexError::SessionClosed),
                }
            }
            None => Some(self.receiver.recv().map_err(|_| MexError::SessionClosed)?),
        };

        match event {
            Some(SessionEvent::Shutdown) => {
                log::info!("Session shutdown requested");
                return Ok(false);
            }
            Some(event) => session.handle_event(event, Instant::now())?,
            None => {}
        }
        session.poll_timers(Instant::now())?;
        Ok(true)
    }

    /// Run until shutdown or a fatal error, then finalize the session.
    pub fn run(&self, session: &mut AgentSession) -> Result<()> {
        log::info!("Session event loop started");
        let result = loop {
            match self.step(session) {
                Ok(true) => continue,
                Ok(false) => break Ok(()),
                Err(e) => {
                    log::error!("Session stopped: {}", e);
                    break Err(e);
                }
            }
        };
        session.finalize();
        result
    }
}
