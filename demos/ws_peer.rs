//! Serve the session to a WebSocket "phone".
//!
//! Any WebSocket client can stand in for the paired receiver: connecting
//! attaches the device, every text message it sends is a data request, and
//! each reply is the 35-byte frame sent back as a binary message.
//!
//! Usage:
//!   cargo run --example ws_peer
//!   websocat ws://localhost:8765   (then type anything and press enter)

use crossbeam_channel::{Receiver, Sender};
use mexlink::sensor::{ListenerId, SensorId};
use mexlink::{
    AccelSample, AccessoryTransport, AgentHandle, AgentInitResult, AgentRole, AgentSession,
    DeliveryStatus, DeviceStatus, EventLoop, EventSender, FindResult, LogNotifier, PeerFeatures,
    PeerHandle, PeerStatus, PowerLock, SampleSink, SensorPlatform, SensorSampler, SessionConfig,
    SessionEvent, TransactionId, TransportType,
};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tungstenite::Message;

const PORT: u16 = 8765;
const PHONE_PEER: u64 = 1;

struct Outgoing {
    transaction: i32,
    frame: Vec<u8>,
}

/// Transport whose peer is the single connected WebSocket client.
struct WsTransport {
    events: EventSender,
    outgoing: Sender<Outgoing>,
    connected: Arc<AtomicBool>,
    next_txn: i32,
}

impl AccessoryTransport for WsTransport {
    fn create_agent(&mut self) -> Option<AgentHandle> {
        Some(AgentHandle(1))
    }

    fn initialize_agent(&mut self, _: AgentHandle, _: &str, _: AgentRole) -> Result<(), i32> {
        self.events
            .post(SessionEvent::AgentInitialized(AgentInitResult::Success))
            .map_err(|_| -1)
    }

    fn enable_data_received(&mut self, _: AgentHandle) -> Result<(), i32> {
        Ok(())
    }

    fn find_peer(&mut self, _: AgentHandle) -> Result<(), i32> {
        let event = if self.connected.load(Ordering::Relaxed) {
            SessionEvent::PeerUpdated {
                peer: Some(PeerHandle::new(PHONE_PEER)),
                status: PeerStatus::Available,
                result: FindResult::Found,
            }
        } else {
            SessionEvent::PeerUpdated {
                peer: None,
                status: PeerStatus::Unavailable,
                result: FindResult::DeviceNotConnected,
            }
        };
        self.events.post(event).map_err(|_| -1)
    }

    fn peer_features(&self, _: &PeerHandle) -> PeerFeatures {
        PeerFeatures::MESSAGE
    }

    fn send_data(&mut self, _: &PeerHandle, data: &[u8], _: bool) -> i32 {
        if !self.connected.load(Ordering::Relaxed) {
            return -1;
        }
        self.next_txn += 1;
        let out = Outgoing {
            transaction: self.next_txn,
            frame: data.to_vec(),
        };
        match self.outgoing.send(out) {
            Ok(()) => self.next_txn,
            Err(_) => -1,
        }
    }

    fn destroy_peer(&mut self, peer: PeerHandle) {
        log::debug!("[WS] peer {} released", peer.raw());
    }
}

struct IdleSensor;

impl SensorPlatform for IdleSensor {
    fn default_accelerometer(&mut self) -> Option<SensorId> {
        Some(SensorId(1))
    }
    fn create_listener(&mut self, _: SensorId) -> Result<ListenerId, String> {
        Ok(ListenerId(1))
    }
    fn set_sample_sink(&mut self, _: ListenerId, _: SampleSink) -> Result<(), String> {
        Ok(())
    }
    fn start_listener(&mut self, _: ListenerId) -> Result<(), String> {
        Ok(())
    }
    fn stop_listener(&mut self, _: ListenerId) -> Result<(), String> {
        Ok(())
    }
    fn read_listener(&mut self, _: ListenerId) -> Result<AccelSample, String> {
        Ok(AccelSample::new(0.0, 0.0, 9.81))
    }
    fn destroy_listener(&mut self, _: ListenerId) -> Result<(), String> {
        Ok(())
    }
}

struct NoPower;

impl PowerLock for NoPower {
    fn acquire_display(&mut self) -> Result<(), String> {
        Ok(())
    }
    fn release_display(&mut self) -> Result<(), String> {
        Ok(())
    }
}

fn main() {
    env_logger::init();

    let events = EventLoop::new();
    let (out_tx, out_rx) = crossbeam_channel::bounded::<Outgoing>(64);
    let connected = Arc::new(AtomicBool::new(false));

    let transport = WsTransport {
        events: events.sender(),
        outgoing: out_tx,
        connected: connected.clone(),
        next_txn: 0,
    };
    let sampler = SensorSampler::new(Box::new(IdleSensor), Box::new(NoPower));
    let sink = sampler.sink();
    let mut session = AgentSession::new(
        SessionConfig::default(),
        Box::new(transport),
        Box::new(LogNotifier),
        sampler,
    );

    let listener = TcpListener::bind(format!("0.0.0.0:{}", PORT)).unwrap_or_else(|e| {
        eprintln!("Failed to bind port {}: {}", PORT, e);
        std::process::exit(1);
    });
    eprintln!("[WS] waiting for a phone on ws://localhost:{}", PORT);

    let sender = events.sender();
    std::thread::Builder::new()
        .name("ws-peer".into())
        .spawn(move || accept_loop(listener, sender, out_rx, connected, sink))
        .unwrap_or_else(|e| {
            eprintln!("Failed to spawn WebSocket thread: {}", e);
            std::process::exit(1);
        });

    if let Err(e) = session.start(Instant::now()) {
        eprintln!("Failed to start session: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = events.run(&mut session) {
        eprintln!("Session error: {}", e);
        std::process::exit(1);
    }
}

/// Serve one phone at a time.
fn accept_loop(
    listener: TcpListener,
    events: EventSender,
    outgoing: Receiver<Outgoing>,
    connected: Arc<AtomicBool>,
    sink: SampleSink,
) {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                eprintln!("[TCP] accept error: {}", e);
                continue;
            }
        };
        if serve_phone(stream, &events, &outgoing, &connected, &sink).is_err() {
            break;
        }
    }
}

/// Returns Err once the session is gone.
fn serve_phone(
    stream: TcpStream,
    events: &EventSender,
    outgoing: &Receiver<Outgoing>,
    connected: &AtomicBool,
    sink: &SampleSink,
) -> mexlink::Result<()> {
    stream.set_nodelay(true).ok();
    let mut ws = match tungstenite::accept(stream) {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("[WS] handshake error: {}", e);
            return Ok(());
        }
    };
    // Short read timeout so replies and samples keep flowing between requests.
    ws.get_ref()
        .set_read_timeout(Some(Duration::from_millis(20)))
        .ok();

    eprintln!("[WS] phone connected");
    connected.store(true, Ordering::Relaxed);
    events.post(SessionEvent::DeviceStatusChanged {
        status: DeviceStatus::Attached,
        transport: TransportType::Bluetooth,
    })?;

    let epoch = Instant::now();
    loop {
        let t = epoch.elapsed().as_secs_f32();
        sink.on_sample((t * 2.0).sin(), (t * 2.0).cos().abs(), 9.81);

        match ws.read() {
            Ok(Message::Text(_)) | Ok(Message::Binary(_)) => {
                events.post(SessionEvent::DataReceived {
                    peer: PeerHandle::new(PHONE_PEER),
                    payload: Vec::new(),
                })?;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                eprintln!("[WS] read error: {}", e);
                break;
            }
        }

        while let Ok(out) = outgoing.try_recv() {
            let status = match ws.send(Message::Binary(out.frame.into())) {
                Ok(()) => DeliveryStatus::Delivered,
                Err(e) => {
                    eprintln!("[WS] send error: {}", e);
                    DeliveryStatus::Failed
                }
            };
            events.post(SessionEvent::DeliveryStatus {
                transaction: TransactionId(out.transaction),
                status,
            })?;
        }
    }

    eprintln!("[WS] phone disconnected");
    connected.store(false, Ordering::Relaxed);
    events.post(SessionEvent::DeviceStatusChanged {
        status: DeviceStatus::Detached,
        transport: TransportType::Bluetooth,
    })?;
    Ok(())
}
