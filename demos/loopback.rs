//! Run a full session against an in-process simulated phone.
//!
//! A background thread feeds a synthetic wrist motion into the sampler and
//! the simulated phone asks for data every 200 ms, printing each frame.
//!
//! Usage: RUST_LOG=debug cargo run --example loopback

use mexlink::protocol;
use mexlink::sensor::{ListenerId, SensorId};
use mexlink::{
    AccelSample, AccessoryTransport, AgentHandle, AgentInitResult, AgentRole, AgentSession,
    EventLoop, EventSender, FindResult, Key, LogNotifier, PeerFeatures, PeerHandle, PeerStatus,
    PowerLock, SampleSink, SensorPlatform, SensorSampler, SessionConfig, SessionEvent,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const PEER: u64 = 42;

/// Simulated phone: accepts registration and discovery, prints what it receives.
struct SimPhone {
    events: EventSender,
    next_txn: i32,
}

impl AccessoryTransport for SimPhone {
    fn create_agent(&mut self) -> Option<AgentHandle> {
        Some(AgentHandle(1))
    }

    fn initialize_agent(
        &mut self,
        _: AgentHandle,
        profile: &str,
        role: AgentRole,
    ) -> Result<(), i32> {
        println!("register {} as {:?}", profile, role);
        let _ = self
            .events
            .post(SessionEvent::AgentInitialized(AgentInitResult::Success));
        Ok(())
    }

    fn enable_data_received(&mut self, _: AgentHandle) -> Result<(), i32> {
        Ok(())
    }

    fn find_peer(&mut self, _: AgentHandle) -> Result<(), i32> {
        let _ = self.events.post(SessionEvent::PeerUpdated {
            peer: Some(PeerHandle::new(PEER)),
            status: PeerStatus::Available,
            result: FindResult::Found,
        });
        Ok(())
    }

    fn peer_features(&self, _: &PeerHandle) -> PeerFeatures {
        PeerFeatures::MESSAGE
    }

    fn send_data(&mut self, _: &PeerHandle, data: &[u8], _: bool) -> i32 {
        self.next_txn += 1;
        match protocol::decode(data) {
            Ok((sample, keys)) => println!(
                "txn {:<4} accel=[{:+.3}, {:+.3}, {:+.3}] keys={}",
                self.next_txn,
                sample.x,
                sample.y,
                sample.z,
                protocol::format_keys(&keys)
            ),
            Err(e) => eprintln!("bad frame: {}", e),
        }
        let _ = self.events.post(SessionEvent::DeliveryStatus {
            transaction: mexlink::TransactionId(self.next_txn),
            status: mexlink::DeliveryStatus::Delivered,
        });
        self.next_txn
    }

    fn destroy_peer(&mut self, peer: PeerHandle) {
        println!("peer {} released", peer.raw());
    }
}

/// Synthetic accelerometer driven by a background thread.
struct SimSensor {
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
    sink: Option<SampleSink>,
}

impl SensorPlatform for SimSensor {
    fn default_accelerometer(&mut self) -> Option<SensorId> {
        Some(SensorId(1))
    }

    fn create_listener(&mut self, _: SensorId) -> Result<ListenerId, String> {
        Ok(ListenerId(1))
    }

    fn set_sample_sink(&mut self, _: ListenerId, sink: SampleSink) -> Result<(), String> {
        self.sink = Some(sink);
        Ok(())
    }

    fn start_listener(&mut self, _: ListenerId) -> Result<(), String> {
        let sink = self.sink.clone().ok_or("no sink")?;
        let running = self.running.clone();
        running.store(true, Ordering::Relaxed);
        let thread = std::thread::Builder::new()
            .name("sim-accel".into())
            .spawn(move || {
                let epoch = Instant::now();
                while running.load(Ordering::Relaxed) {
                    let t = epoch.elapsed().as_secs_f32();
                    // At most one negative axis keeps the frame within 35 bytes.
                    sink.on_sample(t.sin() * 2.0, t.cos().abs() * 2.0, 9.81);
                    std::thread::sleep(Duration::from_millis(20));
                }
            })
            .map_err(|e| e.to_string())?;
        self.thread = Some(thread);
        Ok(())
    }

    fn stop_listener(&mut self, _: ListenerId) -> Result<(), String> {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        Ok(())
    }

    fn read_listener(&mut self, _: ListenerId) -> Result<AccelSample, String> {
        Ok(self.sink.as_ref().map(|s| s.snapshot()).unwrap_or_default())
    }

    fn destroy_listener(&mut self, _: ListenerId) -> Result<(), String> {
        self.sink = None;
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
    let phone = SimPhone {
        events: events.sender(),
        next_txn: 0,
    };
    let sensor = SimSensor {
        running: Arc::new(AtomicBool::new(false)),
        thread: None,
        sink: None,
    };
    let sampler = SensorSampler::new(Box::new(sensor), Box::new(NoPower));
    let mut session = AgentSession::new(
        SessionConfig::default().with_env_overrides(),
        Box::new(phone),
        Box::new(LogNotifier),
        sampler,
    );

    if let Err(e) = session.start(Instant::now()) {
        eprintln!("Failed to start session: {}", e);
        std::process::exit(1);
    }

    // Phone polls and "user" presses keys.
    let sender = events.sender();
    let driver = std::thread::spawn(move || {
        for round in 0..15usize {
            std::thread::sleep(Duration::from_millis(200));
            let key = Key::ALL[round % Key::ALL.len()];
            if sender.post(SessionEvent::KeyPressed(key.index())).is_err() {
                return;
            }
            let request = SessionEvent::DataReceived {
                peer: PeerHandle::new(PEER),
                payload: b"get".to_vec(),
            };
            if sender.post(request).is_err() {
                return;
            }
        }
        let _ = sender.shutdown();
    });

    if let Err(e) = events.run(&mut session) {
        eprintln!("Session error: {}", e);
    }
    let _ = driver.join();
}
