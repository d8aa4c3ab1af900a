//! # mexlink - accessory message-exchange session engine
//!
//! Relays a wearable's accelerometer reading and on-screen key presses to a
//! paired phone over an accessory message transport. Provides:
//! - Agent registration with bounded, backed-off retries
//! - Single-peer tracking across discovery and device attach/detach
//! - The fixed 35-byte `"x,y,z,keys"` text frame the phone expects
//! - C FFI so a native host can plug in its SDK, sensor and UI
//!
//! ## Quick Start
//! ```no_run
//! # fn host() -> (
//! #     Box<dyn mexlink::AccessoryTransport>,
//! #     Box<dyn mexlink::Notifier>,
//! #     Box<dyn mexlink::SensorPlatform>,
//! #     Box<dyn mexlink::PowerLock>,
//! # ) {
//! #     unimplemented!()
//! # }
//! use mexlink::{AgentSession, EventLoop, SensorSampler, SessionConfig};
//! use std::time::Instant;
//!
//! let (transport, notifier, sensor, power) = host();
//! let sampler = SensorSampler::new(sensor, power);
//! let mut session = AgentSession::new(SessionConfig::default(), transport, notifier, sampler);
//!
//! let events = EventLoop::new();
//! // hand `events.sender()` to the transport binding, then:
//! session.start(Instant::now()).unwrap();
//! events.run(&mut session).unwrap();
//! ```

pub mod error;
pub mod types;
pub mod protocol;
pub mod config;
pub mod keypad;
pub mod sensor;
pub mod transport;
pub mod registry;
pub mod channel;
pub mod dispatch;
pub mod session;
pub mod ffi;

pub use error::MexError;
pub use types::*;
pub use config::{RetryPolicy, SessionConfig};
pub use keypad::KeyPad;
pub use sensor::{PowerLock, SampleSink, SensorPlatform, SensorSampler};
pub use transport::{AccessoryTransport, LogNotifier, Notifier};
pub use registry::PeerRegistry;
pub use channel::DeliveryChannel;
pub use dispatch::{EventLoop, EventSender, SessionEvent};
pub use session::AgentSession;

/// Result type alias for mexlink operations.
pub type Result<T> = std::result::Result<T, MexError>;
