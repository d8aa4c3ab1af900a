use crate::types::AgentInitResult;
use std::fmt;

/// Errors raised by the accessory session engine.
#[derive(Debug, thiserror::Error)]
pub enum MexError {
    #[error("Failed to allocate accessory agent")]
    AllocationFailure,

    #[error("Agent registration rejected: {0:?}")]
    RegistrationRejected(AgentInitResult),

    #[error("Agent registration call failed (result {0})")]
    RegistrationCall(i32),

    #[error("Agent registration gave up after {attempts} attempts")]
    RegistrationExhausted { attempts: u32 },

    #[error("Message feature is not supported by the peer")]
    CapabilityUnsupported,

    #[error("Transport rejected send (result {0})")]
    SendRejected(i32),

    #[error("No peer agent bound")]
    NoPeer,

    #[error("No default accelerometer on this device")]
    SensorUnavailable,

    #[error("Sensor listener error: {0}")]
    ListenerError(String),

    #[error("Encoded payload is {len} bytes, frame holds {}", crate::protocol::FRAME_LEN)]
    EncodingOverflow { len: usize },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Key index {0} out of range")]
    InvalidKey(usize),

    #[error("Session closed")]
    SessionClosed,
}

impl MexError {
    /// Errors that end the session and must reach the hosting application.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MexError::AllocationFailure
                | MexError::SensorUnavailable
                | MexError::ListenerError(_)
                | MexError::RegistrationExhausted { .. }
        )
    }
}

/// Thread-safe last-error storage for the C FFI layer.
pub(crate) struct LastError {
    message: std::sync::Mutex<String>,
}

impl LastError {
    pub const fn new() -> Self {
        Self {
            message: std::sync::Mutex::new(String::new()),
        }
    }

    pub fn set(&self, err: &MexError) {
        if let Ok(mut msg) = self.message.lock() {
            *msg = fmt::format(format_args!("{}\0", err));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut msg) = self.message.lock() {
            msg.clear();
        }
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_char {
        match self.message.lock() {
            Ok(msg) if !msg.is_empty() => msg.as_ptr() as *const std::ffi::c_char,
            _ => std::ptr::null(),
        }
    }
}
