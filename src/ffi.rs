//! C FFI layer for mexlink.
//!
//! The host fills a [`MexHostVtable`] with its accessory SDK, sensor, power and
//! toast calls, creates a session, then forwards SDK callbacks into the
//! `mex_on_*` functions and UI presses into `mex_key_pressed`. All calls must
//! come from the host's single event-loop thread.
//!
//! The generated C header is written to `include/mexlink.h` by cbindgen.

use crate::config::SessionConfig;
use crate::dispatch::SessionEvent;
use crate::error::LastError;
use crate::protocol;
use crate::sensor::{ListenerId, PowerLock, SampleSink, SensorId, SensorPlatform, SensorSampler};
use crate::session::AgentSession;
use crate::transport::{AccessoryTransport, Notifier};
use crate::types::{
    AccelSample, AgentHandle, AgentInitResult, AgentRole, DeliveryStatus, DeviceStatus,
    FindResult, KeyBitmap, PeerFeatures, PeerHandle, PeerStatus, SessionState, TransactionId,
    TransportType, KEY_COUNT,
};
use std::ffi::{c_char, c_int, c_void, CString};
use std::time::Instant;

/// Last error message for C consumers.
static LAST_ERROR: LastError = LastError::new();

/// Host callbacks. A NULL entry behaves as a failing call.
///
/// Handles are non-zero `uint64_t` values; zero means "none". `int` results are
/// 0 on success unless noted.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MexHostVtable {
    pub user_data: *mut c_void,
    /// Returns an agent handle, 0 on failure.
    pub create_agent: Option<extern "C" fn(*mut c_void) -> u64>,
    /// `role`: 0 = provider, 1 = consumer.
    pub initialize_agent: Option<extern "C" fn(*mut c_void, u64, *const c_char, c_int) -> c_int>,
    pub set_data_received: Option<extern "C" fn(*mut c_void, u64) -> c_int>,
    pub find_peer: Option<extern "C" fn(*mut c_void, u64) -> c_int>,
    /// Returns a `PeerFeatures` bitmap.
    pub peer_features: Option<extern "C" fn(*mut c_void, u64) -> u32>,
    /// Returns a positive transaction id, or <= 0 on failure.
    pub send_data: Option<extern "C" fn(*mut c_void, u64, *const u8, usize, bool) -> c_int>,
    pub destroy_peer: Option<extern "C" fn(*mut c_void, u64)>,
    pub show_notice: Option<extern "C" fn(*mut c_void, *const c_char)>,
    /// Returns a sensor handle, 0 if the device has no accelerometer.
    pub default_accelerometer: Option<extern "C" fn(*mut c_void) -> u64>,
    /// Returns a listener handle, 0 on failure.
    pub create_listener: Option<extern "C" fn(*mut c_void, u64) -> u64>,
    pub start_listener: Option<extern "C" fn(*mut c_void, u64) -> c_int>,
    pub stop_listener: Option<extern "C" fn(*mut c_void, u64) -> c_int>,
    pub read_listener: Option<extern "C" fn(*mut c_void, u64, *mut AccelSample) -> c_int>,
    pub destroy_listener: Option<extern "C" fn(*mut c_void, u64) -> c_int>,
    pub acquire_display: Option<extern "C" fn(*mut c_void) -> c_int>,
    pub release_display: Option<extern "C" fn(*mut c_void) -> c_int>,
}

/// Vtable copy handed to each collaborator.
#[derive(Clone, Copy)]
struct Host(MexHostVtable);

// SAFETY: the host promises every call happens on its event-loop thread, and
// `user_data` is only ever passed back to the host's own functions.
unsafe impl Send for Host {}

fn status(code: c_int, what: &str) -> Result<(), String> {
    if code == 0 {
        Ok(())
    } else {
        Err(format!("{} failed ({})", what, code))
    }
}

impl AccessoryTransport for Host {
    fn create_agent(&mut self) -> Option<AgentHandle> {
        let f = self.0.create_agent?;
        match f(self.0.user_data) {
            0 => None,
            raw => Some(AgentHandle(raw)),
        }
    }

    fn initialize_agent(
        &mut self,
        agent: AgentHandle,
        profile_id: &str,
        role: AgentRole,
    ) -> Result<(), i32> {
        let f = self.0.initialize_agent.ok_or(-1)?;
        let profile = CString::new(profile_id).map_err(|_| -1)?;
        match f(self.0.user_data, agent.0, profile.as_ptr(), role as c_int) {
            0 => Ok(()),
            code => Err(code),
        }
    }

    fn enable_data_received(&mut self, agent: AgentHandle) -> Result<(), i32> {
        let f = self.0.set_data_received.ok_or(-1)?;
        match f(self.0.user_data, agent.0) {
            0 => Ok(()),
            code => Err(code),
        }
    }

    fn find_peer(&mut self, agent: AgentHandle) -> Result<(), i32> {
        let f = self.0.find_peer.ok_or(-1)?;
        match f(self.0.user_data, agent.0) {
            0 => Ok(()),
            code => Err(code),
        }
    }

    fn peer_features(&self, peer: &PeerHandle) -> PeerFeatures {
        match self.0.peer_features {
            Some(f) => PeerFeatures::from_bits_truncate(f(self.0.user_data, peer.raw())),
            None => PeerFeatures::empty(),
        }
    }

    fn send_data(&mut self, peer: &PeerHandle, data: &[u8], secure: bool) -> i32 {
        match self.0.send_data {
            Some(f) => f(self.0.user_data, peer.raw(), data.as_ptr(), data.len(), secure),
            None => -1,
        }
    }

    fn destroy_peer(&mut self, peer: PeerHandle) {
        if let Some(f) = self.0.destroy_peer {
            f(self.0.user_data, peer.raw());
        }
    }
}

impl Notifier for Host {
    fn show_transient_notice(&mut self, text: &str) {
        if let (Some(f), Ok(text)) = (self.0.show_notice, CString::new(text)) {
            f(self.0.user_data, text.as_ptr());
        }
    }
}

impl SensorPlatform for Host {
    fn default_accelerometer(&mut self) -> Option<SensorId> {
        let f = self.0.default_accelerometer?;
        match f(self.0.user_data) {
            0 => None,
            raw => Some(SensorId(raw)),
        }
    }

    fn create_listener(&mut self, sensor: SensorId) -> Result<ListenerId, String> {
        let f = self.0.create_listener.ok_or("create_listener missing")?;
        match f(self.0.user_data, sensor.0) {
            0 => Err("create_listener failed".into()),
            raw => Ok(ListenerId(raw)),
        }
    }

    fn set_sample_sink(&mut self, _listener: ListenerId, _sink: SampleSink) -> Result<(), String> {
        // C hosts deliver ticks through mex_on_sensor_sample.
        Ok(())
    }

    fn start_listener(&mut self, listener: ListenerId) -> Result<(), String> {
        let f = self.0.start_listener.ok_or("start_listener missing")?;
        status(f(self.0.user_data, listener.0), "start_listener")
    }

    fn stop_listener(&mut self, listener: ListenerId) -> Result<(), String> {
        let f = self.0.stop_listener.ok_or("stop_listener missing")?;
        status(f(self.0.user_data, listener.0), "stop_listener")
    }

    fn read_listener(&mut self, listener: ListenerId) -> Result<AccelSample, String> {
        let f = self.0.read_listener.ok_or("read_listener missing")?;
        let mut sample = AccelSample::default();
        status(f(self.0.user_data, listener.0, &mut sample), "read_listener")?;
        Ok(sample)
    }

    fn destroy_listener(&mut self, listener: ListenerId) -> Result<(), String> {
        let f = self.0.destroy_listener.ok_or("destroy_listener missing")?;
        status(f(self.0.user_data, listener.0), "destroy_listener")
    }
}

impl PowerLock for Host {
    fn acquire_display(&mut self) -> Result<(), String> {
        let f = self.0.acquire_display.ok_or("acquire_display missing")?;
        status(f(self.0.user_data), "acquire_display")
    }

    fn release_display(&mut self) -> Result<(), String> {
        let f = self.0.release_display.ok_or("release_display missing")?;
        status(f(self.0.user_data), "release_display")
    }
}

/// Opaque session handle for C consumers.
pub struct MexSession(AgentSession);

/// Create a session over the host's callbacks with default configuration.
/// Returns NULL if `host` is NULL.
///
/// # Safety
/// `host` must point to a valid `MexHostVtable`, or be null. The vtable is copied.
#[no_mangle]
pub unsafe extern "C" fn mex_session_new(host: *const MexHostVtable) -> *mut MexSession {
    if host.is_null() {
        return std::ptr::null_mut();
    }
    let host = Host(*host);
    let sampler = SensorSampler::new(Box::new(host), Box::new(host));
    let session = AgentSession::new(
        SessionConfig::default(),
        Box::new(host),
        Box::new(host),
        sampler,
    );
    Box::into_raw(Box::new(MexSession(session)))
}

/// Start the session. Returns 0 on success, -1 on a fatal error.
///
/// # Safety
/// `session` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn mex_session_start(session: *mut MexSession) -> c_int {
    if session.is_null() {
        return -1;
    }
    let session = &mut *session;
    report(session.0.start(Instant::now()))
}

/// Run due registration retries. Call whenever `mex_session_next_retry_ms` elapses.
/// Returns 0, or -1 if registration gave up.
///
/// # Safety
/// `session` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn mex_session_poll(session: *mut MexSession) -> c_int {
    if session.is_null() {
        return -1;
    }
    let session = &mut *session;
    report(session.0.poll_timers(Instant::now()))
}

/// Milliseconds until the next registration retry, or -1 if none is pending.
///
/// # Safety
/// `session` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn mex_session_next_retry_ms(session: *const MexSession) -> c_int {
    if session.is_null() {
        return -1;
    }
    let session = &*session;
    match session.0.next_deadline() {
        Some(deadline) => {
            let wait = deadline.saturating_duration_since(Instant::now());
            wait.as_millis().min(c_int::MAX as u128) as c_int
        }
        None => -1,
    }
}

/// Session state: 0 uninitialized, 1 registering, 2 registered, 3 searching,
/// 4 peer bound, 5 peer absent.
///
/// # Safety
/// `session` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn mex_session_state(session: *const MexSession) -> c_int {
    if session.is_null() {
        return 0;
    }
    match (*session).0.state() {
        SessionState::Uninitialized => 0,
        SessionState::Registering => 1,
        SessionState::Registered => 2,
        SessionState::PeerSearching => 3,
        SessionState::PeerBound => 4,
        SessionState::PeerAbsent => 5,
    }
}

/// Finalize and free a session.
///
/// # Safety
/// `session` must be a pointer returned by `mex_session_new`, or null.
#[no_mangle]
pub unsafe extern "C" fn mex_session_free(session: *mut MexSession) {
    if !session.is_null() {
        drop(Box::from_raw(session));
    }
}

unsafe fn dispatch(session: *mut MexSession, event: SessionEvent) -> c_int {
    if session.is_null() {
        return -1;
    }
    let session = &mut *session;
    report(session.0.handle_event(event, Instant::now()))
}

/// Agent-initialized callback. `result`: 0 success, 1 duplicate,
/// 2 invalid arguments, 3 internal error.
///
/// # Safety
/// `session` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn mex_on_agent_initialized(
    session: *mut MexSession,
    result: c_int,
) -> c_int {
    dispatch(
        session,
        SessionEvent::AgentInitialized(AgentInitResult::from_code(result)),
    )
}

/// Peer discovery callback. `peer` may be 0. `status`: 0 available.
/// `result`: 0 device not connected, 1 found, 2 service not found, 3 timed out,
/// other internal error.
///
/// # Safety
/// `session` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn mex_on_peer_updated(
    session: *mut MexSession,
    peer: u64,
    status: c_int,
    result: c_int,
) -> c_int {
    dispatch(
        session,
        SessionEvent::PeerUpdated {
            peer: (peer != 0).then(|| PeerHandle::new(peer)),
            status: PeerStatus::from_code(status),
            result: FindResult::from_code(result),
        },
    )
}

/// Device status callback. `status`: 0 detached, 1 attached.
/// `transport`: 0 bluetooth.
///
/// # Safety
/// `session` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn mex_on_device_status(
    session: *mut MexSession,
    status: c_int,
    transport: c_int,
) -> c_int {
    dispatch(
        session,
        SessionEvent::DeviceStatusChanged {
            status: DeviceStatus::from_code(status),
            transport: TransportType::from_code(transport),
        },
    )
}

/// Data-received callback. Answers with the current frame and returns the
/// transaction id, or -1 if nothing was sent (see `mex_last_error`).
///
/// # Safety
/// `session` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn mex_on_data_received(session: *mut MexSession, peer: u64) -> c_int {
    if session.is_null() || peer == 0 {
        return -1;
    }
    let session = &mut *session;
    match session.0.on_data_received(PeerHandle::new(peer)) {
        Ok(TransactionId(id)) => {
            LAST_ERROR.clear();
            id
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Delivery status callback. `status`: 0 delivered, 1 failed, other unknown.
///
/// # Safety
/// `session` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn mex_on_delivery_status(
    session: *mut MexSession,
    transaction: c_int,
    status: c_int,
) -> c_int {
    dispatch(
        session,
        SessionEvent::DeliveryStatus {
            transaction: TransactionId(transaction),
            status: DeliveryStatus::from_code(status),
        },
    )
}

/// Sensor tick callback.
///
/// # Safety
/// `session` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn mex_on_sensor_sample(session: *mut MexSession, x: f32, y: f32, z: f32) {
    if session.is_null() {
        return;
    }
    (*session).0.sampler().on_sample(x, y, z);
}

/// Record a key press for slot `index` (0-6). Returns 0, or -1 if out of range.
///
/// # Safety
/// `session` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn mex_key_pressed(session: *mut MexSession, index: c_int) -> c_int {
    if session.is_null() || index < 0 {
        return -1;
    }
    report((*session).0.keypad().press(index as usize))
}

/// Encode a sample and key mask (bit i = slot i) into a 35-byte frame.
/// Returns the frame length, or -1 if `out` is too small or the text overflows.
///
/// # Safety
/// `out` must point to at least `len` writable bytes, or be null.
#[no_mangle]
pub unsafe extern "C" fn mex_encode_frame(
    sample: AccelSample,
    key_mask: u8,
    out: *mut u8,
    len: usize,
) -> c_int {
    if out.is_null() || len < protocol::FRAME_LEN {
        return -1;
    }
    let mut slots = [false; KEY_COUNT];
    for (i, slot) in slots.iter_mut().enumerate() {
        *slot = key_mask & (1 << i) != 0;
    }
    match protocol::encode_frame(&sample, &KeyBitmap::from_slots(slots)) {
        Ok(frame) => {
            std::ptr::copy_nonoverlapping(frame.as_ptr(), out, frame.len());
            frame.len() as c_int
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Get the last error message. Returns NULL if no error.
/// The returned pointer is valid until the next mexlink API call.
#[no_mangle]
pub extern "C" fn mex_last_error() -> *const c_char {
    LAST_ERROR.as_ptr()
}

fn report(result: crate::Result<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(e) => {
            if e.is_fatal() {
                log::error!("{}", e);
            }
            LAST_ERROR.set(&e);
            -1
        }
    }
}
