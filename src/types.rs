use crate::{MexError, Result};

/// Number of slots in the key bitmap.
pub const KEY_COUNT: usize = 7;

/// One 3-axis accelerometer reading, in m/s².
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AccelSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl AccelSample {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// On-watch buttons and the bitmap slot each one sets.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Left = 0,
    Right = 1,
    Up = 2,
    Down = 3,
    A = 4,
    B = 5,
}

impl Key {
    pub const ALL: [Key; 6] = [Key::Left, Key::Right, Key::Up, Key::Down, Key::A, Key::B];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Pressed/not-pressed state of every key since the last transmission.
/// Slot 6 is reserved and never set by a named key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyBitmap([bool; KEY_COUNT]);

impl KeyBitmap {
    pub const fn new() -> Self {
        Self([false; KEY_COUNT])
    }

    /// Mark slot `index` as pressed.
    pub fn press(&mut self, index: usize) -> Result<()> {
        let slot = self.0.get_mut(index).ok_or(MexError::InvalidKey(index))?;
        *slot = true;
        Ok(())
    }

    pub fn press_key(&mut self, key: Key) {
        self.0[key.index()] = true;
    }

    pub fn is_pressed(&self, index: usize) -> bool {
        self.0.get(index).copied().unwrap_or(false)
    }

    /// Reset every slot to "not pressed".
    pub fn clear(&mut self) {
        self.0 = [false; KEY_COUNT];
    }

    pub fn is_clear(&self) -> bool {
        self.0.iter().all(|pressed| !pressed)
    }

    /// Reset only the slots set in `sent`; presses recorded since stay.
    pub fn clear_sent(&mut self, sent: &KeyBitmap) {
        for (slot, was_sent) in self.0.iter_mut().zip(sent.0) {
            *slot &= !was_sent;
        }
    }

    pub fn slots(&self) -> &[bool; KEY_COUNT] {
        &self.0
    }

    pub fn from_slots(slots: [bool; KEY_COUNT]) -> Self {
        Self(slots)
    }
}

/// Local agent handle allocated by the accessory transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AgentHandle(pub u64);

/// Handle to a remote peer agent.
///
/// Not `Clone`: exactly one owner holds a live handle, and releasing it hands it
/// back to the transport by value.
#[must_use]
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct PeerHandle(u64);

impl PeerHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Correlation id returned by a send, echoed in the later delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub i32);

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags::bitflags! {
    /// Capabilities advertised by a peer agent's framework.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(C)]
    pub struct PeerFeatures: u32 {
        const MESSAGE = 1 << 0;
        const SOCKET  = 1 << 1;
    }
}

/// Role the local agent registers under.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    Provider = 0,
    Consumer = 1,
}

/// Outcome of the asynchronous agent-initialized callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentInitResult {
    Success,
    Duplicated,
    InvalidArguments,
    InternalError,
    Unknown(i32),
}

impl AgentInitResult {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::Duplicated,
            2 => Self::InvalidArguments,
            3 => Self::InternalError,
            other => Self::Unknown(other),
        }
    }
}

/// Availability reported alongside a discovered peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Available,
    Unavailable,
}

impl PeerStatus {
    pub fn from_code(code: i32) -> Self {
        if code == 0 {
            Self::Available
        } else {
            Self::Unavailable
        }
    }
}

/// Result of a peer discovery request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindResult {
    DeviceNotConnected,
    Found,
    ServiceNotFound,
    TimedOut,
    InternalError,
}

impl FindResult {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::DeviceNotConnected,
            1 => Self::Found,
            2 => Self::ServiceNotFound,
            3 => Self::TimedOut,
            _ => Self::InternalError,
        }
    }
}

/// Accessory device connectivity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Detached,
    Attached,
    Unknown(i32),
}

impl DeviceStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Detached,
            1 => Self::Attached,
            other => Self::Unknown(other),
        }
    }
}

/// Link carrying the accessory connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    Bluetooth,
    Other(i32),
}

impl TransportType {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Bluetooth,
            other => Self::Other(other),
        }
    }
}

/// Delivery outcome reported for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    Failed,
    Unknown,
}

impl DeliveryStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Delivered,
            1 => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

/// Lifecycle of the local agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Registering,
    Registered,
    PeerSearching,
    PeerBound,
    PeerAbsent,
}

impl SessionState {
    /// True once registration has succeeded, whatever the peer sub-state.
    pub fn is_registered(self) -> bool {
        matches!(
            self,
            SessionState::Registered
                | SessionState::PeerSearching
                | SessionState::PeerBound
                | SessionState::PeerAbsent
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_bitmap_press_and_clear() {
        let mut keys = KeyBitmap::new();
        assert!(keys.is_clear());
        keys.press(0).unwrap();
        keys.press_key(Key::B);
        assert!(keys.is_pressed(0));
        assert!(keys.is_pressed(5));
        assert!(!keys.is_pressed(6));
        keys.clear();
        assert!(keys.is_clear());
    }

    #[test]
    fn test_key_bitmap_rejects_out_of_range() {
        let mut keys = KeyBitmap::new();
        assert!(matches!(keys.press(KEY_COUNT), Err(MexError::InvalidKey(7))));
        assert!(keys.is_clear());
    }

    #[test]
    fn test_key_indices() {
        let indices: Vec<usize> = Key::ALL.iter().map(|k| k.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_registered_states() {
        assert!(!SessionState::Uninitialized.is_registered());
        assert!(!SessionState::Registering.is_registered());
        assert!(SessionState::PeerBound.is_registered());
        assert!(SessionState::PeerAbsent.is_registered());
    }
}
