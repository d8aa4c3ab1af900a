use crate::types::{Key, KeyBitmap};
use crate::Result;
use std::sync::{Arc, Mutex};

/// Shared key bitmap: UI handlers press, the send path snapshots and clears.
#[derive(Debug, Clone, Default)]
pub struct KeyPad {
    state: Arc<Mutex<KeyBitmap>>,
}

impl KeyPad {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, KeyBitmap> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn press(&self, index: usize) -> Result<()> {
        self.lock().press(index)?;
        log::debug!("Key {} pressed", index);
        Ok(())
    }

    pub fn press_key(&self, key: Key) {
        self.lock().press_key(key);
        log::debug!("Key {:?} pressed", key);
    }

    pub fn snapshot(&self) -> KeyBitmap {
        *self.lock()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Forget the presses carried by a transmitted `sent` snapshot.
    pub fn clear_sent(&self, sent: &KeyBitmap) {
        self.lock().clear_sent(sent);
    }
}
