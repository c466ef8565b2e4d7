//! Input-to-playback bridge
//!
//! Sits between a capture source and the resolver. Operating systems repeat
//! press events while a key is held; the bridge lets one press through per
//! physical stroke and only releases that were preceded by a press.

use super::{InputEvent, InputKey};
use crate::audio::Action;
use crate::context::DaemonContext;
use crate::profile::DeviceClass;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Keys currently held down, across all devices
#[derive(Debug, Default)]
pub struct KeyDownSet {
    down: Mutex<HashSet<InputKey>>,
}

impl KeyDownSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<InputKey>> {
        match self.down.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record the event and decide whether it should sound
    ///
    /// A press of a key already down is a repeat and is rejected. A release
    /// of a key that was never seen going down is rejected too.
    pub fn admit(&self, event: &InputEvent) -> bool {
        let mut down = self.lock();
        match event.action {
            Action::Press => down.insert(event.key.clone()),
            Action::Release => down.remove(&event.key),
        }
    }

    pub fn is_down(&self, key: &InputKey) -> bool {
        self.lock().contains(key)
    }

    /// Forget every held key of one device class
    pub fn clear_device(&self, device: DeviceClass) {
        self.lock().retain(|k| k.device != device);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Forward events from a source to the daemon until the source closes
pub async fn run(mut rx: mpsc::Receiver<InputEvent>, ctx: Arc<DaemonContext>) {
    while let Some(event) = rx.recv().await {
        ctx.handle_input(&event);
    }
    tracing::debug!("Input bridge finished");
}
