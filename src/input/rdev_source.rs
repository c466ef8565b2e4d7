//! rdev-based input capture
//!
//! `rdev::listen` blocks its thread forever and has no shutdown API, so the
//! process installs a single hook on first use and fans events out to the
//! currently registered sources. Stopping a source unregisters it; the hook
//! thread itself lives until the process exits.

use super::keys::{rdev_button_name, rdev_key_name};
use super::{InputEvent, InputKey, InputSource, EVENT_BUFFER};
use crate::audio::Action;
use crate::error::InputError;
use crate::profile::DeviceClass;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use tokio::sync::mpsc;

struct Subscriber {
    id: u64,
    device: DeviceClass,
    tx: mpsc::Sender<InputEvent>,
}

static SUBSCRIBERS: Mutex<Vec<Subscriber>> = Mutex::new(Vec::new());
static HOOK: OnceLock<Result<(), String>> = OnceLock::new();
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Captures one device class through the shared rdev hook
pub struct RdevSource {
    device: DeviceClass,
    id: Option<u64>,
}

impl RdevSource {
    pub fn new(device: DeviceClass) -> Self {
        Self { device, id: None }
    }
}

#[async_trait::async_trait]
impl InputSource for RdevSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<InputEvent>, InputError> {
        ensure_hook()?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        lock_subscribers().push(Subscriber {
            id,
            device: self.device,
            tx,
        });
        self.id = Some(id);

        tracing::info!("Capturing {} events via rdev", self.device);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), InputError> {
        if let Some(id) = self.id.take() {
            lock_subscribers().retain(|s| s.id != id);
            tracing::debug!("{} capture stopping", self.device);
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "rdev"
    }
}

impl Drop for RdevSource {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            lock_subscribers().retain(|s| s.id != id);
        }
    }
}

fn lock_subscribers() -> std::sync::MutexGuard<'static, Vec<Subscriber>> {
    match SUBSCRIBERS.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Spawn the hook thread once per process
fn ensure_hook() -> Result<(), InputError> {
    HOOK.get_or_init(|| {
        std::thread::Builder::new()
            .name("rdev-hook".into())
            .spawn(|| {
                if let Err(e) = rdev::listen(dispatch) {
                    tracing::error!("rdev::listen exited with error: {:?}", e);
                }
            })
            .map(|_| ())
            .map_err(|e| e.to_string())
    })
    .clone()
    .map_err(InputError::Capture)
}

/// Translate an rdev event into a canonical one
fn translate(event: &rdev::Event) -> Option<InputEvent> {
    let (device, name, action) = match event.event_type {
        rdev::EventType::KeyPress(k) => (DeviceClass::Keyboard, rdev_key_name(k)?, Action::Press),
        rdev::EventType::KeyRelease(k) => {
            (DeviceClass::Keyboard, rdev_key_name(k)?, Action::Release)
        }
        rdev::EventType::ButtonPress(b) => (DeviceClass::Mouse, rdev_button_name(b)?, Action::Press),
        rdev::EventType::ButtonRelease(b) => {
            (DeviceClass::Mouse, rdev_button_name(b)?, Action::Release)
        }
        _ => return None,
    };

    Some(InputEvent {
        key: InputKey::new(device, name),
        action,
    })
}

fn dispatch(event: rdev::Event) {
    let Some(event) = translate(&event) else {
        return;
    };

    let subscribers = lock_subscribers();
    for subscriber in subscribers.iter().filter(|s| s.device == event.key.device) {
        // Never block the OS hook; a full buffer drops the event
        if subscriber.tx.try_send(event.clone()).is_err() {
            tracing::trace!("Dropped {:?} event, bridge is behind", event.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn event(event_type: rdev::EventType) -> rdev::Event {
        rdev::Event {
            time: SystemTime::now(),
            name: None,
            event_type,
        }
    }

    #[test]
    fn test_translate_keys_and_buttons() {
        let press = translate(&event(rdev::EventType::KeyPress(rdev::Key::Space))).unwrap();
        assert_eq!(press, InputEvent::press(DeviceClass::Keyboard, "space"));

        let release =
            translate(&event(rdev::EventType::ButtonRelease(rdev::Button::Right))).unwrap();
        assert_eq!(release, InputEvent::release(DeviceClass::Mouse, "right"));

        assert!(translate(&event(rdev::EventType::MouseMove { x: 1.0, y: 2.0 })).is_none());
        assert!(translate(&event(rdev::EventType::KeyPress(rdev::Key::Unknown(7)))).is_none());
    }
}
