//! Keyboard and mouse capture
//!
//! On Linux under Wayland, capture happens at the kernel level through
//! evdev, which works on every compositor but needs the user to be in the
//! 'input' group. Elsewhere rdev hooks the display server.
//!
//! Every source reports canonical key names (see [`keys`]) for one device
//! class. The [`bridge`] suppresses key repeats before events reach a
//! resolver.

pub mod bridge;
pub mod channel;
#[cfg(target_os = "linux")]
pub mod evdev_source;
pub mod keys;
pub mod rdev_source;

use crate::audio::Action;
use crate::config::InputBackend;
use crate::error::InputError;
use crate::profile::DeviceClass;
use tokio::sync::mpsc;

/// Capacity of the channel between a capture thread and its bridge
pub(crate) const EVENT_BUFFER: usize = 256;

/// A key or button identified by device class and canonical name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputKey {
    pub device: DeviceClass,
    pub name: String,
}

impl InputKey {
    pub fn new(device: DeviceClass, name: impl Into<String>) -> Self {
        Self {
            device,
            name: name.into().to_lowercase(),
        }
    }
}

/// A press or release of a key or button
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEvent {
    pub key: InputKey,
    pub action: Action,
}

impl InputEvent {
    pub fn press(device: DeviceClass, name: &str) -> Self {
        Self {
            key: InputKey::new(device, name),
            action: Action::Press,
        }
    }

    pub fn release(device: DeviceClass, name: &str) -> Self {
        Self {
            key: InputKey::new(device, name),
            action: Action::Release,
        }
    }
}

/// Trait for input capture implementations
#[async_trait::async_trait]
pub trait InputSource: Send + Sync {
    /// Start capturing events
    /// Returns a channel receiver for events
    async fn start(&mut self) -> Result<mpsc::Receiver<InputEvent>, InputError>;

    /// Stop capturing and clean up
    async fn stop(&mut self) -> Result<(), InputError>;

    /// Backend name for logging
    fn backend(&self) -> &'static str;
}

/// Whether the current session looks like Wayland
pub fn is_wayland_session() -> bool {
    std::env::var_os("WAYLAND_DISPLAY").is_some()
        || std::env::var("XDG_SESSION_TYPE")
            .map(|t| t.eq_ignore_ascii_case("wayland"))
            .unwrap_or(false)
}

/// Factory function to create the capture source for a device class
///
/// `Auto` prefers evdev under Wayland (where display-server hooks see
/// nothing) and falls back to rdev if no evdev device can be used.
pub fn create_source(
    backend: InputBackend,
    device: DeviceClass,
) -> Result<Box<dyn InputSource>, InputError> {
    match backend {
        InputBackend::Rdev => Ok(Box::new(rdev_source::RdevSource::new(device))),
        InputBackend::Evdev => create_evdev(device),
        InputBackend::Auto => {
            if is_wayland_session() {
                match create_evdev(device) {
                    Ok(source) => return Ok(source),
                    Err(e) => tracing::warn!(
                        "evdev capture unavailable for {} ({}), falling back to rdev",
                        device,
                        e
                    ),
                }
            }
            Ok(Box::new(rdev_source::RdevSource::new(device)))
        }
    }
}

#[cfg(target_os = "linux")]
fn create_evdev(device: DeviceClass) -> Result<Box<dyn InputSource>, InputError> {
    Ok(Box::new(evdev_source::EvdevSource::new(device)?))
}

#[cfg(not(target_os = "linux"))]
fn create_evdev(_device: DeviceClass) -> Result<Box<dyn InputSource>, InputError> {
    Err(InputError::Unsupported("evdev".to_string()))
}
