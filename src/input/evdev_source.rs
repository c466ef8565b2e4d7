//! evdev-based input capture
//!
//! Uses the Linux evdev interface to read key and button events at the
//! kernel level. This works on all Wayland compositors because it bypasses
//! the display server.
//!
//! The user must be in the 'input' group to access /dev/input/* devices.

use super::keys::{evdev_is_button, evdev_key_name};
use super::{InputEvent, InputKey, InputSource, EVENT_BUFFER};
use crate::audio::Action;
use crate::error::InputError;
use crate::profile::DeviceClass;
use evdev::{Device, InputEventKind, Key, RelativeAxisType};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};

/// Captures one device class from every matching /dev/input device
pub struct EvdevSource {
    device: DeviceClass,
    device_paths: Vec<PathBuf>,
    stop_signal: Option<oneshot::Sender<()>>,
}

impl EvdevSource {
    pub fn new(device: DeviceClass) -> Result<Self, InputError> {
        let device_paths = find_devices(device)?;

        if device_paths.is_empty() {
            return Err(InputError::NoDevice(device.to_string()));
        }

        tracing::debug!(
            "Found {} {} device(s): {:?}",
            device_paths.len(),
            device,
            device_paths
        );

        Ok(Self {
            device,
            device_paths,
            stop_signal: None,
        })
    }
}

#[async_trait::async_trait]
impl InputSource for EvdevSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<InputEvent>, InputError> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop_signal = Some(stop_tx);

        let device = self.device;
        let device_paths = self.device_paths.clone();

        tokio::task::spawn_blocking(move || {
            capture_loop(device, device_paths, tx, stop_rx);
        });

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), InputError> {
        if let Some(stop) = self.stop_signal.take() {
            let _ = stop.send(());
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "evdev"
    }
}

/// Main capture loop running in a blocking task
fn capture_loop(
    device_class: DeviceClass,
    device_paths: Vec<PathBuf>,
    tx: mpsc::Sender<InputEvent>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    // Open all devices in non-blocking mode
    let mut devices: Vec<Device> = device_paths
        .iter()
        .filter_map(|path| match Device::open(path) {
            Ok(device) => {
                let fd = device.as_raw_fd();
                unsafe {
                    let flags = libc::fcntl(fd, libc::F_GETFL);
                    if flags != -1 {
                        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
                    }
                }
                tracing::debug!("Opened device (non-blocking): {:?}", path);
                Some(device)
            }
            Err(e) => {
                tracing::warn!("Failed to open {:?}: {}", path, e);
                None
            }
        })
        .collect();

    if devices.is_empty() {
        tracing::error!("No {} devices could be opened", device_class);
        return;
    }

    tracing::info!(
        "Capturing {} events from {} device(s)",
        device_class,
        devices.len()
    );

    loop {
        match stop_rx.try_recv() {
            Ok(_) | Err(oneshot::error::TryRecvError::Closed) => {
                tracing::debug!("{} capture stopping", device_class);
                return;
            }
            Err(oneshot::error::TryRecvError::Empty) => {}
        }

        for device in &mut devices {
            // Returns immediately when nothing is pending
            let Ok(events) = device.fetch_events() else {
                continue;
            };
            for event in events {
                let InputEventKind::Key(key) = event.kind() else {
                    continue;
                };
                let action = match event.value() {
                    1 => Action::Press,
                    0 => Action::Release,
                    _ => continue, // autorepeat
                };
                let is_button = evdev_is_button(key);
                if is_button != (device_class == DeviceClass::Mouse) {
                    continue;
                }
                let Some(name) = evdev_key_name(key) else {
                    tracing::trace!("Ignoring unmapped code {:?}", key);
                    continue;
                };

                let event = InputEvent {
                    key: InputKey::new(device_class, name),
                    action,
                };
                if tx.blocking_send(event).is_err() {
                    return; // Channel closed
                }
            }
        }

        // Small sleep to avoid busy-waiting
        std::thread::sleep(std::time::Duration::from_millis(2));
    }
}

/// Find all input devices of the given class
fn find_devices(device_class: DeviceClass) -> Result<Vec<PathBuf>, InputError> {
    let mut found = Vec::new();

    let input_dir = std::fs::read_dir("/dev/input")
        .map_err(|e| InputError::DeviceAccess(format!("/dev/input: {}", e)))?;

    for entry in input_dir {
        let entry = entry.map_err(|e| InputError::DeviceAccess(e.to_string()))?;
        let path = entry.path();

        let is_event_device = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("event"))
            .unwrap_or(false);

        if !is_event_device {
            continue;
        }

        match Device::open(&path) {
            Ok(device) => {
                let matches = match device_class {
                    DeviceClass::Keyboard => device
                        .supported_keys()
                        .map(|keys| {
                            keys.contains(Key::KEY_A)
                                && keys.contains(Key::KEY_Z)
                                && keys.contains(Key::KEY_ENTER)
                        })
                        .unwrap_or(false),
                    DeviceClass::Mouse => {
                        let has_buttons = device
                            .supported_keys()
                            .map(|keys| keys.contains(Key::BTN_LEFT))
                            .unwrap_or(false);
                        let has_motion = device
                            .supported_relative_axes()
                            .map(|axes| axes.contains(RelativeAxisType::REL_X))
                            .unwrap_or(false);
                        has_buttons && has_motion
                    }
                };

                if matches {
                    tracing::debug!(
                        "Found {}: {:?} ({:?})",
                        device_class,
                        path,
                        device.name().unwrap_or("unknown")
                    );
                    found.push(path);
                }
            }
            Err(e) => {
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    return Err(InputError::DeviceAccess(path.display().to_string()));
                }
                tracing::trace!("Skipping {:?}: {}", path, e);
            }
        }
    }

    Ok(found)
}
