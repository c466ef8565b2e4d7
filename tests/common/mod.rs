//! Shared fixtures for the integration tests
//!
//! Profiles are generated on the fly with hound so every test gets its own
//! storage root. Each asset has a distinct length, which is how tests tell
//! which clip was played.

#![allow(dead_code)]

use keyclack::audio::extract::ClipExtractor;
use keyclack::audio::output::RecordingOutput;
use keyclack::context::{ContextParts, DaemonContext, SourceFactory};
use keyclack::error::InputError;
use keyclack::input::channel::{ChannelSource, InputInjector};
use keyclack::input::InputSource;
use keyclack::profile::{DeviceClass, ProfileStore};
use keyclack::state::StateFile;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const KEY_FRAMES: usize = 100;
pub const SPACE_DOWN_FRAMES: usize = 200;
pub const SPACE_UP_FRAMES: usize = 300;
pub const CLICK_FRAMES: usize = 50;

pub fn write_wav(path: &Path, frames: usize) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        writer.write_sample(((i % 64) as i16 - 32) * 256).unwrap();
    }
    writer.finalize().unwrap();
}

/// Keyboard profile: `key` for everything, a press/release pair for space
pub fn write_ios_profile(profiles: &Path) {
    let dir = profiles.join("ios");
    fs::create_dir_all(&dir).unwrap();
    write_wav(&dir.join("key.wav"), KEY_FRAMES);
    write_wav(&dir.join("space_down.wav"), SPACE_DOWN_FRAMES);
    write_wav(&dir.join("space_up.wav"), SPACE_UP_FRAMES);
    fs::write(
        dir.join("profile.yaml"),
        r#"profile:
  name: ios
  author: Apple
  description: iPhone keyboard
sources:
  - id: key
    source: key.wav
  - id: space
    source:
      press: space_down.wav
      release: space_up.wav
keys:
  default: key
  other:
    - keys: [space]
      sound: space
"#,
    )
    .unwrap();
}

pub fn write_mouse_profile(profiles: &Path) {
    let dir = profiles.join("clicky");
    fs::create_dir_all(&dir).unwrap();
    write_wav(&dir.join("click.wav"), CLICK_FRAMES);
    fs::write(
        dir.join("profile.yaml"),
        r#"profile:
  name: clicky
  device: mouse
sources:
  - id: click
    source: click.wav
buttons:
  default: click
"#,
    )
    .unwrap();
}

/// A storage root with both fixture profiles installed
pub fn storage_root() -> tempfile::TempDir {
    let tmp = tempfile::tempdir().unwrap();
    let profiles = tmp.path().join("profiles");
    write_ios_profile(&profiles);
    write_mouse_profile(&profiles);
    tmp
}

/// Source factory handing out channel sources, keeping their injectors
#[derive(Clone, Default)]
pub struct Injectors {
    by_device: Arc<Mutex<HashMap<DeviceClass, InputInjector>>>,
}

impl Injectors {
    pub fn factory(&self) -> SourceFactory {
        let by_device = Arc::clone(&self.by_device);
        Arc::new(move |device: DeviceClass| -> Result<Box<dyn InputSource>, InputError> {
            let source = ChannelSource::new();
            by_device.lock().unwrap().insert(device, source.injector());
            Ok(Box::new(source))
        })
    }

    pub fn get(&self, device: DeviceClass) -> InputInjector {
        self.by_device
            .lock()
            .unwrap()
            .get(&device)
            .cloned()
            .unwrap_or_else(|| panic!("no {} source was started", device))
    }
}

pub struct Harness {
    pub root: tempfile::TempDir,
    pub ctx: Arc<DaemonContext>,
    pub output: RecordingOutput,
    pub injectors: Injectors,
}

/// A context over a fresh storage root, playing into a recording output
pub fn harness(volume: u8) -> Harness {
    let root = storage_root();
    let output = RecordingOutput::new();
    let injectors = Injectors::default();

    let ctx = DaemonContext::new(ContextParts {
        pid: std::process::id(),
        store: ProfileStore::new(root.path().join("profiles")),
        extractor: ClipExtractor::new(),
        state_file: StateFile::new(root.path().join("daemon.json")),
        output: Arc::new(output.clone()),
        // One worker keeps playback in queue order
        workers: 1,
        volume,
        source_factory: injectors.factory(),
        window: None,
    })
    .unwrap();

    Harness {
        root,
        ctx,
        output,
        injectors,
    }
}

/// Poll until `cond` holds or five seconds pass
pub async fn wait_until<F: FnMut() -> bool>(mut cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
