//! Shared daemon context
//!
//! One [`DaemonContext`] per daemon process, shared by `Arc` between the
//! input bridges, the control server and the main loop. It owns the
//! per-device resolvers, the playback pipeline and its settings, the running
//! capture sources and the state record.
//!
//! Reconfiguration commands are serialized by an async mutex so the state
//! record always matches the settings that were last applied.

use crate::audio::extract::ClipExtractor;
use crate::audio::output::AudioOutput;
use crate::audio::pitch::{PitchRange, MAX_SEMITONES};
use crate::error::{InputError, KeyclackError, ProfileError, ProtocolError, Result};
use crate::input::bridge::{self, KeyDownSet};
use crate::input::{InputEvent, InputSource};
use crate::playback::{PitchSettings, PlaybackPipeline, PlaybackSettings, SharedSettings};
use crate::profile::{DeviceClass, ProfileStore};
use crate::resolver::SoundResolver;
use crate::state::{DaemonState, PitchShiftRecord, StateFile};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// How long a stopped input bridge gets to finish before it is aborted
const BRIDGE_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// How long playback workers get to drain on shutdown
const PIPELINE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Creates capture sources for a device class
pub type SourceFactory =
    Arc<dyn Fn(DeviceClass) -> std::result::Result<Box<dyn InputSource>, InputError> + Send + Sync>;

/// The daemon's optional on-screen window
///
/// No implementation ships with the daemon; embedders that have one can
/// register it so `show_daemon_window` works.
pub trait DaemonWindow: Send + Sync {
    fn show(&self) -> Result<()>;
}

/// Everything needed to build a context
pub struct ContextParts {
    pub pid: u32,
    pub store: ProfileStore,
    pub extractor: ClipExtractor,
    pub state_file: StateFile,
    pub output: Arc<dyn AudioOutput>,
    pub workers: usize,
    pub volume: u8,
    pub source_factory: SourceFactory,
    pub window: Option<Arc<dyn DaemonWindow>>,
}

struct Listener {
    source: Box<dyn InputSource>,
    task: JoinHandle<()>,
}

/// Shared state of a running daemon
pub struct DaemonContext {
    pid: u32,
    store: ProfileStore,
    extractor: ClipExtractor,
    state_file: StateFile,
    settings: Arc<SharedSettings>,
    pipeline: PlaybackPipeline,
    keyboard: RwLock<Option<Arc<SoundResolver>>>,
    mouse: RwLock<Option<Arc<SoundResolver>>>,
    down: KeyDownSet,
    /// Shared with every resolver this context builds
    enabled: Arc<AtomicBool>,
    api_port: AtomicU16,
    listeners: Mutex<HashMap<DeviceClass, Listener>>,
    reconfigure: Mutex<()>,
    source_factory: SourceFactory,
    window: Option<Arc<dyn DaemonWindow>>,
    shutdown_tx: watch::Sender<bool>,
}

impl DaemonContext {
    pub fn new(parts: ContextParts) -> Result<Arc<Self>> {
        let settings = Arc::new(SharedSettings::new(PlaybackSettings {
            volume: parts.volume.min(100),
            ..Default::default()
        }));
        let pipeline = PlaybackPipeline::start(parts.workers, parts.output, Arc::clone(&settings))?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Arc::new(Self {
            pid: parts.pid,
            store: parts.store,
            extractor: parts.extractor,
            state_file: parts.state_file,
            settings,
            pipeline,
            keyboard: RwLock::new(None),
            mouse: RwLock::new(None),
            down: KeyDownSet::new(),
            enabled: Arc::new(AtomicBool::new(true)),
            api_port: AtomicU16::new(0),
            listeners: Mutex::new(HashMap::new()),
            reconfigure: Mutex::new(()),
            source_factory: parts.source_factory,
            window: parts.window,
            shutdown_tx,
        }))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn pipeline(&self) -> &PlaybackPipeline {
        &self.pipeline
    }

    pub fn settings(&self) -> Arc<PlaybackSettings> {
        self.settings.snapshot()
    }

    pub fn key_down_set(&self) -> &KeyDownSet {
        &self.down
    }

    pub fn state_file(&self) -> &StateFile {
        &self.state_file
    }

    pub fn set_api_port(&self, port: u16) {
        self.api_port.store(port, Ordering::Release);
    }

    pub fn api_port(&self) -> u16 {
        self.api_port.load(Ordering::Acquire)
    }

    fn slot(&self, device: DeviceClass) -> &RwLock<Option<Arc<SoundResolver>>> {
        match device {
            DeviceClass::Keyboard => &self.keyboard,
            DeviceClass::Mouse => &self.mouse,
        }
    }

    /// The active resolver for a device class
    pub fn resolver(&self, device: DeviceClass) -> Option<Arc<SoundResolver>> {
        match self.slot(device).read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace_resolver(&self, device: DeviceClass, resolver: Option<Arc<SoundResolver>>) {
        let mut guard = match self.slot(device).write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = resolver;
    }

    /// Route one captured event to playback
    pub fn handle_input(&self, event: &InputEvent) {
        if !self.down.admit(event) {
            return;
        }

        let device = event.key.device;
        let clip = self
            .resolver(device)
            .and_then(|r| r.get_sound(&event.key, event.action));

        tracing::trace!("{:?} {:?} -> {}", event.action, event.key, clip.is_some());
        if clip.is_some() {
            self.pipeline.enqueue(clip, device);
        }
    }

    /// Snapshot of the state record
    pub fn state(&self) -> DaemonState {
        let settings = self.settings.snapshot();
        DaemonState {
            pid: self.pid,
            volume: settings.volume,
            profile: settings.keyboard_profile.clone(),
            mouse_profile: settings.mouse_profile.clone(),
            pitch_shift: settings.pitch.as_ref().map(|p| PitchShiftRecord {
                lower: p.range.lower,
                upper: p.range.upper,
                profile: p.scope.clone(),
            }),
            api_port: self.api_port(),
        }
    }

    /// Write the state record, logging failures
    pub fn persist(&self) {
        if let Err(e) = self.state_file.write(&self.state()) {
            tracing::warn!("Failed to write state file {:?}: {}", self.state_file.path(), e);
        }
    }

    /// Set the playback volume (0-100)
    pub async fn set_volume(&self, volume: u32) -> Result<()> {
        if volume > 100 {
            return Err(ProtocolError::Command(format!(
                "volume must be between 0 and 100, got {}",
                volume
            ))
            .into());
        }

        let _guard = self.reconfigure.lock().await;
        self.settings.update(|s| s.volume = volume as u8);
        self.persist();
        tracing::info!("Volume set to {}", volume);
        Ok(())
    }

    /// Switch the profile for a device class; an empty name disables it
    pub async fn set_profile(self: &Arc<Self>, device: DeviceClass, name: &str) -> Result<()> {
        let _guard = self.reconfigure.lock().await;
        let name = name.trim();

        if name.is_empty() {
            self.stop_listener(device).await;
            self.replace_resolver(device, None);
            self.down.clear_device(device);
            self.pipeline.invalidate_cache();
            self.settings.update(|s| match device {
                DeviceClass::Keyboard => s.keyboard_profile = None,
                DeviceClass::Mouse => s.mouse_profile = None,
            });
            self.persist();
            tracing::info!("{} sounds disabled", device);
            return Ok(());
        }

        let resolver = self.load_resolver(device, name).await?;

        self.replace_resolver(device, Some(Arc::new(resolver)));
        self.down.clear_device(device);
        self.pipeline.invalidate_cache();
        let profile = name.to_string();
        self.settings.update(|s| match device {
            DeviceClass::Keyboard => s.keyboard_profile = Some(profile),
            DeviceClass::Mouse => s.mouse_profile = Some(profile),
        });

        if let Err(e) = self.ensure_listener(device).await {
            tracing::warn!("{} capture unavailable, sounds will stay silent: {}", device, e);
        }

        self.persist();
        tracing::info!("{} profile set to '{}'", device, name);
        Ok(())
    }

    /// Load, check and prime a profile off the async runtime
    async fn load_resolver(&self, device: DeviceClass, name: &str) -> Result<SoundResolver> {
        let store = self.store.clone();
        let extractor = self.extractor.clone();
        let enabled = Arc::clone(&self.enabled);
        let name = name.to_string();

        tokio::task::spawn_blocking(move || -> Result<SoundResolver> {
            let profile = store.load(&name)?;
            if profile.device() != device {
                return Err(ProfileError::invalid(
                    &name,
                    format!("It is a {} profile, not a {} profile.", profile.device(), device),
                )
                .into());
            }
            let clips = extractor.prime(&profile);
            Ok(SoundResolver::with_gate(profile, clips, enabled))
        })
        .await
        .map_err(|e| KeyclackError::Config(format!("Profile loading task failed: {}", e)))?
    }

    /// Configure pitch shifting
    ///
    /// `semitones` is `"lo,hi"`; an empty string disables the shift. An empty
    /// or missing `profile` applies it to every profile.
    pub async fn set_pitch_shift(&self, semitones: &str, profile: Option<&str>) -> Result<()> {
        let pitch = if semitones.trim().is_empty() {
            None
        } else {
            let range = PitchRange::parse(semitones).ok_or_else(|| {
                ProtocolError::Command(format!(
                    "semitones must look like \"lo,hi\" with both between -{max} and {max}, got \"{}\"",
                    semitones,
                    max = MAX_SEMITONES
                ))
            })?;
            Some(PitchSettings {
                range,
                scope: profile.filter(|p| !p.is_empty()).map(str::to_string),
            })
        };

        let _guard = self.reconfigure.lock().await;
        match &pitch {
            Some(p) => tracing::info!(
                "Pitch shift set to {} semitones ({})",
                p.range,
                p.scope.as_deref().unwrap_or("all profiles")
            ),
            None => tracing::info!("Pitch shift disabled"),
        }
        self.settings.update(|s| s.pitch = pitch);
        self.persist();
        Ok(())
    }

    /// Gate all sounds without unloading profiles
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        tracing::info!("Sounds {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn show_daemon_window(&self) -> Result<()> {
        match &self.window {
            Some(window) => window.show(),
            None => Err(KeyclackError::Config(
                "No daemon window is available in this build".to_string(),
            )),
        }
    }

    /// Start capturing a device class if nothing is capturing it yet
    async fn ensure_listener(self: &Arc<Self>, device: DeviceClass) -> Result<()> {
        let mut listeners = self.listeners.lock().await;
        if let Some(existing) = listeners.get(&device) {
            if !existing.task.is_finished() {
                return Ok(());
            }
        }
        if let Some(stale) = listeners.remove(&device) {
            let mut source = stale.source;
            let _ = source.stop().await;
        }

        let mut source = (self.source_factory)(device)?;
        let rx = source.start().await?;
        let task = tokio::spawn(bridge::run(rx, Arc::clone(self)));
        tracing::info!("Started {} capture ({})", device, source.backend());
        listeners.insert(device, Listener { source, task });
        Ok(())
    }

    async fn stop_listener(&self, device: DeviceClass) {
        let listener = self.listeners.lock().await.remove(&device);
        if let Some(listener) = listener {
            stop(device, listener).await;
        }
    }

    /// Whether a capture source is running for the device class
    pub async fn is_listening(&self, device: DeviceClass) -> bool {
        self.listeners
            .lock()
            .await
            .get(&device)
            .map(|l| !l.task.is_finished())
            .unwrap_or(false)
    }

    /// Ask the main loop to shut down
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn shutdown_requested(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Stop capture and drain playback
    pub async fn shutdown(&self) {
        let listeners: Vec<_> = self.listeners.lock().await.drain().collect();
        for (device, listener) in listeners {
            stop(device, listener).await;
        }

        self.pipeline.shutdown(PIPELINE_DRAIN_TIMEOUT);
    }
}

async fn stop(device: DeviceClass, listener: Listener) {
    let Listener { mut source, task } = listener;
    if let Err(e) = source.stop().await {
        tracing::warn!("Failed to stop {} capture: {}", device, e);
    }

    let abort = task.abort_handle();
    if tokio::time::timeout(BRIDGE_JOIN_TIMEOUT, task).await.is_err() {
        tracing::warn!("{} input bridge did not stop in time, aborting", device);
        abort.abort();
    }
    tracing::debug!("Stopped {} capture", device);
}
