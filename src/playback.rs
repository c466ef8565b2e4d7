//! Playback pipeline
//!
//! Input bridges enqueue `(clip, device class)` tasks onto an unbounded
//! channel. A fixed pool of OS threads drains it in FIFO order; each task
//! reads one settings snapshot, optionally pitch-shifts, looks the decoded
//! clip up in a content-keyed cache and hands it to the audio output.

use crate::audio::codec;
use crate::audio::output::AudioOutput;
use crate::audio::pitch::{self, PitchRange};
use crate::audio::{Clip, DecodedAudio};
use crate::error::PlaybackError;
use crate::profile::DeviceClass;
use crossbeam_channel::{Receiver, Sender};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Default number of playback worker threads
pub const DEFAULT_WORKERS: usize = 8;

/// Pitch shifting configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PitchSettings {
    pub range: PitchRange,
    /// Profile the shift is restricted to, `None` for every profile
    pub scope: Option<String>,
}

/// Everything a worker needs to know to play one task
///
/// Replaced whole on every change; workers never see a mix of old and new
/// values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSettings {
    /// 0-100
    pub volume: u8,
    pub pitch: Option<PitchSettings>,
    pub keyboard_profile: Option<String>,
    pub mouse_profile: Option<String>,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            volume: 100,
            pitch: None,
            keyboard_profile: None,
            mouse_profile: None,
        }
    }
}

impl PlaybackSettings {
    pub fn gain(&self) -> f32 {
        self.volume.min(100) as f32 / 100.0
    }

    pub fn active_profile(&self, device: DeviceClass) -> Option<&str> {
        match device {
            DeviceClass::Keyboard => self.keyboard_profile.as_deref(),
            DeviceClass::Mouse => self.mouse_profile.as_deref(),
        }
    }

    /// The pitch range to apply to a task from `device`, if any
    pub fn pitch_for(&self, device: DeviceClass) -> Option<PitchRange> {
        let pitch = self.pitch.as_ref()?;
        match pitch.scope.as_deref() {
            None | Some("") => Some(pitch.range),
            Some(scope) if self.active_profile(device) == Some(scope) => Some(pitch.range),
            Some(_) => None,
        }
    }
}

/// Atomically swappable playback settings
#[derive(Debug, Default)]
pub struct SharedSettings {
    current: RwLock<Arc<PlaybackSettings>>,
}

impl SharedSettings {
    pub fn new(settings: PlaybackSettings) -> Self {
        Self {
            current: RwLock::new(Arc::new(settings)),
        }
    }

    /// The current settings; stays consistent while held
    pub fn snapshot(&self) -> Arc<PlaybackSettings> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Derive and install new settings, returning them
    pub fn update<F>(&self, f: F) -> Arc<PlaybackSettings>
    where
        F: FnOnce(&mut PlaybackSettings),
    {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = PlaybackSettings::clone(&**guard);
        f(&mut next);
        let next = Arc::new(next);
        *guard = Arc::clone(&next);
        next
    }
}

/// One unit of work for the pool
#[derive(Debug, Clone)]
pub struct PlaybackTask {
    /// `None` is accepted and ignored
    pub clip: Option<Clip>,
    pub device: DeviceClass,
}

/// Decoded clips keyed by content id
///
/// Entries keep the clip they were decoded from; a digest match with
/// different bytes is decoded fresh and never cached.
#[derive(Debug, Default)]
pub struct ClipCache {
    entries: Mutex<HashMap<u64, (Clip, DecodedAudio)>>,
}

impl ClipCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached decode of `clip`, decoding it on a miss
    ///
    /// Decoding happens outside the lock; two workers racing on the same
    /// miss both decode and the first insert wins.
    pub fn get_or_decode(&self, clip: &Clip) -> Result<DecodedAudio, PlaybackError> {
        let key = clip.content_id();
        let collided = match self.lock().get(&key) {
            Some((cached, decoded)) if cached.same_content(clip) => return Ok(decoded.clone()),
            Some(_) => true,
            None => false,
        };

        let decoded = codec::decode_wav_bytes(clip.bytes())
            .map_err(|e| PlaybackError::Decode(e.to_string()))?;

        if collided {
            tracing::debug!("Clip cache key {:016x} collides, bypassing cache", key);
            return Ok(decoded);
        }

        let mut entries = self.lock();
        let (cached, stored) = entries
            .entry(key)
            .or_insert_with(|| (clip.clone(), decoded.clone()));
        if cached.same_content(clip) {
            Ok(stored.clone())
        } else {
            Ok(decoded)
        }
    }

    /// Drop every entry
    pub fn invalidate(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, (Clip, DecodedAudio)>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// The worker pool and its queue
pub struct PlaybackPipeline {
    sender: Mutex<Option<Sender<PlaybackTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cache: Arc<ClipCache>,
    settings: Arc<SharedSettings>,
}

impl PlaybackPipeline {
    /// Start `workers` threads playing through `output`
    pub fn start(
        workers: usize,
        output: Arc<dyn AudioOutput>,
        settings: Arc<SharedSettings>,
    ) -> Result<Self, PlaybackError> {
        let workers = workers.max(1);
        let (sender, receiver) = crossbeam_channel::unbounded();
        let cache = Arc::new(ClipCache::new());

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let worker = Worker {
                receiver: receiver.clone(),
                cache: Arc::clone(&cache),
                settings: Arc::clone(&settings),
                output: Arc::clone(&output),
            };
            let handle = std::thread::Builder::new()
                .name(format!("playback-{}", index))
                .spawn(move || worker.run())
                .map_err(|e| PlaybackError::Sink(format!("Failed to spawn worker: {}", e)))?;
            handles.push(handle);
        }

        tracing::debug!("Playback pipeline started with {} workers", workers);

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
            cache,
            settings,
        })
    }

    /// Queue a clip for playback; never blocks on the workers
    pub fn enqueue(&self, clip: Option<Clip>, device: DeviceClass) {
        let sender = match self.sender.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        match sender {
            Some(sender) => {
                if sender.send(PlaybackTask { clip, device }).is_err() {
                    tracing::debug!("Playback queue closed, dropping task");
                }
            }
            None => tracing::debug!("Playback pipeline shut down, dropping task"),
        }
    }

    /// Forget all decoded clips; call whenever a profile changes
    pub fn invalidate_cache(&self) {
        self.cache.invalidate();
        tracing::debug!("Clip cache invalidated");
    }

    pub fn cache(&self) -> &ClipCache {
        &self.cache
    }

    pub fn settings(&self) -> &Arc<SharedSettings> {
        &self.settings
    }

    /// Close the queue, let workers drain it and join them
    ///
    /// Workers still running after `timeout` are left detached.
    pub fn shutdown(&self, timeout: Duration) {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);

        let handles = match self.workers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        if handles.is_empty() {
            return;
        }

        let deadline = Instant::now() + timeout;
        while handles.iter().any(|h| !h.is_finished()) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        let mut detached = 0;
        for handle in handles {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                detached += 1;
            }
        }

        if detached > 0 {
            tracing::warn!("{} playback workers did not finish in time", detached);
        } else {
            tracing::debug!("Playback pipeline drained");
        }
    }
}

impl Drop for PlaybackPipeline {
    fn drop(&mut self) {
        self.shutdown(Duration::from_secs(1));
    }
}

struct Worker {
    receiver: Receiver<PlaybackTask>,
    cache: Arc<ClipCache>,
    settings: Arc<SharedSettings>,
    output: Arc<dyn AudioOutput>,
}

impl Worker {
    fn run(self) {
        while let Ok(task) = self.receiver.recv() {
            // A panicking task must not take the worker down with it
            match panic::catch_unwind(AssertUnwindSafe(|| self.play(&task))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Playback failed: {}", e),
                Err(payload) => tracing::error!(
                    "Playback task panicked: {}",
                    panic_message(payload.as_ref())
                ),
            }
        }
    }

    fn play(&self, task: &PlaybackTask) -> Result<(), PlaybackError> {
        let Some(clip) = task.clip.as_ref() else {
            return Ok(());
        };

        let settings = self.settings.snapshot();
        let gain = settings.gain();

        if let Some(range) = settings.pitch_for(task.device) {
            // Randomized per play, so never cached
            let semitones = range.sample(&mut rand::thread_rng());
            let decoded = codec::decode_wav_bytes(clip.bytes())
                .map_err(|e| PlaybackError::Decode(e.to_string()))?;
            let shifted = pitch::shift(&decoded, semitones);
            return self.output.play(&shifted, gain);
        }

        let decoded = self.cache.get_or_decode(clip)?;
        self.output.play(&decoded, gain)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::RecordingOutput;
    use crate::audio::Action;

    fn clip(value: f32, frames: usize) -> Clip {
        let audio = DecodedAudio::new(1, 8000, vec![value; frames]);
        Clip::new(codec::encode_wav(&audio).unwrap(), Action::Press)
    }

    fn pipeline(settings: PlaybackSettings) -> (PlaybackPipeline, RecordingOutput) {
        let output = RecordingOutput::new();
        let pipeline = PlaybackPipeline::start(
            4,
            Arc::new(output.clone()),
            Arc::new(SharedSettings::new(settings)),
        )
        .unwrap();
        (pipeline, output)
    }

    #[test]
    fn test_pitch_scope() {
        let mut settings = PlaybackSettings {
            keyboard_profile: Some("ios".into()),
            mouse_profile: Some("clicky".into()),
            ..Default::default()
        };
        assert!(settings.pitch_for(DeviceClass::Keyboard).is_none());

        settings.pitch = Some(PitchSettings {
            range: PitchRange::new(-2, 2),
            scope: None,
        });
        assert!(settings.pitch_for(DeviceClass::Keyboard).is_some());
        assert!(settings.pitch_for(DeviceClass::Mouse).is_some());

        settings.pitch = Some(PitchSettings {
            range: PitchRange::new(-2, 2),
            scope: Some("ios".into()),
        });
        assert!(settings.pitch_for(DeviceClass::Keyboard).is_some());
        assert!(settings.pitch_for(DeviceClass::Mouse).is_none());
    }

    #[test]
    fn test_snapshot_is_stable_across_update() {
        let shared = SharedSettings::new(PlaybackSettings::default());
        let before = shared.snapshot();
        let after = shared.update(|s| s.volume = 25);
        assert_eq!(before.volume, 100);
        assert_eq!(after.volume, 25);
        assert_eq!(shared.snapshot().volume, 25);
    }

    #[test]
    fn test_cache_reuses_decoded_clip() {
        let cache = ClipCache::new();
        let c = clip(0.5, 10);
        let a = cache.get_or_decode(&c).unwrap();
        let b = cache.get_or_decode(&c.clone()).unwrap();
        assert!(Arc::ptr_eq(&a.samples, &b.samples));
        assert_eq!(cache.len(), 1);

        cache.invalidate();
        assert!(cache.is_empty());
        let c2 = cache.get_or_decode(&c).unwrap();
        assert!(!Arc::ptr_eq(&a.samples, &c2.samples));
    }

    #[test]
    fn test_cache_never_serves_colliding_clip() {
        let cache = ClipCache::new();
        let short = clip(0.5, 10);
        let long = clip(0.5, 30).with_content_id(short.content_id());

        assert_eq!(cache.get_or_decode(&short).unwrap().frames(), 10);
        assert_eq!(cache.get_or_decode(&long).unwrap().frames(), 30);
        assert_eq!(cache.get_or_decode(&short).unwrap().frames(), 10);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_rejects_garbage() {
        let cache = ClipCache::new();
        let bad = Clip::new(vec![0u8; 8], Action::Press);
        assert!(matches!(
            cache.get_or_decode(&bad),
            Err(PlaybackError::Decode(_))
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let (pipeline, output) = pipeline(PlaybackSettings {
            volume: 40,
            ..Default::default()
        });
        let c = clip(0.25, 20);
        for _ in 0..50 {
            pipeline.enqueue(Some(c.clone()), DeviceClass::Keyboard);
        }
        pipeline.enqueue(None, DeviceClass::Keyboard);
        pipeline.shutdown(Duration::from_secs(5));

        let played = output.played();
        assert_eq!(played.len(), 50);
        assert!(played.iter().all(|p| (p.volume - 0.4).abs() < f32::EPSILON));
        assert!(played.iter().all(|p| p.frames == 20));

        // Enqueue after shutdown is a silent no-op
        pipeline.enqueue(Some(c), DeviceClass::Keyboard);
    }

    /// Panics on the first play, records every later one
    struct PanicOnce {
        panicked: std::sync::atomic::AtomicBool,
        inner: RecordingOutput,
    }

    impl AudioOutput for PanicOnce {
        fn play(&self, audio: &DecodedAudio, volume: f32) -> Result<(), PlaybackError> {
            if !self.panicked.swap(true, std::sync::atomic::Ordering::SeqCst) {
                panic!("output exploded");
            }
            self.inner.play(audio, volume)
        }
    }

    #[test]
    fn test_worker_survives_panicking_task() {
        let recorded = RecordingOutput::new();
        let output = PanicOnce {
            panicked: std::sync::atomic::AtomicBool::new(false),
            inner: recorded.clone(),
        };
        // A single worker: if it died, nothing after the first task would play
        let pipeline = PlaybackPipeline::start(
            1,
            Arc::new(output),
            Arc::new(SharedSettings::new(PlaybackSettings::default())),
        )
        .unwrap();

        let c = clip(0.5, 10);
        for _ in 0..5 {
            pipeline.enqueue(Some(c.clone()), DeviceClass::Keyboard);
        }
        pipeline.shutdown(Duration::from_secs(5));

        assert_eq!(recorded.played().len(), 4);
    }

    #[test]
    fn test_pitch_shift_bypasses_cache() {
        let (pipeline, output) = pipeline(PlaybackSettings {
            pitch: Some(PitchSettings {
                range: PitchRange::new(12, 12),
                scope: None,
            }),
            ..Default::default()
        });
        pipeline.enqueue(Some(clip(0.5, 100)), DeviceClass::Mouse);
        pipeline.shutdown(Duration::from_secs(5));

        let played = output.played();
        assert_eq!(played.len(), 1);
        assert_eq!(played[0].frames, 50);
        assert!(pipeline.cache().is_empty());
    }
}
