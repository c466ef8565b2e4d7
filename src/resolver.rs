//! Mapping input events to clips
//!
//! A resolver pairs one validated profile with its primed clips. Lookups are
//! lock-free; the only mutable state is the enable flag, which may be shared
//! with other resolvers so one switch gates them all.

use crate::audio::extract::ClipSet;
use crate::audio::{Action, Clip};
use crate::input::InputKey;
use crate::profile::{DeviceClass, Profile, SoundRef};
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Resolves key/button events against a single profile
#[derive(Debug)]
pub struct SoundResolver {
    profile: Profile,
    clips: ClipSet,
    enabled: Arc<AtomicBool>,
}

impl SoundResolver {
    pub fn new(profile: Profile, clips: ClipSet) -> Self {
        Self::with_gate(profile, clips, Arc::new(AtomicBool::new(true)))
    }

    /// A resolver gated by an existing enable flag
    pub fn with_gate(profile: Profile, clips: ClipSet, enabled: Arc<AtomicBool>) -> Self {
        Self {
            profile,
            clips,
            enabled,
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn device(&self) -> DeviceClass {
        self.profile.device()
    }

    pub fn clips(&self) -> &ClipSet {
        &self.clips
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Gate all lookups; a disabled resolver resolves nothing
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Pick the source id for a canonical input name
    ///
    /// The first explicit mapping listing the name wins, otherwise the
    /// default applies. Lists resolve to a uniformly random member.
    pub fn resolve_source(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        let sound = self
            .profile
            .mappings
            .other
            .iter()
            .find(|m| m.matches(&name))
            .map(|m| &m.sound)
            .or(self.profile.mappings.default.as_ref())?;

        match sound {
            SoundRef::One(id) => Some(id.as_str()),
            SoundRef::Choice(ids) => ids.choose(&mut rand::thread_rng()).map(String::as_str),
        }
    }

    /// The clip to play for this event, if any
    pub fn get_sound(&self, key: &InputKey, action: Action) -> Option<Clip> {
        if !self.is_enabled() || key.device != self.device() {
            return None;
        }

        let id = self.resolve_source(&key.name)?;
        let clip = self.clips.get(id)?.for_action(action).cloned();
        if clip.is_none() {
            tracing::trace!("No {:?} clip for '{}' (source '{}')", action, key.name, id);
        }
        clip
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::extract::ClipExtractor;
    use crate::profile::store::load_dir;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::collections::HashMap;
    use std::path::Path;

    fn write_wav(path: &Path, value: i16) {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for _ in 0..16 {
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn resolver(yaml: &str, assets: &[&str]) -> (tempfile::TempDir, SoundResolver) {
        let tmp = tempfile::tempdir().unwrap();
        for (i, asset) in assets.iter().enumerate() {
            write_wav(&tmp.path().join(asset), (i as i16 + 1) * 1000);
        }
        std::fs::write(tmp.path().join("profile.yaml"), yaml).unwrap();
        let profile = load_dir("test", tmp.path()).unwrap();
        let clips = ClipExtractor::with_ffmpeg(None).prime(&profile);
        (tmp, SoundResolver::new(profile, clips))
    }

    fn key(name: &str) -> InputKey {
        InputKey::new(DeviceClass::Keyboard, name)
    }

    const PROFILE: &str = r#"
profile: {name: test}
sources:
  - {id: k1, source: k1.wav}
  - {id: k2, source: k2.wav}
  - {id: k3, source: k3.wav}
  - id: space
    source: {press: sd.wav, release: su.wav}
keys:
  default: [k1, k2, k3]
  other:
    - keys: [space]
      sound: space
    - keys: [space, enter]
      sound: k1
"#;

    const ASSETS: &[&str] = &["k1.wav", "k2.wav", "k3.wav", "sd.wav", "su.wav"];

    #[test]
    fn test_first_mapping_wins() {
        let (_tmp, r) = resolver(PROFILE, ASSETS);
        assert_eq!(r.resolve_source("space"), Some("space"));
        assert_eq!(r.resolve_source("SPACE"), Some("space"));
        assert_eq!(r.resolve_source("enter"), Some("k1"));
    }

    #[test]
    fn test_press_release_pair() {
        let (_tmp, r) = resolver(PROFILE, ASSETS);
        let press = r.get_sound(&key("space"), Action::Press).unwrap();
        let release = r.get_sound(&key("space"), Action::Release).unwrap();
        assert_eq!(press.action(), Action::Press);
        assert_eq!(release.action(), Action::Release);
        assert_ne!(press.content_id(), release.content_id());
    }

    #[test]
    fn test_press_only_source_silent_on_release() {
        let (_tmp, r) = resolver(PROFILE, ASSETS);
        assert!(r.get_sound(&key("enter"), Action::Press).is_some());
        assert!(r.get_sound(&key("enter"), Action::Release).is_none());
    }

    #[test]
    fn test_default_choice_is_uniform() {
        let (_tmp, r) = resolver(PROFILE, ASSETS);
        let mut counts: HashMap<String, usize> = HashMap::new();
        let draws = 6000;
        for _ in 0..draws {
            *counts
                .entry(r.resolve_source("a").unwrap().to_string())
                .or_default() += 1;
        }

        assert_eq!(counts.len(), 3);
        for id in ["k1", "k2", "k3"] {
            let share = counts[id] as f64 / draws as f64;
            assert!((share - 1.0 / 3.0).abs() < 0.05, "{} drawn {:.3}", id, share);
        }
    }

    #[test]
    fn test_disabled_and_wrong_device() {
        let (_tmp, r) = resolver(PROFILE, ASSETS);
        let mouse = InputKey::new(DeviceClass::Mouse, "left");
        assert!(r.get_sound(&mouse, Action::Press).is_none());

        r.set_enabled(false);
        assert!(r.get_sound(&key("a"), Action::Press).is_none());
        r.set_enabled(true);
        assert!(r.get_sound(&key("a"), Action::Press).is_some());
    }

    #[test]
    fn test_shared_gate() {
        let (_tmp, r) = resolver(PROFILE, ASSETS);
        let gate = Arc::new(AtomicBool::new(true));
        let a = SoundResolver::with_gate(r.profile().clone(), r.clips().clone(), Arc::clone(&gate));
        let b = SoundResolver::with_gate(r.profile().clone(), r.clips().clone(), Arc::clone(&gate));

        a.set_enabled(false);
        assert!(!b.is_enabled());
        assert!(b.get_sound(&key("a"), Action::Press).is_none());

        gate.store(true, Ordering::Release);
        assert!(a.get_sound(&key("a"), Action::Press).is_some());
        // Unrelated resolvers keep their own flag
        assert!(r.is_enabled());
    }

    #[test]
    fn test_no_default_is_silent() {
        let yaml = r#"
profile: {name: test}
sources:
  - {id: k1, source: k1.wav}
keys:
  other:
    - keys: [a]
      sound: k1
"#;
        let (_tmp, r) = resolver(yaml, &["k1.wav"]);
        assert!(r.get_sound(&key("a"), Action::Press).is_some());
        assert!(r.get_sound(&key("b"), Action::Press).is_none());
    }
}
