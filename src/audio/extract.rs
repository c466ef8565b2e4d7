//! Clip extraction
//!
//! Turns the sources of a validated profile into in-memory clips. A source
//! whose asset cannot be decoded is logged and left out of the set, so the
//! keys mapped to it simply stay silent.

use super::codec::{self, decode_wav};
use super::{Action, Clip, DecodedAudio};
use crate::error::ExtractionError;
use crate::profile::{Profile, ProfileType, SourceSpec};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The clips prepared for one source
#[derive(Debug, Clone)]
pub struct SourceClips {
    pub press: Clip,
    /// Absent for press-only sources
    pub release: Option<Clip>,
}

impl SourceClips {
    pub fn for_action(&self, action: Action) -> Option<&Clip> {
        match action {
            Action::Press => Some(&self.press),
            Action::Release => self.release.as_ref(),
        }
    }
}

/// All clips prepared for a profile, keyed by source id
#[derive(Debug, Clone, Default)]
pub struct ClipSet {
    sources: HashMap<String, SourceClips>,
}

impl ClipSet {
    pub fn get(&self, id: &str) -> Option<&SourceClips> {
        self.sources.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }
}

/// Decodes and slices profile assets
#[derive(Debug, Clone, Default)]
pub struct ClipExtractor {
    ffmpeg: Option<PathBuf>,
}

impl ClipExtractor {
    /// Create an extractor, locating ffmpeg on PATH
    pub fn new() -> Self {
        let ffmpeg = codec::find_ffmpeg();
        if ffmpeg.is_none() {
            tracing::debug!("ffmpeg not found in PATH, mp3/mp4 assets will be silent");
        }
        Self { ffmpeg }
    }

    /// Create an extractor using a specific ffmpeg binary
    pub fn with_ffmpeg(ffmpeg: Option<PathBuf>) -> Self {
        Self { ffmpeg }
    }

    /// Build a fresh clip set for the profile
    ///
    /// Priming the same profile twice yields clips with identical content.
    pub fn prime(&self, profile: &Profile) -> ClipSet {
        let sources = match profile.kind() {
            ProfileType::Files | ProfileType::OneShot => self.prime_files(profile),
            ProfileType::VideoExtract => self.prime_video(profile),
        };

        let set = ClipSet { sources };
        tracing::info!(
            "Primed profile '{}': {}/{} sources ready",
            profile.name(),
            set.len(),
            profile.sources.len()
        );
        set
    }

    fn prime_files(&self, profile: &Profile) -> HashMap<String, SourceClips> {
        let mut clips = HashMap::new();

        for source in &profile.sources {
            let result = match &source.spec {
                SourceSpec::Single(asset) => self
                    .load_asset(&profile.asset_path(asset))
                    .map(|press| SourceClips {
                        press: Clip::new(press, Action::Press),
                        release: None,
                    }),
                SourceSpec::PressRelease { press, release } => {
                    self.load_asset(&profile.asset_path(press)).and_then(|p| {
                        let release = release
                            .as_ref()
                            .map(|r| self.load_asset(&profile.asset_path(r)))
                            .transpose()?;
                        Ok(SourceClips {
                            press: Clip::new(p, Action::Press),
                            release: release.map(|r| Clip::new(r, Action::Release)),
                        })
                    })
                }
                SourceSpec::Range { .. } => {
                    tracing::warn!(
                        "Source '{}' in profile '{}' is a time range outside a video profile",
                        source.id,
                        profile.name()
                    );
                    continue;
                }
            };

            match result {
                Ok(source_clips) => {
                    clips.insert(source.id.clone(), source_clips);
                }
                Err(e) => tracing::warn!(
                    "Skipping source '{}' in profile '{}': {}",
                    source.id,
                    profile.name(),
                    e
                ),
            }
        }

        clips
    }

    fn prime_video(&self, profile: &Profile) -> HashMap<String, SourceClips> {
        let mut clips = HashMap::new();

        let Some(video) = profile.meta.video.as_deref() else {
            tracing::error!("Video profile '{}' has no container", profile.name());
            return clips;
        };

        let container = match self.decode_compressed(&profile.asset_path(video)) {
            Ok(audio) => audio,
            Err(e) => {
                tracing::error!(
                    "Failed to extract audio from '{}' for profile '{}': {}",
                    video,
                    profile.name(),
                    e
                );
                return clips;
            }
        };

        for source in &profile.sources {
            let SourceSpec::Range { start, end } = source.spec else {
                continue;
            };
            match slice_range(&container, &source.id, start, end).and_then(|audio| {
                codec::encode_wav(&audio).map_err(|e| ExtractionError::Decode {
                    path: video.to_string(),
                    reason: e.to_string(),
                })
            }) {
                Ok(bytes) => {
                    clips.insert(
                        source.id.clone(),
                        SourceClips {
                            press: Clip::new(bytes, Action::Press),
                            release: None,
                        },
                    );
                }
                Err(e) => tracing::warn!(
                    "Skipping source '{}' in profile '{}': {}",
                    source.id,
                    profile.name(),
                    e
                ),
            }
        }

        clips
    }

    /// Load one asset and return canonical WAV bytes
    fn load_asset(&self, path: &Path) -> Result<Vec<u8>, ExtractionError> {
        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);

        let audio = if is_wav {
            let file = std::fs::File::open(path)?;
            decode_wav(std::io::BufReader::new(file)).map_err(|e| ExtractionError::Decode {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
        } else {
            self.decode_compressed(path)?
        };

        codec::encode_wav(&audio).map_err(|e| ExtractionError::Decode {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn decode_compressed(&self, path: &Path) -> Result<DecodedAudio, ExtractionError> {
        let ffmpeg = self.ffmpeg.as_deref().ok_or(ExtractionError::FfmpegNotFound)?;
        codec::transcode(ffmpeg, path)
    }
}

/// Cut `[start, end)` seconds out of a decoded container
///
/// Frame offsets are `floor(seconds * rate)`; a missing end means the end of
/// the container. Windows that start past the end are rejected.
pub fn slice_range(
    audio: &DecodedAudio,
    id: &str,
    start: f64,
    end: Option<f64>,
) -> Result<DecodedAudio, ExtractionError> {
    let range_error = || ExtractionError::Range {
        id: id.to_string(),
        start,
        end,
    };

    if start < 0.0 || end.map(|e| e <= start).unwrap_or(false) {
        return Err(range_error());
    }

    let rate = audio.sample_rate as f64;
    let total = audio.frames();
    let first = (start * rate).floor() as usize;
    let last = end
        .map(|e| ((e * rate).floor() as usize).min(total))
        .unwrap_or(total);

    if first >= total || first >= last {
        return Err(range_error());
    }

    Ok(audio.slice_frames(first, last))
}
