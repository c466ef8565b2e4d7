//! Audio clips and their processing
//!
//! Clips are immutable WAV byte buffers shared by reference count. They are
//! produced once per profile by the [`extract::ClipExtractor`], decoded lazily
//! by the playback workers and handed to an [`output::AudioOutput`].

pub mod codec;
pub mod extract;
pub mod output;
pub mod pitch;

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Which edge of a key or button stroke an event represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Press,
    Release,
}

/// An immutable playable clip
///
/// Cloning is cheap; the bytes are shared.
#[derive(Debug, Clone)]
pub struct Clip {
    bytes: Arc<[u8]>,
    action: Action,
    content_id: u64,
}

impl Clip {
    /// Wrap encoded WAV bytes, computing the content id once
    pub fn new(bytes: impl Into<Arc<[u8]>>, action: Action) -> Self {
        let bytes = bytes.into();
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        Self {
            content_id: hasher.finish(),
            bytes,
            action,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn action(&self) -> Action {
        self.action
    }

    /// Identity of the clip's content, used as the decode cache key
    ///
    /// A 64-bit digest; use [`Clip::same_content`] to confirm a match.
    pub fn content_id(&self) -> u64 {
        self.content_id
    }

    /// Whether both clips carry identical bytes
    pub fn same_content(&self, other: &Clip) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
            || (self.content_id == other.content_id && self.bytes == other.bytes)
    }

    #[cfg(test)]
    pub(crate) fn with_content_id(mut self, content_id: u64) -> Self {
        self.content_id = content_id;
        self
    }
}

/// Interleaved PCM samples in the range [-1.0, 1.0]
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub channels: u16,
    pub sample_rate: u32,
    pub samples: Arc<[f32]>,
}

impl DecodedAudio {
    pub fn new(channels: u16, sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            channels: channels.max(1),
            sample_rate,
            samples: samples.into(),
        }
    }

    /// Number of sample frames (one sample per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Copy out the frames in `[start, end)`, clamped to the buffer
    pub fn slice_frames(&self, start: usize, end: usize) -> DecodedAudio {
        let channels = self.channels as usize;
        let end = end.min(self.frames());
        let start = start.min(end);
        DecodedAudio::new(
            self.channels,
            self.sample_rate,
            self.samples[start * channels..end * channels].to_vec(),
        )
    }
}
