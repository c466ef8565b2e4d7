//! Audio output
//!
//! Playback workers hand decoded audio to an [`AudioOutput`]. The default
//! implementation plays through rodio; tests use [`RecordingOutput`].

use super::DecodedAudio;
use crate::error::PlaybackError;
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

/// Something that can play decoded audio without blocking for its duration
pub trait AudioOutput: Send + Sync {
    /// Start playing `audio` scaled by `volume` (0.0 - 1.0)
    fn play(&self, audio: &DecodedAudio, volume: f32) -> Result<(), PlaybackError>;
}

/// rodio-backed output on the default device
///
/// The output stream is not `Send`, so it lives on its own thread for as long
/// as this value exists; workers share the stream handle.
pub struct RodioOutput {
    stream_handle: OutputStreamHandle,
    _keepalive: mpsc::Sender<()>,
}

impl RodioOutput {
    /// Open the default output device
    pub fn new() -> Result<Self, PlaybackError> {
        let (handle_tx, handle_rx) = mpsc::channel();
        let (keepalive_tx, keepalive_rx) = mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || match OutputStream::try_default() {
                Ok((stream, handle)) => {
                    let _ = handle_tx.send(Ok(handle));
                    // Blocks until the owning RodioOutput is dropped
                    let _ = keepalive_rx.recv();
                    drop(stream);
                    tracing::debug!("Audio output stream closed");
                }
                Err(e) => {
                    let _ = handle_tx.send(Err(e.to_string()));
                }
            })
            .map_err(|e| PlaybackError::OutputUnavailable(e.to_string()))?;

        let stream_handle = handle_rx
            .recv()
            .map_err(|_| PlaybackError::OutputUnavailable("audio thread exited".to_string()))?
            .map_err(PlaybackError::OutputUnavailable)?;

        Ok(Self {
            stream_handle,
            _keepalive: keepalive_tx,
        })
    }
}

impl AudioOutput for RodioOutput {
    fn play(&self, audio: &DecodedAudio, volume: f32) -> Result<(), PlaybackError> {
        if audio.samples.is_empty() {
            return Ok(());
        }

        let source = SharedSamples::new(audio).amplify(volume);

        let sink = Sink::try_new(&self.stream_handle)
            .map_err(|e| PlaybackError::Sink(e.to_string()))?;

        sink.append(source);
        sink.detach(); // Let it play in the background

        Ok(())
    }
}

/// Output that discards everything, used when no audio device is available
#[derive(Debug, Default)]
pub struct NullOutput;

impl AudioOutput for NullOutput {
    fn play(&self, _audio: &DecodedAudio, _volume: f32) -> Result<(), PlaybackError> {
        Ok(())
    }
}

/// A play request captured by [`RecordingOutput`]
#[derive(Debug, Clone)]
pub struct PlayedSound {
    pub channels: u16,
    pub sample_rate: u32,
    pub frames: usize,
    pub volume: f32,
    /// Address of the shared sample buffer, equal for cache hits
    pub buffer_id: usize,
}

/// Output that records what it was asked to play
#[derive(Debug, Default, Clone)]
pub struct RecordingOutput {
    played: Arc<Mutex<Vec<PlayedSound>>>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything played so far
    pub fn played(&self) -> Vec<PlayedSound> {
        self.played.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl AudioOutput for RecordingOutput {
    fn play(&self, audio: &DecodedAudio, volume: f32) -> Result<(), PlaybackError> {
        let sound = PlayedSound {
            channels: audio.channels,
            sample_rate: audio.sample_rate,
            frames: audio.frames(),
            volume,
            buffer_id: audio.samples.as_ptr() as usize,
        };
        self.played
            .lock()
            .map_err(|_| PlaybackError::Sink("recording poisoned".to_string()))?
            .push(sound);
        Ok(())
    }
}

/// rodio source reading from a shared sample buffer without copying it
struct SharedSamples {
    samples: Arc<[f32]>,
    position: usize,
    channels: u16,
    sample_rate: u32,
}

impl SharedSamples {
    fn new(audio: &DecodedAudio) -> Self {
        Self {
            samples: Arc::clone(&audio.samples),
            position: 0,
            channels: audio.channels,
            sample_rate: audio.sample_rate,
        }
    }
}

impl Iterator for SharedSamples {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let sample = self.samples.get(self.position).copied()?;
        self.position += 1;
        Some(sample)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.samples.len() - self.position;
        (remaining, Some(remaining))
    }
}

impl Source for SharedSamples {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.samples.len() - self.position)
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        let frames = self.samples.len() / self.channels.max(1) as usize;
        Some(Duration::from_secs_f64(
            frames as f64 / self.sample_rate.max(1) as f64,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_samples_source() {
        let audio = DecodedAudio::new(2, 4, vec![0.1, 0.2, 0.3, 0.4]);
        let source = SharedSamples::new(&audio);
        assert_eq!(source.channels(), 2);
        assert_eq!(source.sample_rate(), 4);
        assert_eq!(source.total_duration(), Some(Duration::from_millis(500)));
        assert_eq!(source.collect::<Vec<_>>(), vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_recording_output() {
        let output = RecordingOutput::new();
        let audio = DecodedAudio::new(1, 8000, vec![0.0; 80]);
        output.play(&audio, 0.5).unwrap();
        output.play(&audio, 1.0).unwrap();

        let played = output.played();
        assert_eq!(played.len(), 2);
        assert_eq!(played[0].frames, 80);
        assert_eq!(played[0].volume, 0.5);
        assert_eq!(played[0].buffer_id, played[1].buffer_id);
    }
}
