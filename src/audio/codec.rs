//! WAV encoding/decoding and ffmpeg transcoding
//!
//! Everything the daemon plays is normalised to 16-bit PCM WAV. Compressed
//! assets (mp3, mp4 containers) are converted by shelling out to ffmpeg.

use super::DecodedAudio;
use crate::error::ExtractionError;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Decode a WAV stream into interleaved f32 samples
pub fn decode_wav<R: Read>(reader: R) -> Result<DecodedAudio, hound::Error> {
    let reader = WavReader::new(reader)?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .map(|s| s as f32 / max_val)
                .collect()
        }
        SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<Vec<_>, _>>()?,
    };

    Ok(DecodedAudio::new(spec.channels, spec.sample_rate, samples))
}

/// Decode WAV bytes held in memory
pub fn decode_wav_bytes(bytes: &[u8]) -> Result<DecodedAudio, hound::Error> {
    decode_wav(Cursor::new(bytes))
}

/// Encode interleaved samples as a 16-bit PCM WAV file in memory
pub fn encode_wav(audio: &DecodedAudio) -> Result<Vec<u8>, hound::Error> {
    let spec = WavSpec {
        channels: audio.channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut buffer, spec)?;
        let max_val = i16::MAX as f32;
        for &sample in audio.samples.iter() {
            writer.write_sample((sample.clamp(-1.0, 1.0) * max_val) as i16)?;
        }
        writer.finalize()?;
    }

    Ok(buffer.into_inner())
}

/// Locate the ffmpeg binary
pub fn find_ffmpeg() -> Option<PathBuf> {
    which::which("ffmpeg").ok()
}

/// Convert any ffmpeg-readable file to PCM and decode it
///
/// The audio stream is written to a temporary WAV file that is removed when
/// this function returns.
pub fn transcode(ffmpeg: &Path, input: &Path) -> Result<DecodedAudio, ExtractionError> {
    let temp = tempfile::Builder::new()
        .prefix("keyclack-")
        .suffix(".wav")
        .tempfile()?;

    tracing::debug!("Transcoding {:?} via {:?} into {:?}", input, ffmpeg, temp.path());

    let output = Command::new(ffmpeg)
        .arg("-y")
        .args(["-loglevel", "error"])
        .arg("-i")
        .arg(input)
        .args(["-vn", "-f", "wav", "-acodec", "pcm_s16le"])
        .arg(temp.path())
        .output()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExtractionError::FfmpegNotFound
            } else {
                ExtractionError::Transcode {
                    path: input.display().to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ExtractionError::Transcode {
            path: input.display().to_string(),
            reason: stderr.trim().to_string(),
        });
    }

    let file = std::fs::File::open(temp.path())?;
    decode_wav(std::io::BufReader::new(file)).map_err(|e| ExtractionError::Decode {
        path: input.display().to_string(),
        reason: e.to_string(),
    })
}
