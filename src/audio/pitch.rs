//! Pitch shifting by resampling
//!
//! Playing a buffer resampled by `1/f` at the original rate raises its pitch
//! by factor `f`. For a semitone offset `s` the factor is `2^(s/12)`. Duration
//! changes along with pitch, which is fine for clips this short.

use super::DecodedAudio;
use rand::Rng;

/// Largest accepted offset in either direction (two octaves)
pub const MAX_SEMITONES: i32 = 24;

/// Inclusive semitone range pitch offsets are drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PitchRange {
    pub lower: i32,
    pub upper: i32,
}

impl PitchRange {
    /// Create a range, ordering the bounds
    pub fn new(a: i32, b: i32) -> Self {
        Self {
            lower: a.min(b),
            upper: a.max(b),
        }
    }

    /// Parse `"lo,hi"`; both bounds must lie within `±MAX_SEMITONES`
    pub fn parse(value: &str) -> Option<Self> {
        let (lo, hi) = value.split_once(',')?;
        let lo: i32 = lo.trim().parse().ok()?;
        let hi: i32 = hi.trim().parse().ok()?;
        let range = Self::new(lo, hi);
        range.in_bounds().then_some(range)
    }

    pub fn in_bounds(&self) -> bool {
        self.lower >= -MAX_SEMITONES && self.upper <= MAX_SEMITONES
    }

    /// Draw a semitone offset uniformly from the range
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> i32 {
        rng.gen_range(self.lower..=self.upper)
    }
}

impl std::fmt::Display for PitchRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.lower, self.upper)
    }
}

/// Frequency factor for a semitone offset
pub fn semitone_factor(semitones: i32) -> f64 {
    2f64.powf(semitones as f64 / 12.0)
}

/// Shift the pitch of `audio` by `semitones`
///
/// Offsets beyond `±MAX_SEMITONES` are clamped.
pub fn shift(audio: &DecodedAudio, semitones: i32) -> DecodedAudio {
    let semitones = semitones.clamp(-MAX_SEMITONES, MAX_SEMITONES);
    if semitones == 0 {
        return audio.clone();
    }

    let factor = semitone_factor(semitones);
    let channels = audio.channels as usize;
    let frames = audio.frames();
    let new_frames = (frames as f64 / factor).ceil() as usize;
    let mut output = Vec::with_capacity(new_frames * channels);

    // Linear interpolation per channel on interleaved frames
    for i in 0..new_frames {
        let src = i as f64 * factor;
        let idx = src.floor() as usize;
        let frac = (src - idx as f64) as f32;

        for ch in 0..channels {
            let at = |frame: usize| audio.samples.get(frame * channels + ch).copied();
            let sample = match (at(idx), at(idx + 1)) {
                (Some(a), Some(b)) => a * (1.0 - frac) + b * frac,
                (Some(a), None) => a,
                _ => 0.0,
            };
            output.push(sample);
        }
    }

    DecodedAudio::new(audio.channels, audio.sample_rate, output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        assert_eq!(PitchRange::parse("-3,4"), Some(PitchRange::new(-3, 4)));
        assert_eq!(PitchRange::parse(" 5 , -2 "), Some(PitchRange { lower: -2, upper: 5 }));
        assert_eq!(PitchRange::parse("3"), None);
        assert_eq!(PitchRange::parse("a,b"), None);
        assert_eq!(PitchRange::new(-1, 2).to_string(), "-1,2");
    }

    #[test]
    fn test_parse_rejects_out_of_bounds() {
        assert_eq!(PitchRange::parse("-24,24"), Some(PitchRange::new(-24, 24)));
        assert_eq!(PitchRange::parse("-2000,-2000"), None);
        assert_eq!(PitchRange::parse("0,25"), None);
        assert_eq!(PitchRange::parse("-25,0"), None);
        assert!(!PitchRange::new(i32::MIN, 0).in_bounds());
    }

    #[test]
    fn test_extreme_shift_is_clamped() {
        let audio = DecodedAudio::new(1, 100, vec![0.25; 100]);
        // Two octaves down is four times as long, no matter how far past it
        assert_eq!(shift(&audio, -2000).frames(), 400);
        assert_eq!(shift(&audio, i32::MIN).frames(), 400);
        assert_eq!(shift(&audio, 2000).frames(), 25);
    }

    #[test]
    fn test_sample_stays_in_range() {
        let range = PitchRange::new(-2, 2);
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let s = range.sample(&mut rng);
            assert!((-2..=2).contains(&s));
        }
        assert_eq!(PitchRange::new(3, 3).sample(&mut rng), 3);
    }

    #[test]
    fn test_octave_up_halves_length() {
        let audio = DecodedAudio::new(1, 100, (0..100).map(|i| i as f32 / 100.0).collect());
        let shifted = shift(&audio, 12);
        assert_eq!(shifted.frames(), 50);
        assert!((shifted.samples[10] - 0.2).abs() < 1e-5);

        let down = shift(&audio, -12);
        assert_eq!(down.frames(), 200);
    }

    #[test]
    fn test_shift_keeps_channels() {
        let audio = DecodedAudio::new(2, 100, vec![0.5; 200]);
        let shifted = shift(&audio, 5);
        assert_eq!(shifted.channels, 2);
        assert_eq!(shifted.samples.len() % 2, 0);
        assert!(shifted.samples.iter().all(|s| (*s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_zero_semitones_is_identity() {
        let audio = DecodedAudio::new(1, 100, vec![0.1, 0.2, 0.3]);
        assert_eq!(&*shift(&audio, 0).samples, &*audio.samples);
    }
}
