//! PCM format descriptors and the immutable [`AudioBuffer`] snapshot.

use std::fmt;

// ---------------------------------------------------------------------------
// SampleFormat / AudioFormat
// ---------------------------------------------------------------------------

/// Width and encoding of a single PCM sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// 32-bit float in `[-1.0, 1.0]`.
    F32,
    /// 16-bit signed integer.
    I16,
}

impl SampleFormat {
    /// Bits per sample.
    pub fn bits(self) -> u16 {
        match self {
            SampleFormat::F32 => 32,
            SampleFormat::I16 => 16,
        }
    }
}

/// Sample rate, channel count and sample width of a PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            sample_format,
        }
    }

    /// Mono 16-bit signed PCM at `sample_rate` — the only shape recordings
    /// are written in.
    pub fn recording(sample_rate: u32) -> Self {
        Self::new(sample_rate, 1, SampleFormat::I16)
    }

    /// A format with a zero rate or zero channels cannot be captured from.
    /// Capture devices report this while they are still being configured.
    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.channels > 0
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {:?}",
            self.sample_rate, self.channels, self.sample_format
        )
    }
}

// ---------------------------------------------------------------------------
// AudioBuffer
// ---------------------------------------------------------------------------

/// Interleaved PCM samples in their native encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    F32(Vec<f32>),
    I16(Vec<i16>),
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Samples::F32(s) => s.len(),
            Samples::I16(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One callback's worth of captured audio.
///
/// Fields are private: a buffer is built once by the capture callback and
/// only read afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    format: AudioFormat,
    samples: Samples,
}

impl AudioBuffer {
    pub fn from_f32(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Self {
        Self {
            format: AudioFormat::new(sample_rate, channels, SampleFormat::F32),
            samples: Samples::F32(samples),
        }
    }

    pub fn from_i16(sample_rate: u32, channels: u16, samples: Vec<i16>) -> Self {
        Self {
            format: AudioFormat::new(sample_rate, channels, SampleFormat::I16),
            samples: Samples::I16(samples),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    /// Number of frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        match self.format.channels {
            0 => 0,
            n => self.samples.len() / n as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_format_is_mono_i16() {
        let f = AudioFormat::recording(24_000);
        assert_eq!(f.sample_rate, 24_000);
        assert_eq!(f.channels, 1);
        assert_eq!(f.sample_format, SampleFormat::I16);
        assert_eq!(f.sample_format.bits(), 16);
    }

    #[test]
    fn zero_rate_or_channels_is_invalid() {
        assert!(!AudioFormat::new(0, 1, SampleFormat::F32).is_valid());
        assert!(!AudioFormat::new(48_000, 0, SampleFormat::F32).is_valid());
        assert!(AudioFormat::new(48_000, 2, SampleFormat::F32).is_valid());
    }

    #[test]
    fn frame_count_divides_by_channels() {
        let stereo = AudioBuffer::from_f32(48_000, 2, vec![0.0; 960]);
        assert_eq!(stereo.frame_count(), 480);

        let mono = AudioBuffer::from_i16(16_000, 1, vec![0; 160]);
        assert_eq!(mono.frame_count(), 160);
        assert_eq!(mono.format().sample_format, SampleFormat::I16);
    }
}
