//! Sample-format and sample-rate conversion for recordings.
//!
//! Every recording sink stores **mono 16-bit PCM** at a fixed rate.  A
//! [`FormatConverter`] is built once per tracked source (native → target) and
//! then applied to each captured [`AudioBuffer`]:
//!
//! 1. normalise to `f32` ([`to_f32`]),
//! 2. [`downmix`] any number of interleaved channels to mono,
//! 3. resample to the target rate ([`LinearResampler`]),
//! 4. quantise to `i16` ([`to_i16`]).
//!
//! Capture delivers a continuous signal in arbitrary buffer sizes, so the
//! resampler is stateful: output positions are exact integer multiples of
//! the reduced rate ratio and the last input sample of one buffer is
//! interpolated into the next.  Splitting a signal into buffers yields the
//! same samples as resampling it whole, and the output length never drifts.

use thiserror::Error;

use super::format::{AudioBuffer, AudioFormat, SampleFormat, Samples};

// ---------------------------------------------------------------------------
// ConvertError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConvertError {
    #[error("invalid source format: {0}")]
    InvalidSource(AudioFormat),

    /// Recordings are mono `i16` only.
    #[error("unsupported target format: {0}")]
    UnsupportedTarget(AudioFormat),

    #[error("buffer format {actual} does not match converter input {expected}")]
    FormatMismatch {
        expected: AudioFormat,
        actual: AudioFormat,
    },
}

// ---------------------------------------------------------------------------
// FormatConverter
// ---------------------------------------------------------------------------

/// Converts buffers from one native format to the recording format.
///
/// Holds resampling state: feed it the buffers of one stream, in order.
#[derive(Debug, Clone)]
pub struct FormatConverter {
    source: AudioFormat,
    target: AudioFormat,
    resampler: LinearResampler,
}

impl FormatConverter {
    /// # Errors
    ///
    /// [`ConvertError::InvalidSource`] when `source` has a zero rate or zero
    /// channels, [`ConvertError::UnsupportedTarget`] unless `target` is a
    /// valid mono `i16` format.
    pub fn new(source: AudioFormat, target: AudioFormat) -> Result<Self, ConvertError> {
        if !source.is_valid() {
            return Err(ConvertError::InvalidSource(source));
        }
        if !target.is_valid() || target.channels != 1 || target.sample_format != SampleFormat::I16
        {
            return Err(ConvertError::UnsupportedTarget(target));
        }
        Ok(Self {
            source,
            target,
            resampler: LinearResampler::new(source.sample_rate, target.sample_rate),
        })
    }

    pub fn source(&self) -> AudioFormat {
        self.source
    }

    pub fn target(&self) -> AudioFormat {
        self.target
    }

    /// Convert the next buffer of the stream to mono `i16` at the target
    /// rate.  A rejected buffer leaves the resampling state untouched.
    pub fn convert(&mut self, buffer: &AudioBuffer) -> Result<Vec<i16>, ConvertError> {
        if buffer.format() != self.source {
            return Err(ConvertError::FormatMismatch {
                expected: self.source,
                actual: buffer.format(),
            });
        }

        let samples = to_f32(buffer.samples());
        let mono = downmix(&samples, self.source.channels);
        let resampled = self.resampler.process(&mono);
        Ok(to_i16(&resampled))
    }
}

// ---------------------------------------------------------------------------
// LinearResampler
// ---------------------------------------------------------------------------

/// Streaming linear-interpolation resampler for one mono signal.
///
/// Output frame `k` sits at input position `k * source / target`, computed
/// in integers on the reduced ratio.  A frame is emitted once both of its
/// neighbouring input samples have arrived.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    source_rate: u64,
    target_rate: u64,
    /// Input frames seen so far.
    consumed: u64,
    /// Output frames emitted so far.
    produced: u64,
    /// Input sample at index `consumed - 1`.
    last: f32,
}

impl LinearResampler {
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        let divisor = gcd(source_rate as u64, target_rate as u64).max(1);
        Self {
            source_rate: source_rate as u64 / divisor,
            target_rate: target_rate as u64 / divisor,
            consumed: 0,
            produced: 0,
            last: 0.0,
        }
    }

    /// Resample the next chunk of the signal.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.source_rate == self.target_rate {
            return input.to_vec();
        }
        if self.source_rate == 0 || self.target_rate == 0 {
            return Vec::new();
        }

        let end = self.consumed + input.len() as u64;
        let mut output = Vec::with_capacity(
            target_frame_count(input.len(), self.source_rate as u32, self.target_rate as u32),
        );

        loop {
            let position = self.produced * self.source_rate;
            let idx = position / self.target_rate;
            let rem = position % self.target_rate;

            let needed = if rem == 0 { idx } else { idx + 1 };
            if needed >= end {
                break;
            }

            let a = self.sample_at(idx, input);
            let sample = if rem == 0 {
                a
            } else {
                let b = self.sample_at(idx + 1, input);
                let frac = rem as f32 / self.target_rate as f32;
                a * (1.0 - frac) + b * frac
            };

            output.push(sample);
            self.produced += 1;
        }

        if let Some(&last) = input.last() {
            self.last = last;
        }
        self.consumed = end;
        output
    }

    /// Sample at absolute input index `idx`; at most one frame behind the
    /// current chunk.
    fn sample_at(&self, idx: u64, input: &[f32]) -> f32 {
        if idx >= self.consumed {
            input[(idx - self.consumed) as usize]
        } else {
            self.last
        }
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Number of output frames for `frames` input frames at the given rates.
///
/// ```rust
/// use realtime_session::audio::target_frame_count;
///
/// assert_eq!(target_frame_count(480, 48_000, 24_000), 240);
/// assert_eq!(target_frame_count(80, 8_000, 24_000), 240);
/// assert_eq!(target_frame_count(441, 44_100, 24_000), 240);
/// ```
pub fn target_frame_count(frames: usize, source_rate: u32, target_rate: u32) -> usize {
    if source_rate == 0 {
        return 0;
    }
    (frames as u64 * target_rate as u64).div_ceil(source_rate as u64) as usize
}

/// Normalise native samples to `f32` in `[-1.0, 1.0]`.
pub fn to_f32(samples: &Samples) -> Vec<f32> {
    match samples {
        Samples::F32(s) => s.clone(),
        Samples::I16(s) => s.iter().map(|&v| v as f32 / i16::MAX as f32).collect(),
    }
}

/// Mix interleaved multi-channel audio down to mono by averaging all channels.
///
/// * `channels == 1` returns the input unchanged.
/// * `channels == 0` returns an empty vector.
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Resample a complete mono take from `source_rate` to `target_rate`.
///
/// Produces [`target_frame_count`] frames; frames past the last input
/// sample hold its value.
pub fn resample_linear(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate {
        return samples.to_vec();
    }

    let Some(&last) = samples.last() else {
        return Vec::new();
    };
    if source_rate == 0 || target_rate == 0 {
        return Vec::new();
    }

    let mut output = LinearResampler::new(source_rate, target_rate).process(samples);
    output.resize(target_frame_count(samples.len(), source_rate, target_rate), last);
    output
}

/// Quantise `f32` samples to `i16`, clamping out-of-range values.
pub fn to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
