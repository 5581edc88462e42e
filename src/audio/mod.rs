//! Audio capture and recording — source tap → format conversion → WAV sink.
//!
//! # Pipeline
//!
//! ```text
//! AudioSource (cpal / remote track) ──tap──▶ AudioBuffer
//!     → FormatConverter (downmix, resample, quantise) → WavSink
//! ```
//!
//! [`AudioCaptureRecorder`] owns the sinks and the start/stop/cancel
//! lifecycle; it is constructed by the session, never process-wide.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use realtime_session::audio::{AudioCaptureRecorder, MicrophoneSource, RecorderOptions};
//! use realtime_session::config::RecordingConfig;
//!
//! let recorder = AudioCaptureRecorder::new(RecorderOptions::from_config(&RecordingConfig::default()));
//! let mic = Arc::new(MicrophoneSource::new(None).unwrap());
//! recorder.start(mic, None).unwrap();
//! // ...
//! let output = recorder.stop().unwrap();
//! println!("recorded to {}", output.user.display());
//! ```

pub mod convert;
pub mod format;
pub mod recorder;
pub mod sink;
pub mod source;

pub use convert::{
    downmix, resample_linear, target_frame_count, ConvertError, FormatConverter, LinearResampler,
};
pub use format::{AudioBuffer, AudioFormat, SampleFormat, Samples};
pub use recorder::{
    AudioCaptureRecorder, RecorderOptions, RecordingError, RecordingOutput, SourceRole,
};
pub use sink::WavSink;
pub use source::{
    has_default_input_device, list_input_devices, AudioSource, CaptureCallback, CaptureError,
    MicrophoneSource,
};

// test-only re-export so other modules' tests can build sources without a device.
#[cfg(test)]
pub use source::MockSource;
