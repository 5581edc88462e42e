//! WAV file sink for one recorded source.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use hound::{WavSpec, WavWriter};

use super::format::AudioFormat;

/// An open WAV file accumulating converted mono `i16` samples.
pub struct WavSink {
    path: PathBuf,
    writer: WavWriter<BufWriter<File>>,
    samples_written: u64,
}

impl WavSink {
    /// Create (truncate) `path` with a header for `format`.
    pub fn create(path: &Path, format: AudioFormat) -> Result<Self, hound::Error> {
        let spec = WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            samples_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Append samples.
    pub fn write(&mut self, samples: &[i16]) -> Result<(), hound::Error> {
        for &sample in samples {
            self.writer.write_sample(sample)?;
        }
        self.samples_written += samples.len() as u64;
        Ok(())
    }

    /// Flush, patch the header lengths and close the file.
    pub fn finalize(self) -> Result<PathBuf, hound::Error> {
        self.writer.finalize()?;
        Ok(self.path)
    }

    /// Close the file and delete it.
    pub fn discard(self) -> std::io::Result<()> {
        let path = self.path;
        if let Err(e) = self.writer.finalize() {
            log::debug!("recorder: finalize before discard failed: {e}");
        }
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
