//! Capturable audio sources.
//!
//! [`AudioSource`] is the seam between the recorder and whatever produces
//! PCM: the local microphone ([`MicrophoneSource`], built on `cpal`) or a
//! remote track exposed by the transport engine.  A source delivers
//! [`AudioBuffer`]s to at most one installed tap, on its own capture thread.

use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use crate::lock;

use super::format::{AudioBuffer, AudioFormat, SampleFormat};

/// Callback invoked once per captured buffer, on the capture thread.
pub type CaptureCallback = Box<dyn FnMut(AudioBuffer) + Send + 'static>;

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while setting up or running audio capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("input device not found: {0}")]
    DeviceNotFound(String),

    #[error("failed to enumerate input devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("unsupported native sample format: {0}")]
    UnsupportedSampleFormat(String),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("a capture tap is already installed")]
    TapAlreadyInstalled,

    #[error("capture thread failed: {0}")]
    Thread(String),

    /// The source cannot be captured on this platform (e.g. audio already
    /// rendered by the transport engine).
    #[error("capture not supported: {0}")]
    Unsupported(String),
}

// ---------------------------------------------------------------------------
// AudioSource trait
// ---------------------------------------------------------------------------

/// A source of PCM audio that the recorder can tap.
///
/// Implementations must be `Send + Sync`; taps are called from a capture
/// thread that is independent of the caller.
pub trait AudioSource: Send + Sync {
    /// The format buffers are currently delivered in, or `None` when the
    /// device is not ready yet.
    fn native_format(&self) -> Option<AudioFormat>;

    /// Install the per-buffer callback.  Only one tap may be installed.
    fn install_tap(&self, callback: CaptureCallback) -> Result<(), CaptureError>;

    /// Remove the tap.  No-op when none is installed.
    fn remove_tap(&self);

    /// Start delivering buffers.  Starting a running source is a no-op.
    fn start(&self) -> Result<(), CaptureError>;

    /// Stop delivering buffers and release the device.  Returns once the
    /// capture thread has finished.
    fn stop(&self);
}

// Compile-time assertion: Box<dyn AudioSource> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn AudioSource>) {}
};

type SharedTap = Arc<Mutex<Option<CaptureCallback>>>;

// ---------------------------------------------------------------------------
// MicrophoneSource
// ---------------------------------------------------------------------------

/// Local microphone capture built on `cpal`.
///
/// `cpal::Stream` is not `Send` on every platform, so the stream is built,
/// played and dropped on a dedicated `audio-capture` thread.  The source
/// itself only holds the stop signal and the join handle.
pub struct MicrophoneSource {
    device_name: Option<String>,
    format: AudioFormat,
    tap: SharedTap,
    worker: Mutex<Option<CaptureWorker>>,
}

struct CaptureWorker {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl MicrophoneSource {
    /// Use the named input device, or the system default when `device_name`
    /// is `None`.
    ///
    /// # Errors
    ///
    /// [`CaptureError::NoDevice`] / [`CaptureError::DeviceNotFound`] when the
    /// device is missing, [`CaptureError::DefaultConfig`] when it cannot
    /// report a stream configuration.
    pub fn new(device_name: Option<&str>) -> Result<Self, CaptureError> {
        let device = resolve_device(device_name)?;
        let supported = device.default_input_config()?;
        let sample_format = native_sample_format(supported.sample_format())?;

        let format = AudioFormat::new(
            supported.sample_rate().0,
            supported.channels(),
            sample_format,
        );

        log::info!(
            "microphone: {} ({format})",
            device.name().unwrap_or_else(|_| "<unnamed>".into())
        );

        Ok(Self {
            device_name: device_name.map(str::to_owned),
            format,
            tap: Arc::new(Mutex::new(None)),
            worker: Mutex::new(None),
        })
    }
}

impl AudioSource for MicrophoneSource {
    fn native_format(&self) -> Option<AudioFormat> {
        Some(self.format)
    }

    fn install_tap(&self, callback: CaptureCallback) -> Result<(), CaptureError> {
        let mut tap = lock(&self.tap);
        if tap.is_some() {
            return Err(CaptureError::TapAlreadyInstalled);
        }
        *tap = Some(callback);
        Ok(())
    }

    fn remove_tap(&self) {
        lock(&self.tap).take();
    }

    fn start(&self) -> Result<(), CaptureError> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), CaptureError>>(1);
        let device_name = self.device_name.clone();
        let tap = Arc::clone(&self.tap);

        let handle = std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || run_capture(device_name, tap, ready_tx, stop_rx))
            .map_err(|e| CaptureError::Thread(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                *worker = Some(CaptureWorker { stop_tx, handle });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(CaptureError::Thread("capture thread exited before start".into()))
            }
        }
    }

    fn stop(&self) {
        let worker = lock(&self.worker).take();

        if let Some(worker) = worker {
            let _ = worker.stop_tx.send(());
            if worker.handle.join().is_err() {
                log::error!("microphone: capture thread panicked");
            }
        }
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Body of the `audio-capture` thread: build and play the stream, report
/// readiness, then hold the stream until told to stop.
fn run_capture(
    device_name: Option<String>,
    tap: SharedTap,
    ready_tx: mpsc::SyncSender<Result<(), CaptureError>>,
    stop_rx: mpsc::Receiver<()>,
) {
    let stream = match build_stream(device_name.as_deref(), tap) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(e.into()));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    // Blocks until `stop` sends or the source is dropped.
    let _ = stop_rx.recv();
    drop(stream);
    log::debug!("microphone: capture stream released");
}

fn build_stream(device_name: Option<&str>, tap: SharedTap) -> Result<cpal::Stream, CaptureError> {
    let device = resolve_device(device_name)?;
    let supported = device.default_input_config()?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    let on_error = |err: cpal::StreamError| {
        log::error!("cpal stream error: {err}");
    };

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                deliver(&tap, AudioBuffer::from_f32(sample_rate, channels, data.to_vec()));
            },
            on_error,
            None,
        )?,
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                deliver(&tap, AudioBuffer::from_i16(sample_rate, channels, data.to_vec()));
            },
            on_error,
            None,
        )?,
        other => return Err(CaptureError::UnsupportedSampleFormat(format!("{other:?}"))),
    };

    Ok(stream)
}

fn deliver(tap: &SharedTap, buffer: AudioBuffer) {
    let mut tap = lock(tap);
    if let Some(callback) = tap.as_mut() {
        callback(buffer);
    }
}

fn resolve_device(device_name: Option<&str>) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    match device_name {
        None => host.default_input_device().ok_or(CaptureError::NoDevice),
        Some(name) => host
            .input_devices()?
            .find(|d| d.name().is_ok_and(|n| n == name))
            .ok_or_else(|| CaptureError::DeviceNotFound(name.to_owned())),
    }
}

fn native_sample_format(format: cpal::SampleFormat) -> Result<SampleFormat, CaptureError> {
    match format {
        cpal::SampleFormat::F32 => Ok(SampleFormat::F32),
        cpal::SampleFormat::I16 => Ok(SampleFormat::I16),
        other => Err(CaptureError::UnsupportedSampleFormat(format!("{other:?}"))),
    }
}

/// Names of all input devices on the default host.
pub fn list_input_devices() -> Result<Vec<String>, CaptureError> {
    let host = cpal::default_host();
    Ok(host
        .input_devices()?
        .filter_map(|d| d.name().ok())
        .collect())
}

/// `true` when the default host has a default input device.
pub fn has_default_input_device() -> bool {
    cpal::default_host().default_input_device().is_some()
}

// ---------------------------------------------------------------------------
// MockSource (test double)
// ---------------------------------------------------------------------------

/// In-memory source for tests: buffers are delivered synchronously through
/// [`MockSource::push`] on the calling thread.
#[cfg(test)]
pub struct MockSource {
    format: Option<AudioFormat>,
    fail_start: bool,
    tap: Mutex<Option<CaptureCallback>>,
    running: std::sync::atomic::AtomicBool,
    taps_installed: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockSource {
    pub fn new(format: Option<AudioFormat>) -> Self {
        Self {
            format,
            fail_start: false,
            tap: Mutex::new(None),
            running: std::sync::atomic::AtomicBool::new(false),
            taps_installed: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// 48 kHz stereo `f32`, a typical microphone format.
    pub fn stereo_48k() -> Self {
        Self::new(Some(AudioFormat::new(48_000, 2, SampleFormat::F32)))
    }

    /// A source whose `start` fails, as when the device is owned elsewhere.
    pub fn failing_start(format: AudioFormat) -> Self {
        Self {
            fail_start: true,
            ..Self::new(Some(format))
        }
    }

    /// Deliver `buffer` to the installed tap.  Returns `false` when no tap
    /// is installed.
    pub fn push(&self, buffer: AudioBuffer) -> bool {
        let mut tap = self.tap.lock().unwrap();
        match tap.as_mut() {
            Some(callback) => {
                callback(buffer);
                true
            }
            None => false,
        }
    }

    pub fn has_tap(&self) -> bool {
        self.tap.lock().unwrap().is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn taps_installed(&self) -> usize {
        self.taps_installed.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl AudioSource for MockSource {
    fn native_format(&self) -> Option<AudioFormat> {
        self.format
    }

    fn install_tap(&self, callback: CaptureCallback) -> Result<(), CaptureError> {
        let mut tap = self.tap.lock().unwrap();
        if tap.is_some() {
            return Err(CaptureError::TapAlreadyInstalled);
        }
        *tap = Some(callback);
        self.taps_installed
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    fn remove_tap(&self) {
        self.tap.lock().unwrap().take();
    }

    fn start(&self) -> Result<(), CaptureError> {
        if self.fail_start {
            return Err(CaptureError::Unsupported(
                "input device owned by the transport engine".into(),
            ));
        }
        self.running.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, std::sync::atomic::Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
