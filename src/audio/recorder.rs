//! Session recorder: taps the local (and optionally remote) audio source,
//! converts every buffer to mono 16-bit PCM and appends it to one WAV file
//! per source.
//!
//! # State machine
//!
//! ```text
//! Idle ──start──▶ Active ──stop───▶ Idle   (files finalized, paths returned)
//!                        ──cancel─▶ Idle   (files deleted)
//! ```
//!
//! # Locking
//!
//! Two mutexes, always taken in this order:
//!
//! * `lifecycle` serialises `start` / `stop` / `cancel` and owns the list of
//!   tapped sources.
//! * `shared` holds the active flag and the open sinks.  It is the only state
//!   touched by capture callbacks.  A callback writes only while `active` is
//!   set and its sink is present, so once teardown has taken the sinks out,
//!   late buffers are dropped instead of reaching a closed file.
//!
//! `shared` is never held while calling into a source: a capture thread may
//! be blocked on `shared` while holding the source's own tap lock.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::config::RecordingConfig;
use crate::lock;

use super::convert::FormatConverter;
use super::format::{AudioBuffer, AudioFormat};
use super::sink::WavSink;
use super::source::AudioSource;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Errors returned by recorder operations.
#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("a recording is already in progress")]
    AlreadyInProgress,

    #[error("no recording in progress")]
    NoneInProgress,

    #[error("failed to create recording file {}: {source}", .path.display())]
    FailedToCreateFile {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("failed to start recording: {0}")]
    FailedToStart(String),

    #[error("failed to stop recording: {0}")]
    FailedToStop(String),
}

/// Which side of the conversation a source carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRole {
    /// Locally captured microphone audio.
    User,
    /// Audio received from the remote peer.
    Assistant,
}

impl SourceRole {
    pub fn label(self) -> &'static str {
        match self {
            SourceRole::User => "user",
            SourceRole::Assistant => "assistant",
        }
    }
}

/// Finalized recording files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingOutput {
    pub user: PathBuf,
    /// `None` when remote audio was not requested or could not be captured.
    pub assistant: Option<PathBuf>,
}

/// Where and how recordings are written.
#[derive(Debug, Clone)]
pub struct RecorderOptions {
    pub output_dir: PathBuf,
    pub sample_rate: u32,
    pub file_prefix: String,
}

impl RecorderOptions {
    pub fn from_config(config: &RecordingConfig) -> Self {
        Self {
            output_dir: config.resolved_output_dir(),
            sample_rate: config.sample_rate,
            file_prefix: config.file_prefix.clone(),
        }
    }

    /// Target format of every sink.
    pub fn target_format(&self) -> AudioFormat {
        AudioFormat::recording(self.sample_rate)
    }
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SinkState {
    active: bool,
    sinks: Vec<(SourceRole, WavSink)>,
}

impl SinkState {
    fn sink_mut(&mut self, role: SourceRole) -> Option<&mut WavSink> {
        self.sinks
            .iter_mut()
            .find(|(r, _)| *r == role)
            .map(|(_, sink)| sink)
    }

    fn take_sink(&mut self, role: SourceRole) -> Option<WavSink> {
        let idx = self.sinks.iter().position(|(r, _)| *r == role)?;
        Some(self.sinks.remove(idx).1)
    }
}

struct TappedSource {
    role: SourceRole,
    source: Arc<dyn AudioSource>,
}

struct PreparedSink {
    role: SourceRole,
    source: Arc<dyn AudioSource>,
    converter: FormatConverter,
    sink: WavSink,
}

// ---------------------------------------------------------------------------
// AudioCaptureRecorder
// ---------------------------------------------------------------------------

/// Records a session's audio to WAV files.
///
/// The native format of the **local** source must be available when
/// recording starts; otherwise `start` fails with
/// [`RecordingError::FailedToStart`].  Any failure on the **remote** source
/// degrades to a local-only recording.
pub struct AudioCaptureRecorder {
    options: RecorderOptions,
    lifecycle: Mutex<Vec<TappedSource>>,
    shared: Arc<Mutex<SinkState>>,
}

impl AudioCaptureRecorder {
    pub fn new(options: RecorderOptions) -> Self {
        Self {
            options,
            lifecycle: Mutex::new(Vec::new()),
            shared: Arc::new(Mutex::new(SinkState::default())),
        }
    }

    pub fn options(&self) -> &RecorderOptions {
        &self.options
    }

    pub fn is_recording(&self) -> bool {
        lock(&self.shared).active
    }

    /// Begin recording `local` and, when given, `remote`.
    ///
    /// # Errors
    ///
    /// * [`RecordingError::AlreadyInProgress`] while a recording is active.
    /// * [`RecordingError::FailedToCreateFile`] when the local file cannot be
    ///   created.
    /// * [`RecordingError::FailedToStart`] when the local source has no usable
    ///   native format or refuses to start (e.g. the device is held by the
    ///   transport engine).
    pub fn start(
        &self,
        local: Arc<dyn AudioSource>,
        remote: Option<Arc<dyn AudioSource>>,
    ) -> Result<(), RecordingError> {
        let mut tapped = lock(&self.lifecycle);
        if lock(&self.shared).active {
            return Err(RecordingError::AlreadyInProgress);
        }

        std::fs::create_dir_all(&self.options.output_dir).map_err(|e| {
            RecordingError::FailedToCreateFile {
                path: self.options.output_dir.clone(),
                source: hound::Error::IoError(e),
            }
        })?;

        let suffix = file_suffix();
        let mut prepared = vec![self.prepare(SourceRole::User, local, &suffix)?];

        if let Some(remote) = remote {
            match self.prepare(SourceRole::Assistant, remote, &suffix) {
                Ok(p) => prepared.push(p),
                Err(e) => log::warn!("recorder: remote audio unavailable, recording local only: {e}"),
            }
        }

        // Install taps.  A local failure aborts; a remote failure drops
        // that sink only.
        let mut sinks = Vec::with_capacity(prepared.len());
        for p in prepared {
            let callback = self.capture_callback(p.role, p.converter);
            match p.source.install_tap(callback) {
                Ok(()) => {
                    tapped.push(TappedSource {
                        role: p.role,
                        source: p.source,
                    });
                    sinks.push((p.role, p.sink));
                }
                Err(e) if p.role == SourceRole::Assistant => {
                    log::warn!("recorder: cannot tap remote audio, recording local only: {e}");
                    discard(p.sink);
                }
                Err(e) => {
                    discard(p.sink);
                    for (_, sink) in sinks.drain(..) {
                        discard(sink);
                    }
                    for t in tapped.drain(..) {
                        t.source.remove_tap();
                    }
                    return Err(RecordingError::FailedToStart(e.to_string()));
                }
            }
        }

        {
            let mut state = lock(&self.shared);
            state.active = true;
            state.sinks = sinks;
        }

        // Start the capture pipelines.
        let mut idx = 0;
        while idx < tapped.len() {
            let role = tapped[idx].role;
            match tapped[idx].source.start() {
                Ok(()) => idx += 1,
                Err(e) if role == SourceRole::Assistant => {
                    log::warn!("recorder: remote capture refused to start, recording local only: {e}");
                    let t = tapped.remove(idx);
                    t.source.remove_tap();
                    if let Some(sink) = lock(&self.shared).take_sink(role) {
                        discard(sink);
                    }
                }
                Err(e) => {
                    log::error!("recorder: capture refused to start: {e}");
                    let sinks = Self::deactivate(&self.shared);
                    Self::release_sources(&mut tapped);
                    for (_, sink) in sinks {
                        discard(sink);
                    }
                    return Err(RecordingError::FailedToStart(e.to_string()));
                }
            }
        }

        log::info!(
            "recorder: started ({} source(s), {})",
            tapped.len(),
            self.options.target_format()
        );
        Ok(())
    }

    /// Stop recording and return the finalized file locations.
    pub fn stop(&self) -> Result<RecordingOutput, RecordingError> {
        let mut tapped = lock(&self.lifecycle);
        let sinks = self.teardown(&mut tapped)?;

        let mut user = None;
        let mut assistant = None;
        let mut first_error = None;

        for (role, sink) in sinks {
            let samples = sink.samples_written();
            match sink.finalize() {
                Ok(path) => {
                    log::info!(
                        "recorder: {} track finalized ({samples} samples) → {}",
                        role.label(),
                        path.display()
                    );
                    match role {
                        SourceRole::User => user = Some(path),
                        SourceRole::Assistant => assistant = Some(path),
                    }
                }
                Err(e) => {
                    log::error!("recorder: failed to finalize {} track: {e}", role.label());
                    first_error.get_or_insert(e.to_string());
                }
            }
        }

        if let Some(e) = first_error {
            return Err(RecordingError::FailedToStop(e));
        }

        let user = user.ok_or_else(|| RecordingError::FailedToStop("local track missing".into()))?;
        Ok(RecordingOutput { user, assistant })
    }

    /// Stop recording and delete the output files.
    pub fn cancel(&self) -> Result<(), RecordingError> {
        let mut tapped = lock(&self.lifecycle);
        let sinks = self.teardown(&mut tapped)?;

        let mut first_error = None;
        for (role, sink) in sinks {
            let path = sink.path().to_path_buf();
            if let Err(e) = sink.discard() {
                log::error!("recorder: failed to delete {}: {e}", path.display());
                first_error.get_or_insert(e.to_string());
            } else {
                log::debug!("recorder: {} track discarded", role.label());
            }
        }

        match first_error {
            Some(e) => Err(RecordingError::FailedToStop(e)),
            None => {
                log::info!("recorder: cancelled");
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn prepare(
        &self,
        role: SourceRole,
        source: Arc<dyn AudioSource>,
        suffix: &str,
    ) -> Result<PreparedSink, RecordingError> {
        let target = self.options.target_format();

        let native = source
            .native_format()
            .filter(AudioFormat::is_valid)
            .ok_or_else(|| {
                RecordingError::FailedToStart(format!(
                    "{} source has no native capture format yet",
                    role.label()
                ))
            })?;

        let converter = FormatConverter::new(native, target)
            .map_err(|e| RecordingError::FailedToStart(e.to_string()))?;

        let path = self.file_path(role, suffix);
        let sink = WavSink::create(&path, target).map_err(|source| {
            RecordingError::FailedToCreateFile {
                path: path.clone(),
                source,
            }
        })?;

        log::debug!(
            "recorder: {} {native} → {target} at {}",
            role.label(),
            path.display()
        );

        Ok(PreparedSink {
            role,
            source,
            converter,
            sink,
        })
    }

    fn file_path(&self, role: SourceRole, suffix: &str) -> PathBuf {
        self.options.output_dir.join(format!(
            "{}-{}-{suffix}.wav",
            self.options.file_prefix,
            role.label()
        ))
    }

    /// Per-buffer callback run on the capture thread.  Conversion happens
    /// outside the lock; the write happens under it.
    fn capture_callback(
        &self,
        role: SourceRole,
        mut converter: FormatConverter,
    ) -> Box<dyn FnMut(AudioBuffer) + Send + 'static> {
        let shared = Arc::clone(&self.shared);
        Box::new(move |buffer: AudioBuffer| {
            let samples = match converter.convert(&buffer) {
                Ok(samples) => samples,
                Err(e) => {
                    log::warn!("recorder: dropped {} buffer: {e}", role.label());
                    return;
                }
            };

            let mut state = lock(&shared);
            if !state.active {
                return;
            }
            if let Some(sink) = state.sink_mut(role) {
                if let Err(e) = sink.write(&samples) {
                    log::warn!("recorder: failed to write {} buffer: {e}", role.label());
                }
            }
        })
    }

    /// Take the sinks out of the shared state, then uninstall taps and stop
    /// the sources.  Fails when no recording is active.
    fn teardown(
        &self,
        tapped: &mut Vec<TappedSource>,
    ) -> Result<Vec<(SourceRole, WavSink)>, RecordingError> {
        if !lock(&self.shared).active {
            return Err(RecordingError::NoneInProgress);
        }
        let sinks = Self::deactivate(&self.shared);
        Self::release_sources(tapped);
        Ok(sinks)
    }

    fn deactivate(shared: &Mutex<SinkState>) -> Vec<(SourceRole, WavSink)> {
        let mut state = lock(shared);
        state.active = false;
        std::mem::take(&mut state.sinks)
    }

    fn release_sources(tapped: &mut Vec<TappedSource>) {
        for t in tapped.drain(..) {
            t.source.remove_tap();
            t.source.stop();
        }
    }
}

impl Drop for AudioCaptureRecorder {
    fn drop(&mut self) {
        if self.is_recording() {
            if let Err(e) = self.cancel() {
                log::warn!("recorder: cancel on drop failed: {e}");
            }
        }
    }
}

/// `<timestamp>-<short id>`, shared by all files of one recording.
fn file_suffix() -> String {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{stamp}-{}", &id[..8])
}

fn discard(sink: WavSink) {
    let path: &Path = sink.path();
    let display = path.display().to_string();
    if let Err(e) = sink.discard() {
        log::warn!("recorder: failed to delete {display}: {e}");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
