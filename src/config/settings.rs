//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// SignalingConfig
// ---------------------------------------------------------------------------

/// Settings for the SDP offer/answer exchange with the realtime endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// Realtime endpoint that accepts `application/sdp` offers.
    pub base_url: String,
    /// Model identifier appended as the `model` query parameter.
    pub model: String,
    /// Bearer token (usually an ephemeral client secret).  `None` lets the
    /// caller attach authorization headers itself.
    pub api_key: Option<String>,
    /// Maximum seconds to wait for the signaling response.
    pub timeout_secs: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1/realtime".into(),
            model: "gpt-4o-realtime-preview".into(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Settings for local audio capture.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Audio input device name — `None` means the system default.
    pub input_device: Option<String>,
}

// ---------------------------------------------------------------------------
// RecordingConfig
// ---------------------------------------------------------------------------

/// Settings for session recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Target sample rate of every recording file (mono, 16-bit PCM).
    pub sample_rate: u32,
    /// Where WAV files are written.  `None` uses
    /// [`AppPaths::recordings_dir`].
    pub output_dir: Option<PathBuf>,
    /// Also record the assistant's audio when the transport exposes it.
    pub include_remote: bool,
    /// File-name prefix, e.g. `realtime-user-<timestamp>-<id>.wav`.
    pub file_prefix: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            output_dir: None,
            include_remote: true,
            file_prefix: "realtime".into(),
        }
    }
}

impl RecordingConfig {
    /// Resolved output directory.
    pub fn resolved_output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| AppPaths::new().recordings_dir)
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use realtime_session::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Signaling endpoint settings.
    pub signaling: SignalingConfig,
    /// Audio capture settings.
    pub audio: AudioConfig,
    /// Recording settings.
    pub recording: RecordingConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// so callers never need to special-case a missing file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
