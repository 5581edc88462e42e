//! `realtime-session` — diagnostics for the audio and config layers.
//!
//! ```text
//! realtime-session devices                         list input devices
//! realtime-session record --seconds 5 [--output D] record the microphone
//! realtime-session config [--init]                 show (or write) settings
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use realtime_session::{
    audio::{list_input_devices, AudioCaptureRecorder, MicrophoneSource, RecorderOptions},
    config::{AppConfig, AppPaths},
};

#[derive(Debug, Parser)]
#[command(name = "realtime-session", version, about = "Realtime session audio diagnostics")]
struct Cli {
    /// Settings file (defaults to the platform config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List audio input devices.
    Devices,

    /// Record the microphone to a 24 kHz mono WAV file.
    Record {
        /// Stop after this many seconds (Ctrl-C stops early).
        #[arg(long, default_value_t = 5)]
        seconds: u64,

        /// Output directory (overrides the configured one).
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the settings path and contents.
    Config {
        /// Write the default settings file if none exists.
        #[arg(long)]
        init: bool,
    },
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn devices(config: &AppConfig) -> Result<()> {
    let names = list_input_devices().context("failed to enumerate input devices")?;
    if names.is_empty() {
        println!("no input devices found");
        return Ok(());
    }

    let selected = config.audio.input_device.as_deref();
    for name in names {
        let marker = if Some(name.as_str()) == selected { "*" } else { " " };
        println!("{marker} {name}");
    }
    Ok(())
}

fn record(mut config: AppConfig, seconds: u64, output: Option<PathBuf>) -> Result<()> {
    if output.is_some() {
        config.recording.output_dir = output;
    }

    let microphone = Arc::new(
        MicrophoneSource::new(config.audio.input_device.as_deref())
            .context("failed to open input device")?,
    );
    let recorder = AudioCaptureRecorder::new(RecorderOptions::from_config(&config.recording));

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    recorder.start(microphone, None)?;
    println!("recording for up to {seconds} s, Ctrl-C to stop");

    rt.block_on(async {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
            _ = tokio::signal::ctrl_c() => log::info!("interrupted"),
        }
    });

    let output = recorder.stop()?;
    println!("{}", output.user.display());
    Ok(())
}

fn show_config(path: &Path, config: &AppConfig, init: bool) -> Result<()> {
    if init && !path.exists() {
        config.save_to(path)?;
        println!("wrote {}", path.display());
    }

    println!("# {}", path.display());
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings_file = cli
        .config
        .unwrap_or_else(|| AppPaths::new().settings_file);

    let config = AppConfig::load_from(&settings_file).unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    match cli.command {
        Command::Devices => devices(&config),
        Command::Record { seconds, output } => record(config, seconds, output),
        Command::Config { init } => show_config(&settings_file, &config, init),
    }
}
