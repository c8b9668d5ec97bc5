//! Session configuration.
//!
//! Every tunable policy value the engine exposes lives here: energy gate,
//! silence-commit duration, playback pre-buffer depth, action deadline,
//! cancel-ack timeout. None of them are correctness requirements, so none
//! are hard-coded — tests inject their own values and operators override
//! via a TOML file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Config file name inside the platform config directory.
const CONFIG_FILE: &str = "config.toml";

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    pub turn: TurnConfig,
    pub actions: ActionsConfig,
    pub transport: TransportConfig,
}

impl Config {
    /// Load from an explicit path, or from the platform config dir.
    /// A missing file yields the defaults; a malformed file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))
    }
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "zeroclaw-labs", "clawvoice")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

// ── Audio format ──────────────────────────────────────────────────

/// Session-wide audio constants: PCM16 mono at a fixed sample rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate in Hz for both capture and playback.
    pub sample_rate: u32,
    /// Samples per captured frame.
    pub frame_samples: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            frame_samples: 1024,
        }
    }
}

impl AudioConfig {
    /// Bytes per frame (PCM16 mono).
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples * crate::audio::BYTES_PER_SAMPLE
    }

    /// Frame duration in milliseconds.
    pub fn frame_duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.frame_samples as u64 * 1000 / u64::from(self.sample_rate)
    }
}

// ── Capture ───────────────────────────────────────────────────────

/// Who decides when a user turn ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VadMode {
    /// The remote service detects speech boundaries (default).
    #[default]
    Server,
    /// The capture loop emits `buffer_commit` after a silence run.
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// RMS threshold (full-scale-relative) below which a frame is not
    /// sent. `0.0` disables the gate. Tunable policy, not correctness.
    pub energy_gate: f32,
    pub vad_mode: VadMode,
    /// Manual mode: silence duration that triggers one `buffer_commit`.
    pub commit_silence_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            energy_gate: 0.01,
            vad_mode: VadMode::Server,
            commit_silence_ms: 500,
        }
    }
}

// ── Playback ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Minimum buffered audio before the first pop of each response.
    pub prebuffer_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { prebuffer_ms: 200 }
    }
}

impl PlaybackConfig {
    /// Pre-buffer depth in frames for the session's audio format.
    pub fn prebuffer_frames(&self, audio: &AudioConfig) -> usize {
        let frame_ms = audio.frame_duration_ms();
        if frame_ms == 0 {
            return 0;
        }
        (self.prebuffer_ms as usize).div_ceil(frame_ms as usize)
    }
}

// ── Turn machine ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// How long to wait in `Interrupted` for a cancel acknowledgement
    /// before resuming. The cancel itself is advisory.
    pub cancel_ack_timeout_ms: u64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            cancel_ack_timeout_ms: 750,
        }
    }
}

// ── Actions ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionsConfig {
    /// Per-invocation handler deadline.
    pub deadline_ms: u64,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self { deadline_ms: 10_000 }
    }
}

// ── Transport ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// WebSocket URL of the speech-to-speech service.
    pub url: String,
    /// Optional bearer token. Usually supplied via CLAWVOICE_TOKEN.
    pub token: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "wss://127.0.0.1:8787/v1/session".into(),
            token: None,
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
