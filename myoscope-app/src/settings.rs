//! Persistent application settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use myoscope_core::{DisplayConfig, EngineConfig, SessionConfig};
use serde::{Deserialize, Serialize};

/// Overrides the settings file location.
pub const SETTINGS_ENV: &str = "MYOSCOPE_SETTINGS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Connect to this address at startup instead of waiting for `connect`.
    pub device_address: Option<String>,
    pub subject: String,
    pub shift: String,
    pub emg_scale: f32,
    pub mvc_scale: f32,
    pub recordings_dir: PathBuf,
    pub output_root: PathBuf,
    pub repetitions_per_motion: usize,
    pub schedule_seed: Option<u64>,
    pub connect_attempts: u32,
    pub extract_interval_ms: u64,
    pub render_interval_ms: u64,
    /// The log surface reports one frame in this many.
    pub frame_log_every: u64,
    pub simulator_seed: Option<u64>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            device_address: None,
            subject: "1".into(),
            shift: "0".into(),
            emg_scale: 20.0,
            mvc_scale: 0.3,
            recordings_dir: PathBuf::from("recordingfiles"),
            output_root: PathBuf::from("."),
            repetitions_per_motion: 5,
            schedule_seed: None,
            connect_attempts: 3,
            extract_interval_ms: 47,
            render_interval_ms: 50,
            frame_log_every: 20,
            simulator_seed: None,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.device_address = self
            .device_address
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.subject = normalize_label(&self.subject, "1");
        self.shift = normalize_label(&self.shift, "0");
        if !self.emg_scale.is_finite() || self.emg_scale <= 0.0 {
            self.emg_scale = 20.0;
        }
        self.emg_scale = self.emg_scale.clamp(1.0, 1_000.0);
        if !self.mvc_scale.is_finite() {
            self.mvc_scale = 0.3;
        }
        self.mvc_scale = self.mvc_scale.clamp(0.0, 10.0);
        self.repetitions_per_motion = self.repetitions_per_motion.clamp(1, 100);
        self.connect_attempts = self.connect_attempts.clamp(1, 10);
        self.extract_interval_ms = self.extract_interval_ms.clamp(1, 1_000);
        self.render_interval_ms = self.render_interval_ms.clamp(10, 1_000);
        self.frame_log_every = self.frame_log_every.max(1);
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            extract_interval: Duration::from_millis(self.extract_interval_ms),
            ..EngineConfig::default()
        }
    }

    pub fn display_config(&self) -> DisplayConfig {
        DisplayConfig {
            tick_interval: Duration::from_millis(self.render_interval_ms),
            channel_spacing: self.emg_scale,
            ..DisplayConfig::default()
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            connect_attempts: self.connect_attempts,
            recordings_dir: self.recordings_dir.clone(),
            output_root: self.output_root.clone(),
            repetitions_per_motion: self.repetitions_per_motion,
            schedule_seed: self.schedule_seed,
            ..SessionConfig::default()
        }
    }
}

/// Subject and shift become directory names: keep them to `[A-Za-z0-9_-]`.
fn normalize_label(raw: &str, fallback: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if cleaned.is_empty() {
        fallback.into()
    } else {
        cleaned
    }
}

pub fn settings_path() -> PathBuf {
    std::env::var_os(SETTINGS_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(default_settings_path)
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Myoscope")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("myoscope")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
