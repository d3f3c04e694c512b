//! Configuration management for morning-tasks-rs.
//!
//! Loads config from YAML files in standard locations. Every section has
//! defaults, so a missing or partial file is fine.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::speech::VoiceParams;

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("morning-tasks")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// JSON array of time blocks, written by the checklist UI.
    pub path: PathBuf,
    pub tick_ms: u64,
    pub reload_secs: u64,
    pub preload_lead_minutes: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("schedule.json"),
            tick_ms: 1000,
            reload_secs: 5,
            preload_lead_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TTSConfig {
    pub enabled: bool,
    pub voice: String,
    pub speed: f32,
    pub model_dir: PathBuf,
    pub model_url: String,
    pub voices_url: String,
    pub tokenizer_url: String,
}

impl Default for TTSConfig {
    fn default() -> Self {
        let release =
            "https://github.com/thewh1teagle/kokoro-onnx/releases/download/model-files-v1.0";
        Self {
            enabled: true,
            voice: "af_heart".into(),
            speed: 1.0,
            model_dir: data_dir().join("kokoro"),
            model_url: format!("{release}/kokoro-v1.0.onnx"),
            voices_url: format!("{release}/voices-v1.0.bin"),
            tokenizer_url: "https://huggingface.co/hexgrad/Kokoro-82M/raw/main/tokenizer.json"
                .into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    pub enabled: bool,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // Slightly slower for clarity
            rate: 0.9,
            pitch: 1.0,
            volume: 1.0,
        }
    }
}

impl BaselineConfig {
    pub fn voice_params(&self) -> VoiceParams {
        VoiceParams {
            rate: self.rate,
            pitch: self.pitch,
            volume: self.volume,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub path: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("history.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub notifications: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            notifications: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schedule: ScheduleConfig,
    pub tts: TTSConfig,
    pub baseline: BaselineConfig,
    pub history: HistoryConfig,
    pub feedback: FeedbackConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/morning-tasks/config.yaml
    /// 3. /etc/morning-tasks/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/morning-tasks/config.yaml")),
                Some(PathBuf::from("/etc/morning-tasks/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match serde_yml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }
}
