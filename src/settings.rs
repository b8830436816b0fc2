//! Recorder settings
//!
//! Settings are stored as a camelCase JSON file. Every field has a
//! default, so a partial (or missing) file is valid.

use crate::export::{ExportQuality, DEFAULT_TRANSITION_DURATION_SECS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderSettings {
    /// FFmpeg binary used for encoding and export
    pub ffmpeg_path: PathBuf,

    pub ffprobe_path: PathBuf,

    /// Where segment files are written; next to the destination when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments_dir: Option<PathBuf>,

    /// Cross-fade between segments when merging
    pub transitions: bool,

    pub transition_duration_secs: f64,

    pub export_preset: ExportQuality,

    /// Samples allowed to wait on a writer before new ones are dropped
    pub max_pending_samples: usize,

    /// Minimum media time between progress notifications
    pub progress_interval_secs: f64,

    /// Frame rate segments are encoded at
    pub frame_rate: u32,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            segments_dir: None,
            transitions: false,
            transition_duration_secs: DEFAULT_TRANSITION_DURATION_SECS,
            export_preset: ExportQuality::Medium,
            max_pending_samples: 120,
            progress_interval_secs: 0.1,
            frame_rate: 30,
        }
    }
}

impl RecorderSettings {
    /// Read settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No settings at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {:?}", path))?;
        let settings: RecorderSettings = serde_json::from_str(&content)
            .with_context(|| format!("Invalid settings file {:?}", path))?;

        tracing::debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Write settings to `path`, creating its directory if needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create settings directory {:?}", parent))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write settings to {:?}", path))?;
        Ok(())
    }
}
