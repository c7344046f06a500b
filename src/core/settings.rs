//! Download settings and named presets
//!
//! Every job captures an immutable [`SettingsSnapshot`] at enqueue time, so edits
//! made to a preset afterwards never leak into jobs that are already queued.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::models::{AppError, AppResult};
use crate::utils::validation::is_valid_preset_name;

/// Shared, read-only settings captured by a job
pub type SettingsSnapshot = Arc<DownloadSettings>;

/// Name of the preset that always exists
pub const DEFAULT_PRESET: &str = "default";

/// Label the UI shows for settings that match no stored preset
pub const UNSAVED_PRESET: &str = "New/Unsaved";

/// SponsorBlock categories acted on when marking or removing segments
pub const SPONSORBLOCK_CATEGORIES: [&str; 11] = [
    "sponsor",
    "intro",
    "outro",
    "selfpromo",
    "interaction",
    "music_offtopic",
    "preview",
    "filler",
    "exclusive_access",
    "poi_highlight",
    "poi_nonhighlight",
];

pub const AUDIO_EXTENSIONS: [&str; 7] = ["mp3", "m4a", "aac", "opus", "flac", "wav", "vorbis"];

pub const VIDEO_EXTENSIONS: [&str; 6] = ["mp4", "mkv", "webm", "mov", "avi", "flv"];

/// Quality preference applied when audio is extracted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Quality {
    #[default]
    Best,
    Balanced,
    Smallest,
}

impl Quality {
    /// yt-dlp `--audio-quality` value (0 best, 9 worst)
    pub fn audio_quality(self) -> &'static str {
        match self {
            Quality::Best => "0",
            Quality::Balanced => "5",
            Quality::Smallest => "9",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SponsorBlockMode {
    #[default]
    Off,
    /// Mark segments as chapters
    Mark,
    /// Cut segments out of the media
    Remove,
}

/// One bundle of download options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DownloadSettings {
    /// yt-dlp format selector
    pub format: String,
    /// Human readable name of the format choice
    pub format_label: String,
    pub quality: Quality,
    /// Container/codec to convert into; `None` keeps the original
    pub final_ext: Option<String>,
    pub output_template: String,
    /// Overrides the configured download directory
    pub custom_output_dir: Option<PathBuf>,
    pub embed_thumbnail: bool,
    pub add_metadata: bool,
    pub embed_subtitles: bool,
    pub write_auto_subs: bool,
    pub sponsorblock: SponsorBlockMode,
    pub extract_comments: bool,
    /// Passed to yt-dlp verbatim, after the generated arguments
    pub extra_args: Vec<String>,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            format: "bestvideo*+bestaudio/best".to_string(),
            format_label: "Best (Video+Audio)".to_string(),
            quality: Quality::Best,
            final_ext: None,
            output_template: "%(title)s.%(ext)s".to_string(),
            custom_output_dir: None,
            embed_thumbnail: false,
            add_metadata: false,
            embed_subtitles: false,
            write_auto_subs: false,
            sponsorblock: SponsorBlockMode::Off,
            extract_comments: false,
            extra_args: Vec::new(),
        }
    }
}

impl DownloadSettings {
    pub fn validate(&self) -> AppResult<()> {
        if self.format.trim().is_empty() {
            return Err(AppError::Config("format selector must not be empty".into()));
        }
        if self.output_template.trim().is_empty() {
            return Err(AppError::Config("output template must not be empty".into()));
        }
        if let Some(ext) = &self.final_ext {
            if !self.is_audio_target() && !self.is_video_target() {
                return Err(AppError::Config(format!("unsupported final extension: {}", ext)));
            }
        }
        Ok(())
    }

    pub fn is_audio_target(&self) -> bool {
        self.final_ext
            .as_deref()
            .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext))
    }

    pub fn is_video_target(&self) -> bool {
        self.final_ext
            .as_deref()
            .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext))
    }

    /// Auto-generated subtitles are only useful when they get embedded
    pub fn embeds_subtitles(&self) -> bool {
        self.embed_subtitles || self.write_auto_subs
    }

    /// Freeze these settings for a job
    pub fn snapshot(&self) -> SettingsSnapshot {
        Arc::new(self.clone())
    }
}

/// Named settings bundles
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresetStore {
    presets: BTreeMap<String, DownloadSettings>,
}

impl Default for PresetStore {
    fn default() -> Self {
        let mut presets = BTreeMap::new();
        presets.insert(DEFAULT_PRESET.to_string(), DownloadSettings::default());
        Self { presets }
    }
}

impl PresetStore {
    pub fn names(&self) -> Vec<&str> {
        self.presets.keys().map(String::as_str).collect()
    }

    pub fn get(&self, name: &str) -> Option<&DownloadSettings> {
        self.presets.get(name)
    }

    /// Settings of the default preset, falling back to built-in defaults if a
    /// hand-edited config dropped it
    pub fn default_settings(&self) -> DownloadSettings {
        self.presets
            .get(DEFAULT_PRESET)
            .cloned()
            .unwrap_or_default()
    }

    /// Immutable snapshot of a preset for enqueueing
    pub fn snapshot(&self, name: &str) -> AppResult<SettingsSnapshot> {
        self.presets
            .get(name)
            .map(DownloadSettings::snapshot)
            .ok_or_else(|| AppError::Config(format!("unknown preset: {}", name)))
    }

    /// Insert or replace a preset
    pub fn save_preset(&mut self, name: &str, settings: DownloadSettings) -> AppResult<()> {
        if !is_valid_preset_name(name) || name == UNSAVED_PRESET {
            return Err(AppError::Config(format!("invalid preset name: '{}'", name)));
        }
        settings.validate()?;
        self.presets.insert(name.to_string(), settings);
        tracing::info!("Saved preset: {}", name);
        Ok(())
    }

    pub fn remove_preset(&mut self, name: &str) -> AppResult<DownloadSettings> {
        if name == DEFAULT_PRESET {
            return Err(AppError::Config("the default preset cannot be removed".into()));
        }
        self.presets
            .remove(name)
            .ok_or_else(|| AppError::Config(format!("unknown preset: {}", name)))
    }

    /// Name of a stored preset identical to `settings`, if any
    pub fn matching_preset(&self, settings: &DownloadSettings) -> Option<&str> {
        self.presets
            .iter()
            .find(|(_, stored)| *stored == settings)
            .map(|(name, _)| name.as_str())
    }

    /// Label for the preset picker
    pub fn display_name<'a>(&'a self, settings: &DownloadSettings) -> &'a str {
        self.matching_preset(settings).unwrap_or(UNSAVED_PRESET)
    }

    pub fn validate(&self) -> AppResult<()> {
        if !self.presets.contains_key(DEFAULT_PRESET) {
            return Err(AppError::Config("default preset is missing".into()));
        }
        for (name, settings) in &self.presets {
            settings
                .validate()
                .map_err(|e| AppError::Config(format!("preset '{}': {}", name, e)))?;
        }
        Ok(())
    }
}
