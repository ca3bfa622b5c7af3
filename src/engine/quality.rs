//! Quality selection: options offered for a resolved video and the named
//! presets accepted from users.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::MediaInfo;

pub const BEST_SELECTOR: &str = "bestvideo+bestaudio/best";
pub const AUDIO_SELECTOR: &str = "bestaudio/best";
pub const AUDIO_M4A_SELECTOR: &str = "bestaudio[ext=m4a]/bestaudio";

const STANDARD_HEIGHTS: [u32; 8] = [2160, 1440, 1080, 720, 480, 360, 240, 144];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityOption {
    /// Format selector passed to the engine
    pub id: String,
    pub label: String,
}

impl QualityOption {
    fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

fn height_selector(height: u32) -> String {
    format!("bestvideo[height<={h}]+bestaudio/best[height<={h}]", h = height)
}

/// Options for a resolved video: best, one per available standard height
/// (highest first), then the audio-only variants.
pub fn quality_options(info: &MediaInfo) -> Vec<QualityOption> {
    let mut options = vec![QualityOption::new(BEST_SELECTOR, "Best Quality (Video + Audio)")];

    for height in STANDARD_HEIGHTS {
        if info.formats.iter().any(|f| f.height == Some(height)) {
            options.push(QualityOption::new(
                height_selector(height),
                format!("{}p (Video + Audio)", height),
            ));
        }
    }

    options.push(QualityOption::new(AUDIO_SELECTOR, "Audio Only (Best Quality)"));
    options.push(QualityOption::new(AUDIO_M4A_SELECTOR, "Audio Only (M4A)"));
    options
}

/// Quality named on the command line or in a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualityPreset {
    Best,
    Height(u32),
    Audio,
    /// Anything else is passed through as a raw format selector
    Raw(String),
}

impl QualityPreset {
    pub fn selector(&self) -> String {
        match self {
            QualityPreset::Best => BEST_SELECTOR.to_string(),
            QualityPreset::Height(height) => height_selector(*height),
            QualityPreset::Audio => AUDIO_SELECTOR.to_string(),
            QualityPreset::Raw(raw) => raw.clone(),
        }
    }
}

impl FromStr for QualityPreset {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let preset = match s.to_ascii_lowercase().as_str() {
            "best" => QualityPreset::Best,
            "audio" => QualityPreset::Audio,
            "1080p" => QualityPreset::Height(1080),
            "720p" => QualityPreset::Height(720),
            "480p" => QualityPreset::Height(480),
            _ => QualityPreset::Raw(s.to_string()),
        };
        Ok(preset)
    }
}

/// Map a user-supplied quality onto a format selector
pub fn resolve_selector(quality: &str) -> String {
    match quality.parse::<QualityPreset>() {
        Ok(preset) => preset.selector(),
        Err(never) => match never {},
    }
}
