// ADSMITH Project Configuration - Validated Ingress Record
// Copyright (c) 2026 AdSmith Collective | ADSMITH
//
// Every option the pipeline recognizes lives here, validated once at the
// plan endpoint. Stages never re-parse loose dictionaries.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Shortest scene the motion providers will accept.
pub const MIN_SCENE_SECONDS: u32 = 4;
/// Total spot duration bounds.
pub const MIN_DURATION_SECONDS: u32 = 4;
pub const MAX_DURATION_SECONDS: u32 = 60;
/// Reference images forwarded to the image model, at most.
pub const MAX_REFERENCES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualStyle {
    Cinematic,
    Documentary,
    Playful,
    Minimal,
    Retro,
}

impl Default for VisualStyle {
    fn default() -> Self {
        Self::Cinematic
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Broadcast,
    Youtube,
    Instagram,
    Tiktok,
}

impl Default for Platform {
    fn default() -> Self {
        Self::Youtube
    }
}

impl Platform {
    /// Upper bound on the final file size before the encoder steps down the
    /// quality ladder.
    pub fn max_output_mb(&self) -> f64 {
        match self {
            Platform::Broadcast => 500.0,
            Platform::Youtube => 256.0,
            Platform::Instagram | Platform::Tiktok => 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "16:9")]
    Widescreen,
    #[serde(rename = "9:16")]
    Vertical,
    #[serde(rename = "1:1")]
    Square,
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self::Widescreen
    }
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Widescreen => "16:9",
            AspectRatio::Vertical => "9:16",
            AspectRatio::Square => "1:1",
        }
    }

    /// Pixel dimensions at a given resolution tier, rounded to even values
    /// for yuv420p.
    pub fn dimensions(&self, resolution: Resolution) -> (u32, u32) {
        let long = match resolution {
            Resolution::Hd720 => 1280,
            Resolution::Hd1080 => 1920,
        };
        let short = match resolution {
            Resolution::Hd720 => 720,
            Resolution::Hd1080 => 1080,
        };
        match self {
            AspectRatio::Widescreen => (long, short),
            AspectRatio::Vertical => (short, long),
            AspectRatio::Square => (short, short),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "1080p")]
    Hd1080,
}

impl Default for Resolution {
    fn default() -> Self {
        Self::Hd1080
    }
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Hd720 => "720p",
            Resolution::Hd1080 => "1080p",
        }
    }
}

/// The full set of recognized project options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub topic: String,
    #[serde(default)]
    pub style: VisualStyle,
    pub duration_seconds: u32,
    #[serde(default)]
    pub platform: Platform,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default)]
    pub resolution: Resolution,
    /// Explicit speaker -> voice id casting. Auto-cast fills gaps when enabled.
    #[serde(default)]
    pub voice_map: BTreeMap<String, String>,
    /// Reference image URIs forwarded to the image model (max 3 used).
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub include_sfx: bool,
    #[serde(default)]
    pub include_bgm: bool,
    #[serde(default)]
    pub bgm_prompt: Option<String>,
    /// Soft budget in USD; logged when exceeded, never enforced mid-flight.
    #[serde(default)]
    pub cost_cap_usd: Option<f64>,
    /// Pre-populate voice_map from the provider's voice library.
    #[serde(default)]
    pub auto_cast: bool,
    /// Chain last frames between adjacent clips (sequencer mode).
    #[serde(default)]
    pub continuity_bridge: bool,
    /// Extra critique retries allowed when a provider reports quota pressure.
    #[serde(default = "default_image_retries")]
    pub max_image_retries: u32,
    /// Free-text research notes folded into the scriptwriter context.
    #[serde(default)]
    pub research_notes: Option<String>,
    /// Motion providers disabled by the operator, by name.
    #[serde(default)]
    pub disabled_motion_providers: Vec<String>,
}

fn default_image_retries() -> u32 {
    1
}

impl ProjectConfig {
    /// Validate at ingress. Anything that fails here leaves the project in
    /// its prior state.
    pub fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(PipelineError::InvalidInput("topic must not be empty".into()));
        }
        if self.duration_seconds < MIN_DURATION_SECONDS
            || self.duration_seconds > MAX_DURATION_SECONDS
        {
            return Err(PipelineError::InvalidInput(format!(
                "duration_seconds must be within {}..={}, got {}",
                MIN_DURATION_SECONDS, MAX_DURATION_SECONDS, self.duration_seconds
            )));
        }
        if self.max_image_retries > 2 {
            return Err(PipelineError::InvalidInput(
                "max_image_retries must be 0, 1 or 2".into(),
            ));
        }
        if let Some(cap) = self.cost_cap_usd {
            if cap <= 0.0 {
                return Err(PipelineError::InvalidInput(
                    "cost_cap_usd must be positive".into(),
                ));
            }
        }
        for r in &self.references {
            if r.trim().is_empty() {
                return Err(PipelineError::InvalidInput(
                    "reference uris must not be empty".into(),
                ));
            }
        }
        Ok(())
    }

    /// References actually forwarded to the image model.
    pub fn capped_references(&self) -> &[String] {
        let n = self.references.len().min(MAX_REFERENCES);
        &self.references[..n]
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            topic: String::new(),
            style: VisualStyle::default(),
            duration_seconds: 12,
            platform: Platform::default(),
            aspect_ratio: AspectRatio::default(),
            resolution: Resolution::default(),
            voice_map: BTreeMap::new(),
            references: Vec::new(),
            include_sfx: false,
            include_bgm: false,
            bgm_prompt: None,
            cost_cap_usd: None,
            auto_cast: false,
            continuity_bridge: false,
            max_image_retries: default_image_retries(),
            research_notes: None,
            disabled_motion_providers: Vec::new(),
        }
    }
}
