// ADSMITH Style Profile - Brief Classification Heuristics
// Copyright (c) 2026 AdSmith Collective | ADSMITH
//
// Fast keyword pass over the brief, no LLM involved. The detected phrases
// are injected into every image and motion prompt so individually stateless
// generations stay on one aesthetic.

use crate::config::{ProjectConfig, VisualStyle};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleProfile {
    pub aesthetic: String,
    pub format: String,
    pub tone: String,
    pub pacing: String,
    /// 0.0..=1.0 per field, in declaration order.
    pub confidences: [f32; 4],
}

impl StyleProfile {
    /// Stable emphasis clause appended to image prompts.
    pub fn image_emphasis(&self) -> String {
        format!(
            "{} aesthetic, {} tone, {} composition",
            self.aesthetic, self.tone, self.format
        )
    }

    /// Stable emphasis clause appended to motion prompts.
    pub fn motion_emphasis(&self) -> String {
        format!("{} pacing, {} camera language", self.pacing, self.aesthetic)
    }
}

/// Classify the brief into a style profile. Explicit config style wins;
/// keywords in the topic raise confidence or override the defaults.
pub fn infer_style_profile(config: &ProjectConfig) -> StyleProfile {
    let topic = config.topic.to_lowercase();

    let (mut aesthetic, mut aesthetic_conf) = match config.style {
        VisualStyle::Cinematic => ("cinematic film", 0.9),
        VisualStyle::Documentary => ("naturalistic documentary", 0.9),
        VisualStyle::Playful => ("vibrant playful", 0.9),
        VisualStyle::Minimal => ("clean minimal", 0.9),
        VisualStyle::Retro => ("retro analog", 0.9),
    };

    // Topic keywords can sharpen the default aesthetic.
    if topic.contains("luxury") || topic.contains("premium") || topic.contains("watch") {
        aesthetic = "high-end editorial";
        aesthetic_conf = 0.95;
    } else if topic.contains("tech") || topic.contains("gadget") || topic.contains("app") {
        aesthetic = "sleek product tech";
        aesthetic_conf = 0.85;
    } else if topic.contains("food") || topic.contains("restaurant") || topic.contains("drink") {
        aesthetic = "appetizing macro";
        aesthetic_conf = 0.85;
    }

    let (format, format_conf) = match config.aspect_ratio {
        crate::config::AspectRatio::Vertical => ("vertical social", 0.8),
        crate::config::AspectRatio::Square => ("square feed", 0.8),
        crate::config::AspectRatio::Widescreen => ("widescreen spot", 0.8),
    };

    let (tone, tone_conf) = if topic.contains("fun") || topic.contains("party") {
        ("energetic", 0.8)
    } else if topic.contains("luxury") || topic.contains("elegant") {
        ("refined", 0.85)
    } else if topic.contains("eco") || topic.contains("nature") {
        ("warm organic", 0.75)
    } else {
        ("confident", 0.5)
    };

    // Short spots cut fast.
    let (pacing, pacing_conf) = if config.duration_seconds <= 10 {
        ("punchy rapid", 0.7)
    } else if config.duration_seconds <= 20 {
        ("steady deliberate", 0.6)
    } else {
        ("slow building", 0.6)
    };

    StyleProfile {
        aesthetic: aesthetic.to_string(),
        format: format.to_string(),
        tone: tone.to_string(),
        pacing: pacing.to_string(),
        confidences: [aesthetic_conf, format_conf, tone_conf, pacing_conf],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luxury_brief_overrides_default() {
        let cfg = ProjectConfig {
            topic: "luxury watch ad".into(),
            duration_seconds: 12,
            ..Default::default()
        };
        let profile = infer_style_profile(&cfg);
        assert_eq!(profile.aesthetic, "high-end editorial");
        assert_eq!(profile.tone, "refined");
        assert!(profile.confidences[0] > 0.9);
    }

    #[test]
    fn test_short_spot_paces_fast() {
        let cfg = ProjectConfig {
            topic: "sneaker drop".into(),
            duration_seconds: 8,
            ..Default::default()
        };
        let profile = infer_style_profile(&cfg);
        assert_eq!(profile.pacing, "punchy rapid");
    }

    #[test]
    fn test_emphasis_phrases_are_stable() {
        let cfg = ProjectConfig {
            topic: "eco bottle".into(),
            duration_seconds: 15,
            ..Default::default()
        };
        let a = infer_style_profile(&cfg);
        let b = infer_style_profile(&cfg);
        assert_eq!(a.image_emphasis(), b.image_emphasis());
        assert_eq!(a.motion_emphasis(), b.motion_emphasis());
    }
}
