// ADSMITH Provider Adapters
// Copyright (c) 2026 AdSmith Collective | ADSMITH
//
// One closed enum per modality, selected at configuration time. Adapters
// own retries, error classification and elapsed-time accounting; they never
// touch ProjectState.

pub mod audio;
pub mod critic;
pub mod image;
pub mod llm;
pub mod mock;
pub mod motion;
pub mod retry;

use crate::config::{AspectRatio, Resolution};
use std::path::PathBuf;
use std::time::Duration;

/// Per-call timeouts, by modality.
pub const LLM_TIMEOUT: Duration = Duration::from_secs(60);
pub const IMAGE_TIMEOUT: Duration = Duration::from_secs(90);
pub const AUDIO_TIMEOUT: Duration = Duration::from_secs(60);
pub const MOTION_SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);
/// Total poll budget per scene.
pub const MOTION_POLL_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// Longest prompt the image model accepts; longer prompts are truncated
/// with an ellipsis.
pub const MAX_IMAGE_PROMPT_CHARS: usize = 1800;

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    pub aspect: AspectRatio,
    pub resolution: Resolution,
    pub seed: u64,
    /// At most 3 are forwarded.
    pub references: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TtsRequest {
    pub text: String,
    pub voice_id: String,
    /// Advisory only; the provider returns natural length.
    pub duration_target_s: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct FxRequest {
    pub prompt: String,
    pub duration_s: f64,
}

#[derive(Debug, Clone)]
pub struct MotionRequest {
    /// Accepted still, on disk.
    pub image_path: PathBuf,
    pub motion_prompt: String,
    pub duration_seconds: u32,
    pub aspect: AspectRatio,
    pub resolution: Resolution,
    pub negative_prompt: Option<String>,
    /// Continuity bridge: previous clip's last frame, when sequencing.
    pub first_frame_path: Option<PathBuf>,
    pub seed: u64,
}

/// Opaque handle for an asynchronous motion task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub provider: String,
    pub task_id: String,
}

#[derive(Debug, Clone)]
pub struct VoiceInfo {
    pub voice_id: String,
    pub name: String,
    pub gender: String,
    pub accent: String,
}

#[derive(Debug, Clone, Default)]
pub struct VoiceFilter {
    pub gender: Option<String>,
    pub accent: Option<String>,
    pub search_hint: Option<String>,
}

/// Truncate a prompt to the model's limit, ellipsis included.
pub fn truncate_prompt(prompt: &str, max_chars: usize) -> String {
    if prompt.chars().count() <= max_chars {
        return prompt.to_string();
    }
    let cut: String = prompt.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", cut)
}

/// The capability record stages receive. Owned by the orchestrator.
pub struct ProviderSet {
    pub strategist: llm::LlmClient,
    pub scriptwriter: llm::LlmClient,
    pub image: image::ImageModel,
    pub critic: critic::ImageCritic,
    pub voice: audio::VoiceModel,
    /// Fixed fallback order; disabled providers are filtered by config.
    pub motion_chain: Vec<motion::MotionModel>,
}

impl ProviderSet {
    /// Wire every modality from `ADSMITH_*` environment variables.
    pub fn from_env() -> Self {
        let llm_base = std::env::var("ADSMITH_LLM_URL")
            .unwrap_or_else(|_| "http://localhost:11434/v1".to_string());
        let llm_key = std::env::var("ADSMITH_LLM_KEY").ok();
        let strategist_model = std::env::var("ADSMITH_STRATEGIST_MODEL")
            .unwrap_or_else(|_| "strategist-large".to_string());
        let script_model = std::env::var("ADSMITH_SCRIPT_MODEL")
            .unwrap_or_else(|_| "scriptwriter".to_string());

        Self {
            strategist: llm::LlmClient::http(
                "strategist",
                &llm_base,
                llm_key.as_deref(),
                &strategist_model,
                llm::LlmTuning {
                    temperature: 0.9,
                    max_tokens: 4096,
                },
            ),
            scriptwriter: llm::LlmClient::http(
                "scriptwriter",
                &llm_base,
                llm_key.as_deref(),
                &script_model,
                llm::LlmTuning {
                    temperature: 0.7,
                    max_tokens: 2048,
                },
            ),
            image: image::ImageModel::from_env(),
            critic: critic::ImageCritic::from_env(&llm_base, llm_key.as_deref()),
            voice: audio::VoiceModel::from_env(),
            motion_chain: motion::motion_chain_from_env(),
        }
    }

    /// Deterministic offline set; every artifact derives from the seed.
    pub fn offline(seed: u64) -> Self {
        Self {
            strategist: llm::LlmClient::scripted(mock::ScriptedLlm::strategist(seed)),
            scriptwriter: llm::LlmClient::scripted(mock::ScriptedLlm::scriptwriter(seed)),
            image: image::ImageModel::Mock(mock::MockImageModel::new(seed)),
            critic: critic::ImageCritic::Mock(mock::MockCritic::new()),
            voice: audio::VoiceModel::Mock(mock::MockVoice::new()),
            motion_chain: vec![
                motion::MotionModel::mock("motion-primary", seed, mock::MockMotionBehavior::Succeed),
                motion::MotionModel::mock("motion-fallback-1", seed, mock::MockMotionBehavior::Succeed),
                motion::MotionModel::mock("motion-fallback-2", seed, mock::MockMotionBehavior::Succeed),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_prompt() {
        assert_eq!(truncate_prompt("short", 10), "short");
        let long = "x".repeat(30);
        let cut = truncate_prompt(&long, 10);
        assert_eq!(cut.chars().count(), 10);
        assert!(cut.ends_with('…'));
    }
}
