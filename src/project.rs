// ADSMITH Project State - Single Source of Truth Per Spot
// Copyright (c) 2026 AdSmith Collective | ADSMITH
//
// ProjectState is owned by the orchestrator and rewritten atomically
// (temp-then-rename) on every transition, so a crash mid-stage resumes
// from the last durable state.

use crate::config::ProjectConfig;
use crate::error::{PipelineError, Result};
use crate::style::StyleProfile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const STATE_FILE: &str = "state.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Initialized,
    Planning,
    Planned,
    GeneratingImages,
    ImagesComplete,
    GeneratingVideos,
    VideosComplete,
    Assembling,
    Completed,
    RemixingAudio,
    Failed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Initialized => "initialized",
            ProjectStatus::Planning => "planning",
            ProjectStatus::Planned => "planned",
            ProjectStatus::GeneratingImages => "generating_images",
            ProjectStatus::ImagesComplete => "images_complete",
            ProjectStatus::GeneratingVideos => "generating_videos",
            ProjectStatus::VideosComplete => "videos_complete",
            ProjectStatus::Assembling => "assembling",
            ProjectStatus::Completed => "completed",
            ProjectStatus::RemixingAudio => "remixing_audio",
            ProjectStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProjectStatus::Completed | ProjectStatus::Failed)
    }

    /// The closed transition table. Everything not listed is a programming
    /// error surfaced as a conflict.
    pub fn can_transition_to(&self, next: ProjectStatus) -> bool {
        use ProjectStatus::*;
        // Any non-terminal state may fail.
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Initialized, Planning)
                | (Planning, Planned)
                | (Planned, GeneratingImages)
                | (GeneratingImages, ImagesComplete)
                | (ImagesComplete, GeneratingVideos)
                | (GeneratingVideos, VideosComplete)
                | (VideosComplete, Assembling)
                | (Assembling, Completed)
                | (Completed, RemixingAudio)
                | (RemixingAudio, Completed)
                // Interrupted stages drop back to their entry gate on resume.
                | (GeneratingImages, Planned)
                | (GeneratingVideos, ImagesComplete)
                | (Assembling, VideosComplete)
                // Operator regeneration at a gate re-opens the prior one.
                | (ImagesComplete, Planned)
                | (VideosComplete, ImagesComplete)
                // Explicit operator reset.
                | (_, Initialized)
        )
    }
}

/// Strategy produced by the strategist LLM. The fields stay opaque text;
/// only the prompt composer reads them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Strategy {
    pub core_concept: String,
    pub visual_language: String,
    pub narrative_arc: String,
    pub audience_hook: String,
    pub cinematic_direction: String,
    pub production_recommendations: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_s: f64,
    #[serde(default)]
    pub end_s: Option<f64>,
}

impl TimeRange {
    pub fn validate(&self) -> Result<()> {
        if self.start_s < 0.0 {
            return Err(PipelineError::InvalidInput(
                "line time_range.start must be >= 0".into(),
            ));
        }
        if let Some(end) = self.end_s {
            if end <= self.start_s {
                return Err(PipelineError::InvalidInput(
                    "line time_range.end must be > start".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptLine {
    pub speaker: String,
    pub text: String,
    pub time_range: TimeRange,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub audio_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    /// 1..N, stable and dense.
    pub id: u32,
    pub duration_seconds: u32,
    pub visual_prompt: String,
    pub motion_prompt: String,
    #[serde(default)]
    pub audio_prompt: Option<String>,
    #[serde(default)]
    pub primary_subject: Option<String>,
    #[serde(default)]
    pub subject_description: Option<String>,
    #[serde(default)]
    pub subject_reference_path: Option<PathBuf>,
    #[serde(default)]
    pub image_path: Option<PathBuf>,
    #[serde(default)]
    pub image_fingerprint: Option<String>,
    #[serde(default)]
    pub image_critique: Option<String>,
    #[serde(default)]
    pub image_score: Option<u8>,
    #[serde(default)]
    pub image_warning: Option<String>,
    #[serde(default)]
    pub video_path: Option<PathBuf>,
    #[serde(default)]
    pub video_provider: Option<String>,
    #[serde(default)]
    pub video_warning: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Script {
    pub mood: String,
    pub scenes: Vec<Scene>,
    pub lines: Vec<ScriptLine>,
}

impl Script {
    pub fn total_duration_seconds(&self) -> u32 {
        self.scenes.iter().map(|s| s.duration_seconds).sum()
    }

    /// Scene ids must be 1..N in order; lines must carry valid time ranges.
    pub fn validate(&self) -> Result<()> {
        if self.scenes.is_empty() {
            return Err(PipelineError::InvalidInput("script has no scenes".into()));
        }
        for (i, scene) in self.scenes.iter().enumerate() {
            if scene.id != (i as u32) + 1 {
                return Err(PipelineError::InvalidInput(format!(
                    "scene ids must be dense 1..N (index {} has id {})",
                    i, scene.id
                )));
            }
        }
        for line in &self.lines {
            line.time_range.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectError {
    pub kind: String,
    pub stage: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub tag: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectState {
    pub id: String,
    /// Stable per project; seeds every image/motion generation.
    pub seed: u64,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub config: ProjectConfig,
    #[serde(default)]
    pub strategy: Option<Strategy>,
    #[serde(default)]
    pub script: Option<Script>,
    #[serde(default)]
    pub style_profile: Option<StyleProfile>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub error: Option<ProjectError>,
    #[serde(default)]
    pub final_video_path: Option<PathBuf>,
    /// Durable intermediate from checkpoint 1; remix re-uses it untouched.
    #[serde(default)]
    pub video_only_path: Option<PathBuf>,
    #[serde(default)]
    pub audio_mix_path: Option<PathBuf>,
    /// Scene id -> generated effect, mixed at that scene's boundary.
    #[serde(default)]
    pub sfx_paths: std::collections::BTreeMap<u32, PathBuf>,
    #[serde(default)]
    pub bgm_path: Option<PathBuf>,
}

impl ProjectState {
    pub fn new(id: String, seed: u64, config: ProjectConfig) -> Self {
        let now = Utc::now();
        Self {
            id,
            seed,
            status: ProjectStatus::Initialized,
            created_at: now,
            updated_at: now,
            config,
            strategy: None,
            script: None,
            style_profile: None,
            logs: Vec::new(),
            error: None,
            final_video_path: None,
            video_only_path: None,
            audio_mix_path: None,
            sfx_paths: std::collections::BTreeMap::new(),
            bgm_path: None,
        }
    }

    /// Append a dated, stage-tagged log entry.
    pub fn log(&mut self, tag: &str, message: impl Into<String>) {
        let message = message.into();
        info!("[{}] {}", tag, message);
        self.logs.push(LogEntry {
            at: Utc::now(),
            tag: tag.to_string(),
            message,
        });
    }

    /// Validate and apply a status transition. Rejections leave the state
    /// untouched and map to HTTP 409.
    pub fn transition(&mut self, next: ProjectStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(PipelineError::Conflict(format!(
                "illegal transition {} -> {}",
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.log(
            "ORCH",
            format!("{} -> {}", self.status.as_str(), next.as_str()),
        );
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn fail(&mut self, stage: &str, kind: &str, detail: impl Into<String>) {
        let detail = detail.into();
        self.error = Some(ProjectError {
            kind: kind.to_string(),
            stage: stage.to_string(),
            detail: detail.clone(),
        });
        self.log("ORCH", format!("❌ stage '{}' fatal: {}", stage, detail));
        // `failed` is reachable from every non-terminal state.
        if self.status.can_transition_to(ProjectStatus::Failed) {
            self.status = ProjectStatus::Failed;
            self.updated_at = Utc::now();
        }
    }

    /// Persist atomically under `root/{id}/state.json`.
    pub fn save(&self, projects_root: &Path) -> Result<PathBuf> {
        let dir = projects_root.join(&self.id);
        fs::create_dir_all(&dir)?;
        let path = dir.join(STATE_FILE);
        let tmp = dir.join(format!("{}.tmp", STATE_FILE));
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(path)
    }

    pub fn load(projects_root: &Path, id: &str) -> Result<Self> {
        let path = projects_root.join(id).join(STATE_FILE);
        if !path.exists() {
            return Err(PipelineError::NotFound(id.to_string()));
        }
        let json = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ProjectState {
        ProjectState::new(
            "proj_test".into(),
            42,
            ProjectConfig {
                topic: "test".into(),
                duration_seconds: 12,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        use ProjectStatus::*;
        let mut s = state();
        for next in [
            Planning,
            Planned,
            GeneratingImages,
            ImagesComplete,
            GeneratingVideos,
            VideosComplete,
            Assembling,
            Completed,
            RemixingAudio,
            Completed,
        ] {
            s.transition(next).unwrap();
        }
        assert_eq!(s.status, Completed);
    }

    #[test]
    fn test_illegal_transition_rejected_and_state_unchanged() {
        let mut s = state();
        let err = s.transition(ProjectStatus::Assembling).unwrap_err();
        assert!(matches!(err, PipelineError::Conflict(_)));
        assert_eq!(s.status, ProjectStatus::Initialized);
    }

    #[test]
    fn test_failed_is_terminal_until_reset() {
        let mut s = state();
        s.transition(ProjectStatus::Planning).unwrap();
        s.fail("planner", "provider", "boom");
        assert_eq!(s.status, ProjectStatus::Failed);
        assert!(s.transition(ProjectStatus::Planning).is_err());
        // Reset drops back to initialized.
        s.transition(ProjectStatus::Initialized).unwrap();
        assert_eq!(s.status, ProjectStatus::Initialized);
    }

    #[test]
    fn test_completed_cannot_fail() {
        use ProjectStatus::*;
        let mut s = state();
        for next in [
            Planning,
            Planned,
            GeneratingImages,
            ImagesComplete,
            GeneratingVideos,
            VideosComplete,
            Assembling,
            Completed,
        ] {
            s.transition(next).unwrap();
        }
        assert!(!s.status.can_transition_to(Failed));
    }

    #[test]
    fn test_state_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut s = state();
        s.log("TEST", "hello");
        s.save(tmp.path()).unwrap();
        let loaded = ProjectState::load(tmp.path(), "proj_test").unwrap();
        assert_eq!(loaded.id, "proj_test");
        assert_eq!(loaded.seed, 42);
        assert_eq!(loaded.logs.len(), 1);
    }

    #[test]
    fn test_script_validation() {
        let script = Script {
            mood: "bold".into(),
            scenes: vec![Scene {
                id: 2,
                duration_seconds: 4,
                visual_prompt: "x".into(),
                motion_prompt: "y".into(),
                audio_prompt: None,
                primary_subject: None,
                subject_description: None,
                subject_reference_path: None,
                image_path: None,
                image_fingerprint: None,
                image_critique: None,
                image_score: None,
                image_warning: None,
                video_path: None,
                video_provider: None,
                video_warning: None,
            }],
            lines: vec![],
        };
        assert!(script.validate().is_err(), "ids must start at 1");
    }

    #[test]
    fn test_time_range_validation() {
        assert!(TimeRange { start_s: -1.0, end_s: None }.validate().is_err());
        assert!(TimeRange { start_s: 2.0, end_s: Some(1.0) }.validate().is_err());
        assert!(TimeRange { start_s: 0.0, end_s: Some(3.5) }.validate().is_ok());
    }
}
