// ADSMITH Orchestrator - Approval-Gated State Machine
// Copyright (c) 2026 AdSmith Collective | ADSMITH
//
// Single writer for ProjectState: stages hand back acceptance structures
// and the orchestrator applies them between transitions. Every transition
// is persisted atomically before control returns, so a crash resumes from
// the last durable state.

use crate::config::ProjectConfig;
use crate::error::{PipelineError, Result};
use crate::executor::{CancelToken, ParallelExecutor};
use crate::project::{ProjectState, ProjectStatus, ScriptLine};
use crate::providers::ProviderSet;
use crate::stages::{self, compose, StageContext, StageVerdict};
use crate::store::{ArtifactStore, CritiqueCache};
use crate::style::infer_style_profile;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Remix knobs. `None` keeps the project's previous setting; `Some`
/// overrides it for this remix and onward.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemixOptions {
    pub include_sfx: Option<bool>,
    pub include_bgm: Option<bool>,
}

pub struct Orchestrator {
    projects_root: PathBuf,
    providers: Arc<ProviderSet>,
    critique_cache: Arc<CritiqueCache>,
    executor: Arc<ParallelExecutor>,
}

impl Orchestrator {
    pub fn new(projects_root: PathBuf, providers: ProviderSet) -> Self {
        Self {
            projects_root,
            providers: Arc::new(providers),
            critique_cache: Arc::new(CritiqueCache::new()),
            executor: Arc::new(ParallelExecutor::default_pool()),
        }
    }

    pub fn projects_root(&self) -> &PathBuf {
        &self.projects_root
    }

    pub fn status(&self, id: &str) -> Result<ProjectState> {
        ProjectState::load(&self.projects_root, id)
    }

    fn save(&self, state: &ProjectState) -> Result<()> {
        state.save(&self.projects_root)?;
        Ok(())
    }

    fn context(&self, state: &ProjectState) -> Result<StageContext> {
        let style = state
            .style_profile
            .clone()
            .unwrap_or_else(|| infer_style_profile(&state.config));
        Ok(StageContext {
            providers: self.providers.clone(),
            store: Arc::new(ArtifactStore::open(&self.projects_root, &state.id)?),
            critique_cache: self.critique_cache.clone(),
            executor: self.executor.clone(),
            cancel: CancelToken::new(),
            config: state.config.clone(),
            style,
            seed: state.seed,
        })
    }

    fn require_status(state: &ProjectState, expected: &[ProjectStatus]) -> Result<()> {
        if expected.contains(&state.status) {
            Ok(())
        } else {
            Err(PipelineError::Conflict(format!(
                "operation requires status {:?}, project is {}",
                expected.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
                state.status.as_str()
            )))
        }
    }

    // -- Planning ----------------------------------------------------------

    /// Create a project and drive it through both planning calls. Returns
    /// with status `planned` (approval gate 1).
    pub async fn plan(&self, config: ProjectConfig) -> Result<ProjectState> {
        config.validate()?;

        let id = format!("proj_{}", uuid::Uuid::new_v4().simple());
        let seed: u64 = rand::thread_rng().gen_range(1..=u32::MAX as u64);
        let mut state = ProjectState::new(id, seed, config);

        state.transition(ProjectStatus::Planning)?;
        self.save(&state)?;

        match crate::planner::plan(&mut state, &self.providers).await {
            Ok(()) => {
                state.transition(ProjectStatus::Planned)?;
                state.log("GATE", "Approval gate 1 open: review strategy & script");
                self.save(&state)?;
                Ok(state)
            }
            Err(e) => {
                state.fail("planner", "provider", e.to_string());
                self.save(&state)?;
                Err(e)
            }
        }
    }

    // -- Stage 2: images (and audio, in parallel) --------------------------

    pub async fn run_images(&self, id: &str, cancel: CancelToken) -> Result<ProjectState> {
        let mut state = self.status(id)?;
        Self::require_status(&state, &[ProjectStatus::Planned])?;
        let script = state
            .script
            .clone()
            .ok_or_else(|| PipelineError::Conflict("project has no script".into()))?;

        state.transition(ProjectStatus::GeneratingImages)?;
        self.save(&state)?;

        let mut ctx = self.context(&state)?;
        ctx.cancel = cancel;

        // Image and audio generation are independent; run them together.
        let (image_result, audio_result) = tokio::join!(
            stages::image::run(&ctx, &script.scenes),
            stages::audio::run(&ctx, &script)
        );

        let image_result = match image_result {
            Ok(r) => r,
            Err(e) => {
                state.fail("image", "provider", e.to_string());
                self.save(&state)?;
                return Err(e);
            }
        };

        // Apply image acceptance structures in scene order.
        {
            let script_mut = state.script.as_mut().expect("script checked above");
            for update in &image_result.updates {
                for log in &update.logs {
                    state.logs.push(crate::project::LogEntry {
                        at: chrono::Utc::now(),
                        tag: log.tag.clone(),
                        message: log.message.clone(),
                    });
                }
            }
            for update in image_result.updates {
                if let Some(scene) = script_mut
                    .scenes
                    .iter_mut()
                    .find(|s| s.id == update.scene_id)
                {
                    scene.image_path = update.image_path;
                    scene.image_fingerprint = update.image_fingerprint;
                    scene.image_score = update.image_score;
                    scene.image_critique = update.image_critique;
                    scene.image_warning = update.warning;
                    scene.subject_reference_path = update.subject_reference_path;
                }
            }
        }

        if image_result.cancelled {
            state.log("PHASE 2", "Image stage cancelled; keeping persisted scenes");
            state.transition(ProjectStatus::Planned)?;
            self.save(&state)?;
            return Ok(state);
        }

        match &image_result.verdict {
            StageVerdict::Failed(reason) => {
                state.fail("image", "stage", reason.clone());
                self.save(&state)?;
                return Ok(state);
            }
            StageVerdict::Warned(warnings) => {
                for w in warnings {
                    state.log("PHASE 2", format!("⚠️ {}", w));
                }
            }
            StageVerdict::Clean => {}
        }

        // Audio is load-bearing only for voiceover; its verdict decides.
        match audio_result {
            Ok(audio) => {
                for log in &audio.logs {
                    state.logs.push(crate::project::LogEntry {
                        at: chrono::Utc::now(),
                        tag: log.tag.clone(),
                        message: log.message.clone(),
                    });
                }
                match &audio.verdict {
                    StageVerdict::Failed(reason) => {
                        state.fail("audio", "stage", reason.clone());
                        self.save(&state)?;
                        return Ok(state);
                    }
                    StageVerdict::Warned(warnings) => {
                        for w in warnings {
                            state.log("PHASE 2", format!("⚠️ {}", w));
                        }
                    }
                    StageVerdict::Clean => {}
                }
                let script_mut = state.script.as_mut().expect("script checked above");
                for update in audio.line_updates {
                    if let Some(line) = script_mut.lines.get_mut(update.line_index) {
                        line.voice_id = Some(update.voice_id);
                        line.audio_path = Some(update.audio_path);
                    }
                }
                state.sfx_paths = audio.sfx;
                state.bgm_path = audio.bgm;
            }
            Err(e) => {
                state.fail("audio", "provider", e.to_string());
                self.save(&state)?;
                return Ok(state);
            }
        }

        state.transition(ProjectStatus::ImagesComplete)?;
        state.log("GATE", "Approval gate 2 open: review stills before motion");
        self.save(&state)?;
        Ok(state)
    }

    // -- Stage 3: motion ---------------------------------------------------

    pub async fn run_videos(&self, id: &str, cancel: CancelToken) -> Result<ProjectState> {
        let mut state = self.status(id)?;
        // GeneratingVideos is re-enterable: a cancelled run resumes the
        // scenes that never finished.
        Self::require_status(
            &state,
            &[ProjectStatus::ImagesComplete, ProjectStatus::GeneratingVideos],
        )?;
        let script = state
            .script
            .clone()
            .ok_or_else(|| PipelineError::Conflict("project has no script".into()))?;

        let mut ctx = self.context(&state)?;
        ctx.cancel = cancel;

        // Geometry must be animatable before we leave the gate.
        stages::motion::validate_entry(&ctx)?;

        if state.status == ProjectStatus::ImagesComplete {
            state.transition(ProjectStatus::GeneratingVideos)?;
            self.save(&state)?;
        } else {
            state.log("PHASE 3", "Resuming motion for unfinished scenes");
        }

        let result = match stages::motion::run(&ctx, &script.scenes).await {
            Ok(r) => r,
            Err(e) => {
                state.fail("motion", "provider", e.to_string());
                self.save(&state)?;
                return Err(e);
            }
        };

        {
            let script_mut = state.script.as_mut().expect("script checked above");
            for update in &result.updates {
                for log in &update.logs {
                    state.logs.push(crate::project::LogEntry {
                        at: chrono::Utc::now(),
                        tag: log.tag.clone(),
                        message: log.message.clone(),
                    });
                }
            }
            for update in result.updates {
                if let Some(scene) = script_mut
                    .scenes
                    .iter_mut()
                    .find(|s| s.id == update.scene_id)
                {
                    if update.video_path.is_some() {
                        scene.video_path = update.video_path;
                        scene.video_provider = update.video_provider;
                    }
                    scene.video_warning = update.warning;
                }
            }
        }

        if result.cancelled {
            // Status stays generating_videos; a later POST resumes.
            state.log("PHASE 3", "Motion stage cancelled; persisted clips kept");
            self.save(&state)?;
            return Ok(state);
        }

        match result.verdict {
            StageVerdict::Failed(reason) => {
                state.fail("motion", "stage", reason);
                self.save(&state)?;
                Ok(state)
            }
            verdict => {
                if let StageVerdict::Warned(warnings) = &verdict {
                    for w in warnings {
                        state.log("PHASE 3", format!("⚠️ {}", w));
                    }
                }
                state.transition(ProjectStatus::VideosComplete)?;
                state.log("GATE", "Approval gate 3 open: review clips before assembly");
                self.save(&state)?;
                Ok(state)
            }
        }
    }

    // -- Stage 4: assembly -------------------------------------------------

    pub async fn run_assembly(&self, id: &str) -> Result<ProjectState> {
        let mut state = self.status(id)?;
        Self::require_status(&state, &[ProjectStatus::VideosComplete])?;

        state.transition(ProjectStatus::Assembling)?;
        self.save(&state)?;

        let ctx = self.context(&state)?;
        let plan = match self.composer_plan(&state).await {
            Ok(p) => p,
            Err(e) => {
                state.fail("composer", "invalid-input", e.to_string());
                self.save(&state)?;
                return Ok(state);
            }
        };

        match compose::run(&ctx, &plan, false).await {
            Ok(result) => {
                for log in &result.logs {
                    state.log(&log.tag, log.message.clone());
                }
                if let StageVerdict::Warned(warnings) = &result.verdict {
                    for w in warnings {
                        state.log("COMPOSER", format!("⚠️ {}", w));
                    }
                }
                state.video_only_path = Some(result.video_only);
                state.audio_mix_path = Some(result.audio_mix);
                state.final_video_path = Some(result.final_video);
                state.transition(ProjectStatus::Completed)?;
                // Intermediates go once the final asset is durable.
                let removed = ctx.store.purge_intermediates()?;
                state.log("COMPOSER", format!("Purged {} intermediate artifacts", removed));
                self.save(&state)?;
                Ok(state)
            }
            Err(e) => {
                state.fail("composer", "assembly", e.to_string());
                self.save(&state)?;
                Ok(state)
            }
        }
    }

    // -- Remix ------------------------------------------------------------

    /// Regenerate audio with new lines and re-run checkpoints 2 and 3 over
    /// the existing video timeline. Stills and clips are never touched.
    pub async fn remix(
        &self,
        id: &str,
        new_lines: Vec<ScriptLine>,
        options: RemixOptions,
    ) -> Result<ProjectState> {
        let mut state = self.status(id)?;
        Self::require_status(&state, &[ProjectStatus::Completed])?;
        if new_lines.is_empty() {
            return Err(PipelineError::InvalidInput("remix needs at least one line".into()));
        }
        for line in &new_lines {
            line.time_range.validate()?;
        }

        state.transition(ProjectStatus::RemixingAudio)?;
        if let Some(v) = options.include_sfx {
            state.config.include_sfx = v;
            state.log("REMIX", format!("include_sfx overridden to {}", v));
        }
        if let Some(v) = options.include_bgm {
            state.config.include_bgm = v;
            state.log("REMIX", format!("include_bgm overridden to {}", v));
        }
        {
            let script = state
                .script
                .as_mut()
                .ok_or_else(|| PipelineError::Conflict("project has no script".into()))?;
            script.lines = new_lines;
        }
        self.save(&state)?;

        let ctx = self.context(&state)?;
        let script = state.script.clone().expect("script checked above");

        let audio = match stages::audio::run(&ctx, &script).await {
            Ok(a) => a,
            Err(e) => {
                state.fail("remix", "provider", e.to_string());
                self.save(&state)?;
                return Err(e);
            }
        };
        if let StageVerdict::Failed(reason) = audio.verdict {
            state.fail("remix", "stage", reason);
            self.save(&state)?;
            return Ok(state);
        }
        {
            let script_mut = state.script.as_mut().expect("script checked above");
            for update in audio.line_updates {
                if let Some(line) = script_mut.lines.get_mut(update.line_index) {
                    line.voice_id = Some(update.voice_id);
                    line.audio_path = Some(update.audio_path);
                }
            }
        }
        state.sfx_paths = if state.config.include_sfx {
            audio.sfx
        } else {
            Default::default()
        };
        state.bgm_path = if state.config.include_bgm {
            audio.bgm
        } else {
            None
        };

        let plan = self.composer_plan(&state).await?;
        match compose::run(&ctx, &plan, true).await {
            Ok(result) => {
                for log in &result.logs {
                    state.log(&log.tag, log.message.clone());
                }
                state.audio_mix_path = Some(result.audio_mix);
                state.final_video_path = Some(result.final_video);
                state.transition(ProjectStatus::Completed)?;
                state.log("REMIX", "Remix complete; video timeline untouched");
                self.save(&state)?;
                Ok(state)
            }
            Err(e) => {
                state.fail("remix", "assembly", e.to_string());
                self.save(&state)?;
                Ok(state)
            }
        }
    }

    // -- Operator actions --------------------------------------------------

    /// Cooperative cancel is owned by the server's project registry; the
    /// orchestrator only needs reset.
    pub fn reset(&self, id: &str) -> Result<ProjectState> {
        let mut state = self.status(id)?;
        state.transition(ProjectStatus::Initialized)?;
        state.error = None;
        state.log("GATE", "Operator reset to initialized");
        self.save(&state)?;
        Ok(state)
    }

    /// Gate edit: replace the script (and optionally the strategy) while
    /// parked at gate 1.
    pub fn edit_script(
        &self,
        id: &str,
        script: crate::project::Script,
        strategy: Option<crate::project::Strategy>,
    ) -> Result<ProjectState> {
        let mut state = self.status(id)?;
        Self::require_status(&state, &[ProjectStatus::Planned])?;
        script.validate()?;
        state.script = Some(script);
        if let Some(s) = strategy {
            state.strategy = Some(s);
        }
        state.log("GATE", "Operator edited script at gate 1");
        self.save(&state)?;
        Ok(state)
    }

    /// Gate regeneration: clear the selected scenes' stage outputs and
    /// reopen the previous gate. `scene_ids = None` clears every scene.
    pub fn regenerate_images(&self, id: &str, scene_ids: Option<Vec<u32>>) -> Result<ProjectState> {
        let mut state = self.status(id)?;
        Self::require_status(&state, &[ProjectStatus::ImagesComplete])?;
        {
            let script = state
                .script
                .as_mut()
                .ok_or_else(|| PipelineError::Conflict("project has no script".into()))?;
            for scene in script.scenes.iter_mut() {
                let selected = scene_ids
                    .as_ref()
                    .map_or(true, |ids| ids.contains(&scene.id));
                if selected {
                    scene.image_path = None;
                    scene.image_fingerprint = None;
                    scene.image_score = None;
                    scene.image_critique = None;
                    scene.image_warning = None;
                }
            }
        }
        state.transition(ProjectStatus::Planned)?;
        state.log("GATE", "Operator requested image regeneration");
        self.save(&state)?;
        Ok(state)
    }

    pub fn regenerate_videos(&self, id: &str, scene_ids: Option<Vec<u32>>) -> Result<ProjectState> {
        let mut state = self.status(id)?;
        Self::require_status(&state, &[ProjectStatus::VideosComplete])?;
        {
            let script = state
                .script
                .as_mut()
                .ok_or_else(|| PipelineError::Conflict("project has no script".into()))?;
            for scene in script.scenes.iter_mut() {
                let selected = scene_ids
                    .as_ref()
                    .map_or(true, |ids| ids.contains(&scene.id));
                if selected {
                    scene.video_path = None;
                    scene.video_provider = None;
                    scene.video_warning = None;
                }
            }
        }
        state.transition(ProjectStatus::ImagesComplete)?;
        state.log("GATE", "Operator requested motion regeneration");
        self.save(&state)?;
        Ok(state)
    }

    // -- Composer plan -----------------------------------------------------

    async fn composer_plan(&self, state: &ProjectState) -> Result<compose::ComposerPlan> {
        let script = state
            .script
            .as_ref()
            .ok_or_else(|| PipelineError::Conflict("project has no script".into()))?;

        // Best-effort coverage: scenes that never got a clip are skipped,
        // their absence was already warned about by the motion stage.
        let clips: Vec<PathBuf> = script
            .scenes
            .iter()
            .filter_map(|s| s.video_path.clone())
            .collect();

        let line_elements: Vec<(PathBuf, f64)> = script
            .lines
            .iter()
            .filter_map(|l| l.audio_path.clone().map(|p| (p, l.time_range.start_s)))
            .collect();
        let lines = compose::resolve_timed_audio(line_elements).await?;

        // Effects land at their scene's boundary on the assembled timeline.
        let mut sfx_elements = Vec::new();
        let mut offset = 0.0f64;
        for scene in &script.scenes {
            if scene.video_path.is_some() {
                if let Some(path) = state.sfx_paths.get(&scene.id) {
                    sfx_elements.push((path.clone(), offset));
                }
                offset += scene.duration_seconds as f64;
            }
        }
        let sfx = compose::resolve_timed_audio(sfx_elements).await?;

        // Assembled length counts only the scenes that made it in.
        let total: u32 = script
            .scenes
            .iter()
            .filter(|s| s.video_path.is_some())
            .map(|s| s.duration_seconds)
            .sum();

        info!(
            "[COMPOSER] Plan: {} clips, {} lines, {} sfx, {}s",
            clips.len(),
            lines.len(),
            sfx.len(),
            total
        );
        Ok(compose::ComposerPlan {
            clips,
            lines,
            sfx,
            bgm: state.bgm_path.clone(),
            total_duration_s: total as f64,
        })
    }
}
