// ADSMITH Motion Stage - Fallback Chain Animation
// Copyright (c) 2026 AdSmith Collective | ADSMITH
//
// Each accepted still is animated through the provider chain in fixed
// order. Submit rejections (invalid-input, quota, permanent) advance the
// chain; a scene fails only after every provider declined. The stage as a
// whole fails only when at least half the scenes have no clip.
//
// Parallel mode works in rounds: every unfinished scene submits through
// its next provider (bounded submissions), all accepted handles are
// accumulated into ONE poll group and driven to terminal together, and
// scenes whose task failed re-enter the next round one provider further
// down the chain. Sequencer mode is serial by contract: scene k+1 may not
// start before scene k's bridge frame is published.

use crate::error::{PipelineError, Result};
use crate::executor::poll_all;
use crate::media;
use crate::project::Scene;
use crate::providers::{MotionRequest, TaskHandle, MOTION_POLL_DEADLINE};
use crate::stages::{StageContext, StageLog, StageVerdict};
use crate::store::{fingerprint, ArtifactKind};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SceneMotionUpdate {
    pub scene_id: u32,
    pub video_path: Option<PathBuf>,
    pub video_provider: Option<String>,
    pub warning: Option<String>,
    pub logs: Vec<StageLog>,
}

#[derive(Debug)]
pub struct MotionStageResult {
    pub updates: Vec<SceneMotionUpdate>,
    pub verdict: StageVerdict,
    /// Set when the cancel token fired mid-stage; finished clips are kept
    /// and reported in `updates`, interrupted scenes stay resumable.
    pub cancelled: bool,
}

/// Providers actually eligible for this project: chain order minus the
/// operator's disabled list.
pub fn enabled_chain(ctx: &StageContext) -> Vec<usize> {
    ctx.providers
        .motion_chain
        .iter()
        .enumerate()
        .filter(|(_, m)| {
            !ctx.config
                .disabled_motion_providers
                .iter()
                .any(|d| d == m.name())
        })
        .map(|(i, _)| i)
        .collect()
}

/// Stage-entry validation: the requested geometry must be animatable by at
/// least one enabled provider.
pub fn validate_entry(ctx: &StageContext) -> Result<()> {
    let chain = enabled_chain(ctx);
    if chain.is_empty() {
        return Err(PipelineError::InvalidInput(
            "all motion providers are disabled".into(),
        ));
    }
    let supported = chain.iter().any(|&i| {
        ctx.providers.motion_chain[i].supports(ctx.config.aspect_ratio, ctx.config.resolution)
    });
    if !supported {
        return Err(PipelineError::InvalidInput(format!(
            "no enabled motion provider supports {} at {}",
            ctx.config.aspect_ratio.as_str(),
            ctx.config.resolution.as_str()
        )));
    }
    Ok(())
}

pub async fn run(ctx: &StageContext, scenes: &[Scene]) -> Result<MotionStageResult> {
    validate_entry(ctx)?;

    let todo: Vec<Scene> = scenes
        .iter()
        .filter(|s| s.video_path.is_none() && s.image_path.is_some())
        .cloned()
        .collect();

    let (updates, cancelled) = if ctx.config.continuity_bridge {
        run_sequenced(ctx, todo).await?
    } else {
        run_parallel(ctx, todo).await?
    };

    // Coverage across the whole script, previously-animated scenes included.
    // At least half the scenes clipless (>= 50%) is stage-fatal.
    let done_before = scenes.iter().filter(|s| s.video_path.is_some()).count();
    let done_now = updates.iter().filter(|u| u.video_path.is_some()).count();
    let covered = done_before + done_now;

    let verdict = if covered * 2 <= scenes.len() && !cancelled {
        StageVerdict::Failed(format!(
            "only {}/{} scenes produced clips (half or more are missing)",
            covered,
            scenes.len()
        ))
    } else {
        let warnings: Vec<String> = updates.iter().filter_map(|u| u.warning.clone()).collect();
        if warnings.is_empty() {
            StageVerdict::Clean
        } else {
            StageVerdict::Warned(warnings)
        }
    };

    Ok(MotionStageResult {
        updates,
        verdict,
        cancelled,
    })
}

/// Compose the provider request for one scene.
fn build_request(ctx: &StageContext, scene: &Scene, first_frame: Option<PathBuf>) -> MotionRequest {
    MotionRequest {
        image_path: scene.image_path.clone().unwrap_or_default(),
        motion_prompt: format!("{}. {}", scene.motion_prompt, ctx.style.motion_emphasis()),
        duration_seconds: scene.duration_seconds,
        aspect: ctx.config.aspect_ratio,
        resolution: ctx.config.resolution,
        negative_prompt: None,
        first_frame_path: first_frame,
        seed: ctx.seed + scene.id as u64,
    }
}

fn motion_fingerprint(request: &MotionRequest) -> String {
    fingerprint(&[
        "motion",
        &request.motion_prompt,
        &request.seed.to_string(),
        &request.duration_seconds.to_string(),
        request.aspect.as_str(),
        request.resolution.as_str(),
        &request.image_path.to_string_lossy(),
    ])
}

/// Replay path: an identical request resolves from the store without any
/// submission.
fn cached_update(ctx: &StageContext, scene_id: u32, request_fp: &str) -> Option<SceneMotionUpdate> {
    let cached = ctx.store.lookup(request_fp)?;
    Some(SceneMotionUpdate {
        scene_id,
        logs: vec![StageLog::new(
            "MOTION",
            format!("Scene {} cache hit, reusing {}", scene_id, cached.display()),
        )],
        video_path: Some(cached),
        // Provider identity was lost with the cache entry; the scene keeps
        // whatever ProjectState recorded last time.
        video_provider: None,
        warning: None,
    })
}

/// Persist clip bytes and run the null-decode gate. An undecodable clip is
/// a decline, not an accepted artifact.
async fn persist_clip(
    ctx: &StageContext,
    scene_id: u32,
    request_fp: &str,
    bytes: &[u8],
) -> std::result::Result<PathBuf, String> {
    let label = format!("scene_{:02}", scene_id);
    let path = ctx
        .store
        .put(ArtifactKind::Clip, &label, request_fp, bytes)
        .map_err(|e| format!("persist failed: {}", e))?;
    if !media::verify_media(&path).await {
        return Err("produced corrupt clip".into());
    }
    Ok(path)
}

/// Per-scene progress through the fallback chain across rounds.
struct SceneProgress {
    scene_id: u32,
    request: MotionRequest,
    request_fp: String,
    /// Next position to try within the enabled chain.
    chain_pos: usize,
    declined: Vec<String>,
    logs: Vec<StageLog>,
    done: Option<SceneMotionUpdate>,
}

impl SceneProgress {
    fn exhaust(&mut self) {
        self.done = Some(SceneMotionUpdate {
            scene_id: self.scene_id,
            video_path: None,
            video_provider: None,
            warning: Some(format!(
                "scene {}: all motion providers exhausted ({})",
                self.scene_id,
                self.declined.join("; ")
            )),
            logs: std::mem::take(&mut self.logs),
        });
    }

    fn finish(&mut self, path: PathBuf, provider: String) {
        self.logs.push(StageLog::new(
            "MOTION",
            format!("Scene {} animated by {}", self.scene_id, provider),
        ));
        self.done = Some(SceneMotionUpdate {
            scene_id: self.scene_id,
            video_path: Some(path),
            video_provider: Some(provider),
            warning: None,
            logs: std::mem::take(&mut self.logs),
        });
    }
}

/// What one scene's submit pass produced this round.
struct SubmitOutcome {
    slot: usize,
    /// Chain position after the walk: the accepted provider, or past-end.
    pos: usize,
    accepted: Option<TaskHandle>,
    logs: Vec<StageLog>,
    declined: Vec<String>,
}

/// Default mode: submit-all-then-poll in rounds, one shared poll group per
/// round covering every scene's accepted handle.
async fn run_parallel(
    ctx: &StageContext,
    todo: Vec<Scene>,
) -> Result<(Vec<SceneMotionUpdate>, bool)> {
    let chain = enabled_chain(ctx);
    let mut progress: Vec<SceneProgress> = Vec::with_capacity(todo.len());
    for scene in &todo {
        let request = build_request(ctx, scene, None);
        let request_fp = motion_fingerprint(&request);
        let done = cached_update(ctx, scene.id, &request_fp);
        progress.push(SceneProgress {
            scene_id: scene.id,
            request,
            request_fp,
            chain_pos: 0,
            declined: Vec::new(),
            logs: Vec::new(),
            done,
        });
    }

    let mut cancelled = false;
    loop {
        let active: Vec<usize> = progress
            .iter()
            .enumerate()
            .filter(|(_, p)| p.done.is_none())
            .map(|(i, _)| i)
            .collect();
        if active.is_empty() || cancelled {
            break;
        }

        // Submit phase: every unfinished scene walks its chain until one
        // provider accepts, bounded submissions in flight.
        let tasks: Vec<_> = active
            .iter()
            .map(|&slot| {
                let ctx = ctx.clone();
                let chain = chain.clone();
                let request = progress[slot].request.clone();
                let scene_id = progress[slot].scene_id;
                let start = progress[slot].chain_pos;
                move || async move {
                    let mut logs = Vec::new();
                    let mut declined = Vec::new();
                    let mut pos = start;
                    let mut accepted = None;
                    while pos < chain.len() {
                        let provider = &ctx.providers.motion_chain[chain[pos]];
                        if !provider.supports(ctx.config.aspect_ratio, ctx.config.resolution) {
                            declined.push(format!("{}: unsupported geometry", provider.name()));
                            pos += 1;
                            continue;
                        }
                        match provider.submit(&request).await {
                            Ok(handle) => {
                                accepted = Some(handle);
                                break;
                            }
                            Err(e) => {
                                logs.push(StageLog::new(
                                    "MOTION",
                                    format!(
                                        "Scene {} provider {} declined ({:?}): {}",
                                        scene_id,
                                        provider.name(),
                                        e.kind,
                                        e.message
                                    ),
                                ));
                                declined.push(format!("{}: {}", provider.name(), e.message));
                                pos += 1;
                            }
                        }
                    }
                    Ok(SubmitOutcome {
                        slot,
                        pos,
                        accepted,
                        logs,
                        declined,
                    })
                }
            })
            .collect();

        let submitted = ctx.executor.fan_out(tasks, &ctx.cancel, None).await;

        // Accumulate this round's handles: (slot, chain position, handle).
        let mut pending: Vec<(usize, usize, Arc<TaskHandle>)> = Vec::new();
        for result in submitted {
            match result {
                Ok(outcome) => {
                    let p = &mut progress[outcome.slot];
                    p.logs.extend(outcome.logs);
                    p.declined.extend(outcome.declined);
                    p.chain_pos = outcome.pos;
                    match outcome.accepted {
                        Some(handle) => {
                            pending.push((outcome.slot, outcome.pos, Arc::new(handle)))
                        }
                        None => p.exhaust(),
                    }
                }
                Err(PipelineError::Cancelled) => cancelled = true,
                Err(e) => return Err(e),
            }
        }
        if pending.is_empty() {
            continue; // everything exhausted or cancelled; loop re-checks
        }

        // One poll group over every handle submitted across scenes.
        let poll_slots: Vec<_> = pending
            .iter()
            .map(|(_, pos, handle)| {
                let provider = &ctx.providers.motion_chain[chain[*pos]];
                let handle = handle.clone();
                move || {
                    let handle = handle.clone();
                    async move { provider.poll(&handle).await }
                }
            })
            .collect();
        let poll_results = poll_all(poll_slots, &ctx.cancel, MOTION_POLL_DEADLINE).await;

        for ((slot, pos, _), result) in pending.into_iter().zip(poll_results) {
            let provider_name = ctx.providers.motion_chain[chain[pos]].name().to_string();
            match result {
                Ok(bytes) => {
                    let p = &mut progress[slot];
                    match persist_clip(ctx, p.scene_id, &p.request_fp, &bytes).await {
                        Ok(path) => p.finish(path, provider_name),
                        Err(reason) => {
                            p.declined.push(format!("{}: {}", provider_name, reason));
                            p.chain_pos = pos + 1;
                        }
                    }
                }
                Err(PipelineError::Cancelled) => cancelled = true,
                Err(e) => {
                    let p = &mut progress[slot];
                    p.logs.push(StageLog::new(
                        "MOTION",
                        format!("Scene {} {} poll failed: {}", p.scene_id, provider_name, e),
                    ));
                    p.declined.push(format!("{}: {}", provider_name, e));
                    p.chain_pos = pos + 1;
                }
            }
        }
    }

    // Interrupted scenes carry no update and stay resumable.
    let updates = progress.into_iter().filter_map(|p| p.done).collect();
    Ok((updates, cancelled))
}

/// Sequencer mode: scene k+1 waits for scene k's last frame, so clips hand
/// off smoothly. Necessarily serial, so each scene drives its own task.
async fn run_sequenced(
    ctx: &StageContext,
    todo: Vec<Scene>,
) -> Result<(Vec<SceneMotionUpdate>, bool)> {
    let mut updates = Vec::new();
    let mut bridge: Option<PathBuf> = None;

    for scene in todo {
        if ctx.cancel.is_cancelled() {
            return Ok((updates, true));
        }
        let update = animate_scene(ctx, &scene, bridge.clone()).await;

        // Publish this clip's closing frame for the next scene before it
        // may start.
        bridge = None;
        if let Some(clip) = &update.video_path {
            let frame_path = ctx
                .store
                .dir(ArtifactKind::Frame)
                .join(format!("bridge_{:02}.jpg", scene.id));
            match media::extract_last_frame(clip, &frame_path).await {
                Ok(()) => bridge = Some(frame_path),
                Err(e) => {
                    // Bridge loss degrades the hand-off, not the scene.
                    tracing::warn!("[MOTION] Bridge frame for scene {} lost: {}", scene.id, e);
                }
            }
        }
        updates.push(update);
    }
    Ok((updates, false))
}

/// Sequenced per-scene driver: walk the chain, polling each accepted task
/// to terminal before falling over.
async fn animate_scene(
    ctx: &StageContext,
    scene: &Scene,
    first_frame: Option<PathBuf>,
) -> SceneMotionUpdate {
    let request = build_request(ctx, scene, first_frame);
    let request_fp = motion_fingerprint(&request);
    if let Some(update) = cached_update(ctx, scene.id, &request_fp) {
        return update;
    }

    let mut progress = SceneProgress {
        scene_id: scene.id,
        request,
        request_fp,
        chain_pos: 0,
        declined: Vec::new(),
        logs: Vec::new(),
        done: None,
    };

    let chain = enabled_chain(ctx);
    while progress.chain_pos < chain.len() {
        let pos = progress.chain_pos;
        let provider = &ctx.providers.motion_chain[chain[pos]];
        if !provider.supports(ctx.config.aspect_ratio, ctx.config.resolution) {
            progress
                .declined
                .push(format!("{}: unsupported geometry", provider.name()));
            progress.chain_pos += 1;
            continue;
        }

        let handle = match provider.submit(&progress.request).await {
            Ok(h) => h,
            Err(e) => {
                progress.logs.push(StageLog::new(
                    "MOTION",
                    format!(
                        "Scene {} provider {} declined ({:?}): {}",
                        scene.id,
                        provider.name(),
                        e.kind,
                        e.message
                    ),
                ));
                progress
                    .declined
                    .push(format!("{}: {}", provider.name(), e.message));
                progress.chain_pos += 1;
                continue;
            }
        };

        let handle = Arc::new(handle);
        let mut results = poll_all(
            vec![{
                let handle = handle.clone();
                move || {
                    let handle = handle.clone();
                    async move { provider.poll(&handle).await }
                }
            }],
            &ctx.cancel,
            MOTION_POLL_DEADLINE,
        )
        .await;

        match results.remove(0) {
            Ok(bytes) => {
                match persist_clip(ctx, scene.id, &progress.request_fp, &bytes).await {
                    Ok(path) => {
                        progress.finish(path, provider.name().to_string());
                        break;
                    }
                    Err(reason) => {
                        progress
                            .declined
                            .push(format!("{}: {}", provider.name(), reason));
                        progress.chain_pos += 1;
                    }
                }
            }
            Err(e) => {
                progress.logs.push(StageLog::new(
                    "MOTION",
                    format!("Scene {} {} poll failed: {}", scene.id, provider.name(), e),
                ));
                progress
                    .declined
                    .push(format!("{}: {}", provider.name(), e));
                progress.chain_pos += 1;
            }
        }
    }

    if progress.done.is_none() {
        progress.exhaust();
    }
    progress.done.expect("scene terminal")
}
