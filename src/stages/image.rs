// ADSMITH Image Stage - Generate, Critique, Accept-Or-Retry
// Copyright (c) 2026 AdSmith Collective | ADSMITH
//
// Scene 1 runs first and alone: it locks the primary subject and yields
// the reference still every later scene cites. Scenes 2..N then fan out
// through the bounded pool.

use crate::error::{ErrorKind, PipelineError, Result};
use crate::project::Scene;
use crate::providers::ImageRequest;
use crate::stages::{StageContext, StageLog, StageVerdict};
use crate::store::{fingerprint, fingerprint_bytes, ArtifactKind};
use std::path::PathBuf;
use tracing::info;

/// Extra attempts after the first candidate misses the bar.
const CRITIQUE_RETRIES: u32 = 2;

/// Per-scene acceptance structure returned to the orchestrator.
#[derive(Debug, Clone)]
pub struct SceneImageUpdate {
    pub scene_id: u32,
    pub image_path: Option<PathBuf>,
    pub image_fingerprint: Option<String>,
    pub image_score: Option<u8>,
    pub image_critique: Option<String>,
    pub warning: Option<String>,
    pub subject_reference_path: Option<PathBuf>,
    pub logs: Vec<StageLog>,
}

#[derive(Debug)]
pub struct ImageStageResult {
    pub updates: Vec<SceneImageUpdate>,
    pub verdict: StageVerdict,
    /// Cancellation aborts at the end of the current scene's critique;
    /// everything already persisted is kept and reported here.
    pub cancelled: bool,
}

/// Scene 1 and the closer are the frames people remember; they take the
/// higher bar.
pub fn acceptance_threshold(scene_id: u32, scene_count: usize) -> u8 {
    if scene_id == 1 || scene_id as usize == scene_count {
        8
    } else {
        7
    }
}

pub async fn run(ctx: &StageContext, scenes: &[Scene]) -> Result<ImageStageResult> {
    let scene_count = scenes.len();
    let mut updates: Vec<SceneImageUpdate> = Vec::with_capacity(scene_count);

    // Scene 1 synchronously: its accepted still becomes the consistency
    // reference for everything that follows. When scene 1 yields no
    // candidate the later scenes run without the consistency clause; the
    // stage fails only if no scene at all produces one.
    let first = &scenes[0];
    let mut reference = first.image_path.clone();
    if reference.is_none() {
        let update = generate_scene(ctx, first, scene_count, None).await;
        reference = update.image_path.clone();
        updates.push(update);
    }

    // Scenes 2..N in parallel, skipping any already persisted (resume).
    let remaining: Vec<Scene> = scenes[1..]
        .iter()
        .filter(|s| s.image_path.is_none())
        .cloned()
        .collect();

    let tasks: Vec<_> = remaining
        .into_iter()
        .map(|scene| {
            let ctx = ctx.clone();
            let reference = reference.clone();
            move || async move { Ok(generate_scene(&ctx, &scene, scene_count, reference).await) }
        })
        .collect();

    let results = ctx.executor.fan_out(tasks, &ctx.cancel, None).await;
    let mut cancelled = false;
    for result in results {
        match result {
            Ok(update) => updates.push(update),
            Err(PipelineError::Cancelled) => cancelled = true,
            Err(e) => {
                return Err(e);
            }
        }
    }

    let produced = updates.iter().filter(|u| u.image_path.is_some()).count()
        + scenes.iter().filter(|s| s.image_path.is_some()).count();
    let verdict = if produced == 0 && !cancelled {
        StageVerdict::Failed("no scene produced an image candidate".into())
    } else {
        let warnings: Vec<String> = updates
            .iter()
            .filter_map(|u| u.warning.clone())
            .collect();
        if warnings.is_empty() {
            StageVerdict::Clean
        } else {
            StageVerdict::Warned(warnings)
        }
    };

    Ok(ImageStageResult {
        updates,
        verdict,
        cancelled,
    })
}

/// Compose the full prompt for one scene: base visual prompt, stable style
/// emphasis, and the character-consistency clause for scenes after the
/// first.
pub fn compose_prompt(ctx: &StageContext, scene: &Scene, has_reference: bool) -> String {
    let mut prompt = format!("{}. {}", scene.visual_prompt, ctx.style.image_emphasis());
    if has_reference {
        if let Some(subject) = &scene.primary_subject {
            prompt.push_str(&format!(
                ". Keep the exact same {} as the reference image",
                subject
            ));
            if let Some(desc) = &scene.subject_description {
                prompt.push_str(&format!(" ({})", desc));
            }
        }
    }
    prompt
}

async fn generate_scene(
    ctx: &StageContext,
    scene: &Scene,
    scene_count: usize,
    reference: Option<PathBuf>,
) -> SceneImageUpdate {
    let mut logs = Vec::new();
    let threshold = acceptance_threshold(scene.id, scene_count);
    let seed = ctx.seed + scene.id as u64;
    let mut prompt = compose_prompt(ctx, scene, reference.is_some());

    let mut references: Vec<String> = ctx
        .config
        .capped_references()
        .to_vec();
    if let Some(ref path) = reference {
        references.insert(0, path.to_string_lossy().to_string());
        references.truncate(crate::config::MAX_REFERENCES);
    }

    let mut best: Option<(Vec<u8>, u8, String, String)> = None; // bytes, score, rationale, fp
    let mut warning = None;
    let mut quota_hits = 0u32;

    for attempt in 0..=CRITIQUE_RETRIES {
        let request = ImageRequest {
            prompt: prompt.clone(),
            aspect: ctx.config.aspect_ratio,
            resolution: ctx.config.resolution,
            seed,
            references: references.clone(),
        };

        // Prompt-level cache: a replayed request costs no provider call.
        let request_fp = fingerprint(&[
            &request.prompt,
            &seed.to_string(),
            request.aspect.as_str(),
            request.resolution.as_str(),
            &ctx.style.image_emphasis(),
            &request.references.join("|"),
        ]);
        if let Some(cached) = ctx.store.lookup(&request_fp) {
            logs.push(StageLog::new(
                "IMAGE",
                format!("Scene {} cache hit, reusing {}", scene.id, cached.display()),
            ));
            let (score, rationale) = match std::fs::read(&cached)
                .ok()
                .and_then(|bytes| ctx.critique_cache.get(&fingerprint_bytes(&bytes)))
            {
                Some(verdict) => (verdict.score, verdict.rationale),
                None => (threshold, "cached artifact".to_string()),
            };
            return SceneImageUpdate {
                scene_id: scene.id,
                subject_reference_path: reference,
                image_path: Some(cached),
                image_fingerprint: Some(request_fp),
                image_score: Some(score),
                image_critique: Some(rationale),
                warning: None,
                logs,
            };
        }

        let bytes = match ctx.providers.image.generate(&request).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind == ErrorKind::Quota => {
                quota_hits += 1;
                if quota_hits > ctx.config.max_image_retries {
                    warning = Some(format!(
                        "scene {}: image quota exhausted after {} attempt(s)",
                        scene.id, quota_hits
                    ));
                    break;
                }
                logs.push(StageLog::new(
                    "IMAGE",
                    format!("Scene {} quota pressure, retry {}", scene.id, quota_hits),
                ));
                continue;
            }
            Err(e) => {
                warning = Some(format!("scene {}: generation failed: {}", scene.id, e));
                break;
            }
        };

        // Critique, memoised by candidate fingerprint.
        let image_fp = fingerprint_bytes(&bytes);
        let brief_context = format!(
            "Brief: {}. Scene {} of {}: {}",
            ctx.config.topic, scene.id, scene_count, scene.visual_prompt
        );
        let verdict = match ctx.critique_cache.get(&image_fp) {
            Some(v) => v,
            None => match ctx.providers.critic.critique(&bytes, &brief_context).await {
                Ok(v) => {
                    ctx.critique_cache.put(&image_fp, v.clone());
                    v
                }
                Err(e) => {
                    warning = Some(format!("scene {}: critic failed: {}", scene.id, e));
                    break;
                }
            },
        };

        if best
            .as_ref()
            .map(|(_, s, _, _)| verdict.score > *s)
            .unwrap_or(true)
        {
            best = Some((
                bytes,
                verdict.score,
                verdict.rationale.clone(),
                request_fp.clone(),
            ));
        }

        if verdict.score >= threshold {
            info!(
                "[IMAGE] Scene {} accepted at score {} (attempt {})",
                scene.id,
                verdict.score,
                attempt + 1
            );
            break;
        }

        if attempt < CRITIQUE_RETRIES {
            logs.push(StageLog::new(
                "IMAGE",
                format!(
                    "Scene {} retry {} (score {} below {})",
                    scene.id,
                    attempt + 1,
                    verdict.score,
                    threshold
                ),
            ));
            // Perturb with a corrective clause from the critic.
            prompt = format!("{}. Address this critique: {}", prompt, verdict.rationale);
        } else {
            warning = Some(format!(
                "scene {}: best score {} below threshold {} after {} attempts",
                scene.id,
                verdict.score.max(best.as_ref().map(|(_, s, _, _)| *s).unwrap_or(0)),
                threshold,
                CRITIQUE_RETRIES + 1
            ));
        }
    }

    // Persist the best candidate even when it missed the bar.
    match best {
        Some((bytes, score, rationale, request_fp)) => {
            let label = format!("scene_{:02}", scene.id);
            match ctx.store.put(ArtifactKind::Image, &label, &request_fp, &bytes) {
                Ok(path) => SceneImageUpdate {
                    scene_id: scene.id,
                    subject_reference_path: reference,
                    image_path: Some(path),
                    image_fingerprint: Some(request_fp),
                    image_score: Some(score),
                    image_critique: Some(rationale),
                    warning,
                    logs,
                },
                Err(e) => SceneImageUpdate {
                    scene_id: scene.id,
                    subject_reference_path: reference,
                    image_path: None,
                    image_fingerprint: None,
                    image_score: None,
                    image_critique: None,
                    warning: Some(format!("scene {}: persist failed: {}", scene.id, e)),
                    logs,
                },
            }
        }
        None => SceneImageUpdate {
            scene_id: scene.id,
            subject_reference_path: reference,
            image_path: None,
            image_fingerprint: None,
            image_score: None,
            image_critique: None,
            warning: warning.or_else(|| Some(format!("scene {}: no candidate", scene.id))),
            logs,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use crate::executor::{CancelToken, ParallelExecutor};
    use crate::providers::{mock, ProviderSet};
    use crate::store::{ArtifactStore, CritiqueCache};
    use crate::style::infer_style_profile;
    use std::sync::Arc;

    fn scene(id: u32) -> Scene {
        Scene {
            id,
            duration_seconds: 4,
            visual_prompt: format!("wide shot {}", id),
            motion_prompt: "pan".into(),
            audio_prompt: None,
            primary_subject: Some("watch".into()),
            subject_description: Some("steel chronograph".into()),
            subject_reference_path: None,
            image_path: None,
            image_fingerprint: None,
            image_critique: None,
            image_score: None,
            image_warning: None,
            video_path: None,
            video_provider: None,
            video_warning: None,
        }
    }

    fn context(providers: ProviderSet, dir: &std::path::Path) -> StageContext {
        let config = ProjectConfig {
            topic: "luxury watch ad".into(),
            duration_seconds: 12,
            ..Default::default()
        };
        StageContext {
            providers: Arc::new(providers),
            store: Arc::new(ArtifactStore::open(dir, "p1").unwrap()),
            critique_cache: Arc::new(CritiqueCache::new()),
            executor: Arc::new(ParallelExecutor::new(3)),
            cancel: CancelToken::new(),
            style: infer_style_profile(&config),
            config,
            seed: 42,
        }
    }

    #[test]
    fn test_adaptive_threshold() {
        assert_eq!(acceptance_threshold(1, 3), 8);
        assert_eq!(acceptance_threshold(2, 3), 7);
        assert_eq!(acceptance_threshold(3, 3), 8);
    }

    #[tokio::test]
    async fn test_all_scenes_accepted_offline() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(ProviderSet::offline(42), tmp.path());
        let scenes: Vec<Scene> = (1..=3).map(scene).collect();
        let result = run(&ctx, &scenes).await.unwrap();
        assert_eq!(result.verdict, StageVerdict::Clean);
        assert_eq!(result.updates.len(), 3);
        for update in &result.updates {
            let path = update.image_path.as_ref().unwrap();
            assert!(path.exists());
            assert!(update.image_score.unwrap() >= 7);
        }
    }

    #[tokio::test]
    async fn test_retry_on_low_score_then_accept() {
        let tmp = tempfile::tempdir().unwrap();
        let mut providers = ProviderSet::offline(42);
        // First verdict misses the middle-scene bar, second clears it.
        providers.critic =
            crate::providers::critic::ImageCritic::Mock(mock::MockCritic::with_scores(vec![6, 9]));
        let ctx = context(providers, tmp.path());

        let update = generate_scene(&ctx, &scene(2), 3, None).await;
        assert_eq!(update.image_score, Some(9));
        let retries: Vec<_> = update
            .logs
            .iter()
            .filter(|l| l.message.contains("retry"))
            .collect();
        assert_eq!(retries.len(), 1, "exactly one retry entry expected");
    }

    #[tokio::test]
    async fn test_exhausted_retries_keep_best_with_warning() {
        let tmp = tempfile::tempdir().unwrap();
        let mut providers = ProviderSet::offline(42);
        providers.critic = crate::providers::critic::ImageCritic::Mock(
            mock::MockCritic::with_scores(vec![5, 6, 4]),
        );
        let ctx = context(providers, tmp.path());

        let update = generate_scene(&ctx, &scene(2), 3, None).await;
        assert_eq!(update.image_score, Some(6), "best of the three attempts");
        assert!(update.image_path.is_some(), "best candidate still persisted");
        assert!(update.warning.is_some());
    }

    #[tokio::test]
    async fn test_scene_one_failure_drops_reference_not_stage() {
        let tmp = tempfile::tempdir().unwrap();
        let mut providers = ProviderSet::offline(42);
        // Only scene 1's prompt trips the filter; the rest must still run,
        // just without the consistency reference.
        providers.image = crate::providers::image::ImageModel::Mock(
            mock::MockImageModel::failing_for(42, "wide shot 1"),
        );
        let ctx = context(providers, tmp.path());

        let scenes: Vec<Scene> = (1..=3).map(scene).collect();
        let result = run(&ctx, &scenes).await.unwrap();
        assert!(
            matches!(result.verdict, StageVerdict::Warned(_)),
            "one starved scene warns, it does not fail the stage"
        );

        let first = result.updates.iter().find(|u| u.scene_id == 1).unwrap();
        assert!(first.image_path.is_none());
        assert!(first.warning.is_some());
        for update in result.updates.iter().filter(|u| u.scene_id != 1) {
            assert!(update.image_path.is_some());
            assert!(
                update.subject_reference_path.is_none(),
                "no subject lock exists, so no reference is cited"
            );
        }
    }

    #[tokio::test]
    async fn test_stage_fails_only_when_no_scene_has_a_candidate() {
        let tmp = tempfile::tempdir().unwrap();
        let mut providers = ProviderSet::offline(42);
        providers.image = crate::providers::image::ImageModel::Mock(
            mock::MockImageModel::failing_for(42, "wide shot"),
        );
        let ctx = context(providers, tmp.path());

        let scenes: Vec<Scene> = (1..=3).map(scene).collect();
        let result = run(&ctx, &scenes).await.unwrap();
        assert!(result.verdict.is_failed());
        assert!(result.updates.iter().all(|u| u.image_path.is_none()));
    }

    #[tokio::test]
    async fn test_second_run_hits_cache_without_provider_calls() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(ProviderSet::offline(42), tmp.path());
        let scenes: Vec<Scene> = (1..=2).map(scene).collect();
        run(&ctx, &scenes).await.unwrap();

        let calls_before = match &ctx.providers.image {
            crate::providers::image::ImageModel::Mock(m) => m.calls(),
            _ => unreachable!(),
        };
        // Same context, same scenes: everything resolves from the store.
        let result = run(&ctx, &scenes).await.unwrap();
        let calls_after = match &ctx.providers.image {
            crate::providers::image::ImageModel::Mock(m) => m.calls(),
            _ => unreachable!(),
        };
        assert_eq!(calls_before, calls_after, "cache hits must not call the provider");
        assert!(result.updates.iter().all(|u| u.image_path.is_some()));
    }
}
