// ADSMITH Audio Stage - Voiceover, SFX & Music Fan-Out
// Copyright (c) 2026 AdSmith Collective | ADSMITH
//
// Voiceover is load-bearing: a failed line fails the stage. SFX and the
// music bed degrade to warnings.

use crate::error::{PipelineError, Result};
use crate::project::{Script, ScriptLine};
use crate::providers::{FxRequest, TtsRequest, VoiceFilter};
use crate::stages::{StageContext, StageLog, StageVerdict};
use crate::store::{fingerprint, ArtifactKind};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Default voices when neither the line nor the cast map names one.
const DEFAULT_FEMALE_VOICE: &str = "vx-aria";
const DEFAULT_MALE_VOICE: &str = "vx-dane";

#[derive(Debug, Clone)]
pub struct LineAudioUpdate {
    pub line_index: usize,
    pub voice_id: String,
    pub audio_path: PathBuf,
}

#[derive(Debug)]
pub struct AudioStageResult {
    pub line_updates: Vec<LineAudioUpdate>,
    /// Scene id -> effect file, mixed at that scene's boundary.
    pub sfx: BTreeMap<u32, PathBuf>,
    pub bgm: Option<PathBuf>,
    pub verdict: StageVerdict,
    pub logs: Vec<StageLog>,
}

/// Crude gender inference for default-voice casting; explicit casting
/// always wins.
pub fn infer_gender(speaker: &str) -> &'static str {
    let s = speaker.to_lowercase();
    const FEMALE_MARKERS: [&str; 6] = ["she", "her", "woman", "girl", "mother", "anna"];
    if FEMALE_MARKERS.iter().any(|m| s.contains(m)) || s.ends_with('a') {
        "female"
    } else {
        "male"
    }
}

/// Resolution order: explicit line voice, then the cast map, then the
/// gender default.
pub fn resolve_voice(line: &ScriptLine, voice_map: &BTreeMap<String, String>) -> String {
    if let Some(v) = &line.voice_id {
        return v.clone();
    }
    if let Some(v) = voice_map.get(&line.speaker) {
        return v.clone();
    }
    match infer_gender(&line.speaker) {
        "female" => DEFAULT_FEMALE_VOICE.to_string(),
        _ => DEFAULT_MALE_VOICE.to_string(),
    }
}

enum AudioJob {
    Line {
        index: usize,
        voice_id: String,
        path: PathBuf,
    },
    Sfx {
        scene_id: u32,
        path: PathBuf,
    },
    Bgm {
        path: PathBuf,
    },
}

pub async fn run(ctx: &StageContext, script: &Script) -> Result<AudioStageResult> {
    let mut logs = Vec::new();
    let mut warnings = Vec::new();

    // Auto-cast: fill voice_map gaps from the provider's library before
    // any synthesis is queued.
    let mut voice_map = ctx.config.voice_map.clone();
    if ctx.config.auto_cast {
        for line in &script.lines {
            if line.voice_id.is_none() && !voice_map.contains_key(&line.speaker) {
                let filter = VoiceFilter {
                    gender: Some(infer_gender(&line.speaker).to_string()),
                    accent: None,
                    search_hint: Some(line.speaker.clone()),
                };
                match ctx.providers.voice.list_voices(&filter).await {
                    Ok(voices) if !voices.is_empty() => {
                        logs.push(StageLog::new(
                            "AUDIO",
                            format!("Auto-cast {} as {}", line.speaker, voices[0].voice_id),
                        ));
                        voice_map.insert(line.speaker.clone(), voices[0].voice_id.clone());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        logs.push(StageLog::new(
                            "AUDIO",
                            format!("Auto-cast lookup failed for {}: {}", line.speaker, e),
                        ));
                    }
                }
            }
        }
    }

    let total_duration = script.total_duration_seconds() as f64;
    type JobResult = std::result::Result<AudioJob, (bool, String)>; // (fatal, message)
    let mut tasks: Vec<crate::executor::BoxedTask<JobResult>> = Vec::new();

    // Voiceover lines.
    for (index, line) in script.lines.iter().enumerate() {
        let voice_id = resolve_voice(line, &voice_map);
        let ctx = ctx.clone();
        let line = line.clone();
        tasks.push(Box::new(move || {
            Box::pin(async move {
                let label = format!("line_{:02}", index + 1);
                let duration_target = line
                    .time_range
                    .end_s
                    .map(|end| end - line.time_range.start_s);
                let fp = fingerprint(&[
                    "tts",
                    &line.text,
                    &voice_id,
                    &format!("{:?}", duration_target),
                ]);
                if let Some(path) = ctx.store.lookup(&fp) {
                    return Ok::<JobResult, PipelineError>(Ok(AudioJob::Line {
                        index,
                        voice_id,
                        path,
                    }));
                }
                let request = TtsRequest {
                    text: line.text.clone(),
                    voice_id: voice_id.clone(),
                    duration_target_s: duration_target,
                };
                match ctx.providers.voice.synthesize_speech(&request).await {
                    Ok(bytes) => {
                        let path = ctx.store.put(ArtifactKind::Audio, &label, &fp, &bytes)?;
                        Ok(Ok(AudioJob::Line {
                            index,
                            voice_id,
                            path,
                        }))
                    }
                    // A lost voiceover line sinks the whole stage.
                    Err(e) => Ok(Err((true, format!("line {} failed: {}", index + 1, e)))),
                }
            })
        }));
    }

    // Per-scene sound effects.
    if ctx.config.include_sfx {
        for scene in &script.scenes {
            let Some(prompt) = scene.audio_prompt.clone() else {
                continue;
            };
            let scene_id = scene.id;
            // Effects sit in the 3-5s window regardless of scene length.
            let duration_s = (scene.duration_seconds as f64).clamp(3.0, 5.0);
            let ctx = ctx.clone();
            tasks.push(Box::new(move || {
                Box::pin(async move {
                    let label = format!("sfx_{:02}", scene_id);
                    let fp = fingerprint(&["sfx", &prompt, &duration_s.to_string()]);
                    if let Some(path) = ctx.store.lookup(&fp) {
                        return Ok(Ok(AudioJob::Sfx { scene_id, path }));
                    }
                    let request = FxRequest {
                        prompt,
                        duration_s,
                    };
                    match ctx.providers.voice.synthesize_fx(&request).await {
                        Ok(bytes) => {
                            let path = ctx.store.put(ArtifactKind::Audio, &label, &fp, &bytes)?;
                            Ok(Ok(AudioJob::Sfx { scene_id, path }))
                        }
                        Err(e) => Ok(Err((false, format!("sfx scene {} failed: {}", scene_id, e)))),
                    }
                })
            }));
        }
    }

    // One music bed covering the whole spot.
    if ctx.config.include_bgm {
        let prompt = ctx
            .config
            .bgm_prompt
            .clone()
            .unwrap_or_else(|| format!("understated {} score", script.mood));
        let ctx2 = ctx.clone();
        tasks.push(Box::new(move || {
            Box::pin(async move {
                let fp = fingerprint(&["bgm", &prompt, &total_duration.to_string()]);
                if let Some(path) = ctx2.store.lookup(&fp) {
                    return Ok(Ok(AudioJob::Bgm { path }));
                }
                let request = FxRequest {
                    prompt,
                    duration_s: total_duration,
                };
                match ctx2.providers.voice.synthesize_fx(&request).await {
                    Ok(bytes) => {
                        let path = ctx2.store.put(ArtifactKind::Audio, "bgm", &fp, &bytes)?;
                        Ok(Ok(AudioJob::Bgm { path }))
                    }
                    Err(e) => Ok(Err((false, format!("music bed failed: {}", e)))),
                }
            })
        }));
    }

    let results = ctx.executor.fan_out(tasks, &ctx.cancel, None).await;

    let mut line_updates = Vec::new();
    let mut sfx = BTreeMap::new();
    let mut bgm = None;
    for result in results {
        match result? {
            Ok(AudioJob::Line {
                index,
                voice_id,
                path,
            }) => line_updates.push(LineAudioUpdate {
                line_index: index,
                voice_id,
                audio_path: path,
            }),
            Ok(AudioJob::Sfx { scene_id, path }) => {
                sfx.insert(scene_id, path);
            }
            Ok(AudioJob::Bgm { path }) => bgm = Some(path),
            Err((true, message)) => {
                return Ok(AudioStageResult {
                    line_updates: Vec::new(),
                    sfx: BTreeMap::new(),
                    bgm: None,
                    verdict: StageVerdict::Failed(message),
                    logs,
                });
            }
            Err((false, message)) => {
                logs.push(StageLog::new("AUDIO", format!("Downgraded: {}", message)));
                warnings.push(message);
            }
        }
    }

    line_updates.sort_by_key(|u| u.line_index);
    let verdict = if warnings.is_empty() {
        StageVerdict::Clean
    } else {
        StageVerdict::Warned(warnings)
    };
    Ok(AudioStageResult {
        line_updates,
        sfx,
        bgm,
        verdict,
        logs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use crate::executor::{CancelToken, ParallelExecutor};
    use crate::project::{Scene, TimeRange};
    use crate::providers::ProviderSet;
    use crate::store::{ArtifactStore, CritiqueCache};
    use crate::style::infer_style_profile;
    use std::sync::Arc;

    fn script() -> Script {
        Script {
            mood: "assured".into(),
            scenes: vec![Scene {
                id: 1,
                duration_seconds: 8,
                visual_prompt: "v".into(),
                motion_prompt: "m".into(),
                audio_prompt: Some("soft whoosh".into()),
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
            lines: vec![
                ScriptLine {
                    speaker: "Narrator".into(),
                    text: "Meet the watch.".into(),
                    time_range: TimeRange { start_s: 0.5, end_s: Some(2.5) },
                    voice_id: None,
                    audio_path: None,
                },
                ScriptLine {
                    speaker: "Anna".into(),
                    text: "I never take it off.".into(),
                    time_range: TimeRange { start_s: 4.0, end_s: None },
                    voice_id: None,
                    audio_path: None,
                },
            ],
        }
    }

    fn context(include_sfx: bool, include_bgm: bool, dir: &std::path::Path) -> StageContext {
        let config = ProjectConfig {
            topic: "watch".into(),
            duration_seconds: 8,
            include_sfx,
            include_bgm,
            ..Default::default()
        };
        StageContext {
            providers: Arc::new(ProviderSet::offline(1)),
            store: Arc::new(ArtifactStore::open(dir, "p1").unwrap()),
            critique_cache: Arc::new(CritiqueCache::new()),
            executor: Arc::new(ParallelExecutor::new(3)),
            cancel: CancelToken::new(),
            style: infer_style_profile(&config),
            config,
            seed: 1,
        }
    }

    #[test]
    fn test_voice_resolution_order() {
        let mut line = ScriptLine {
            speaker: "Narrator".into(),
            text: "t".into(),
            time_range: TimeRange { start_s: 0.0, end_s: None },
            voice_id: None,
            audio_path: None,
        };
        let mut map = BTreeMap::new();
        assert_eq!(resolve_voice(&line, &map), DEFAULT_MALE_VOICE);
        map.insert("Narrator".to_string(), "vx-custom".to_string());
        assert_eq!(resolve_voice(&line, &map), "vx-custom");
        line.voice_id = Some("vx-explicit".into());
        assert_eq!(resolve_voice(&line, &map), "vx-explicit");
    }

    #[test]
    fn test_gender_inference_defaults() {
        assert_eq!(infer_gender("Anna"), "female");
        assert_eq!(infer_gender("Narrator"), "male");
    }

    #[tokio::test]
    async fn test_lines_sfx_and_bgm_generated() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(true, true, tmp.path());
        let result = run(&ctx, &script()).await.unwrap();
        assert_eq!(result.verdict, StageVerdict::Clean);
        assert_eq!(result.line_updates.len(), 2);
        assert!(result.line_updates.iter().all(|u| u.audio_path.exists()));
        assert_eq!(result.sfx.len(), 1);
        assert!(result.bgm.is_some());
    }

    #[tokio::test]
    async fn test_audio_cache_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(false, false, tmp.path());
        run(&ctx, &script()).await.unwrap();
        let calls_before = match &ctx.providers.voice {
            crate::providers::audio::VoiceModel::Mock(m) => m.calls(),
            _ => unreachable!(),
        };
        run(&ctx, &script()).await.unwrap();
        let calls_after = match &ctx.providers.voice {
            crate::providers::audio::VoiceModel::Mock(m) => m.calls(),
            _ => unreachable!(),
        };
        assert_eq!(calls_before, calls_after);
    }
}
