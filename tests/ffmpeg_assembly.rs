// Composer integration against real ffmpeg output. Fixtures are rendered
// with lavfi test sources; every test skips when ffmpeg is missing.

use adsmith_core::config::{AspectRatio, ProjectConfig, Resolution};
use adsmith_core::executor::{CancelToken, ParallelExecutor};
use adsmith_core::media;
use adsmith_core::providers::ProviderSet;
use adsmith_core::stages::compose::{self, ComposerPlan, TimedAudio};
use adsmith_core::stages::StageContext;
use adsmith_core::store::{ArtifactStore, CritiqueCache};
use adsmith_core::style::infer_style_profile;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

fn render_clip(dir: &Path, name: &str, seconds: u32, size: &str) -> PathBuf {
    let path = dir.join(name);
    let status = Command::new("ffmpeg")
        .args([
            "-y",
            "-f",
            "lavfi",
            "-i",
            &format!("testsrc2=duration={}:size={}:rate=24", seconds, size),
            "-c:v",
            "libx264",
            "-preset",
            "ultrafast",
            "-pix_fmt",
            "yuv420p",
        ])
        .arg(&path)
        .status()
        .expect("spawn ffmpeg");
    assert!(status.success(), "fixture clip render failed");
    path
}

fn render_voice(dir: &Path, name: &str, seconds: f64) -> PathBuf {
    let path = dir.join(name);
    let status = Command::new("ffmpeg")
        .args([
            "-y",
            "-f",
            "lavfi",
            "-t",
            &seconds.to_string(),
            "-i",
            "sine=frequency=440:sample_rate=48000",
            "-c:a",
            "aac",
        ])
        .arg(&path)
        .status()
        .expect("spawn ffmpeg");
    assert!(status.success(), "fixture audio render failed");
    path
}

fn stream_types(path: &Path) -> Vec<String> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "stream=codec_type",
            "-of",
            "csv=p=0",
        ])
        .arg(path)
        .output()
        .expect("spawn ffprobe");
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

fn context(dir: &Path) -> StageContext {
    let config = ProjectConfig {
        topic: "assembly fixture".into(),
        duration_seconds: 8,
        aspect_ratio: AspectRatio::Widescreen,
        resolution: Resolution::Hd720,
        ..Default::default()
    };
    StageContext {
        providers: Arc::new(ProviderSet::offline(3)),
        store: Arc::new(ArtifactStore::open(dir, "p1").unwrap()),
        critique_cache: Arc::new(CritiqueCache::new()),
        executor: Arc::new(ParallelExecutor::new(2)),
        cancel: CancelToken::new(),
        style: infer_style_profile(&config),
        config,
        seed: 3,
    }
}

#[tokio::test]
async fn test_uniform_clips_concat_and_mux() {
    if !media::ffmpeg_available() {
        eprintln!("ffmpeg not installed; skipping");
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let ctx = context(tmp.path());
    let clip_dir = ctx.store.dir(adsmith_core::store::ArtifactKind::Clip);

    // Already at the target geometry: checkpoint 1 copy-muxes.
    let clips = vec![
        render_clip(&clip_dir, "a.mp4", 4, "1280x720"),
        render_clip(&clip_dir, "b.mp4", 4, "1280x720"),
    ];
    let voice = render_voice(&clip_dir, "vo.m4a", 2.0);

    let plan = ComposerPlan {
        clips,
        lines: vec![TimedAudio {
            path: voice,
            start_s: 0.5,
            duration_s: 2.0,
        }],
        sfx: vec![],
        bgm: None,
        total_duration_s: 8.0,
    };

    let result = compose::run(&ctx, &plan, false).await.unwrap();
    assert!(result.final_video.exists());
    assert!(result.video_only.exists());
    assert!(result.audio_mix.exists());

    let duration = media::probe_duration(&result.final_video).await.unwrap();
    assert!((duration - 8.0).abs() <= 0.2, "duration {} off target", duration);

    // Exactly one video track and one audio track in the container.
    let streams = stream_types(&result.final_video);
    assert_eq!(
        streams.iter().filter(|s| s.as_str() == "video").count(),
        1
    );
    assert_eq!(
        streams.iter().filter(|s| s.as_str() == "audio").count(),
        1
    );
}

#[tokio::test]
async fn test_mixed_geometry_normalizes_before_concat() {
    if !media::ffmpeg_available() {
        eprintln!("ffmpeg not installed; skipping");
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let ctx = context(tmp.path());
    let clip_dir = ctx.store.dir(adsmith_core::store::ArtifactKind::Clip);

    // Second clip is smaller; the composer must transcode to a common
    // intermediate before concatenation.
    let clips = vec![
        render_clip(&clip_dir, "a.mp4", 4, "1280x720"),
        render_clip(&clip_dir, "b.mp4", 4, "320x180"),
    ];

    let plan = ComposerPlan {
        clips,
        lines: vec![],
        sfx: vec![],
        bgm: None,
        total_duration_s: 8.0,
    };

    let result = compose::run(&ctx, &plan, false).await.unwrap();
    let params = media::probe_video_params(&result.final_video).await.unwrap();
    assert_eq!((params.width, params.height), (1280, 720));

    let duration = media::probe_duration(&result.final_video).await.unwrap();
    assert!((duration - 8.0).abs() <= 0.2);
}

#[tokio::test]
async fn test_remix_reuses_video_only() {
    if !media::ffmpeg_available() {
        eprintln!("ffmpeg not installed; skipping");
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let ctx = context(tmp.path());
    let clip_dir = ctx.store.dir(adsmith_core::store::ArtifactKind::Clip);

    let clips = vec![render_clip(&clip_dir, "a.mp4", 4, "1280x720")];
    let plan = ComposerPlan {
        clips,
        lines: vec![],
        sfx: vec![],
        bgm: None,
        total_duration_s: 4.0,
    };
    let first = compose::run(&ctx, &plan, false).await.unwrap();
    let video_bytes_before = std::fs::read(&first.video_only).unwrap();

    // New audio, reused timeline.
    let voice = render_voice(&clip_dir, "vo2.m4a", 1.5);
    let remix_plan = ComposerPlan {
        clips: vec![],
        lines: vec![TimedAudio {
            path: voice,
            start_s: 0.0,
            duration_s: 1.5,
        }],
        sfx: vec![],
        bgm: None,
        total_duration_s: 4.0,
    };
    let second = compose::run(&ctx, &remix_plan, true).await.unwrap();
    assert_eq!(
        video_bytes_before,
        std::fs::read(&second.video_only).unwrap(),
        "checkpoint 1 must be untouched on remix"
    );
    assert!(second.final_video.exists());
}

#[tokio::test]
async fn test_remix_without_checkpoint_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = context(tmp.path());
    let plan = ComposerPlan {
        clips: vec![],
        lines: vec![],
        sfx: vec![],
        bgm: None,
        total_duration_s: 4.0,
    };
    let err = compose::run(&ctx, &plan, true).await.unwrap_err();
    assert!(matches!(err, adsmith_core::PipelineError::Assembly(_)));
}
