// ADSMITH Composer - Deterministic Three-Checkpoint Assembly
// Copyright (c) 2026 AdSmith Collective | ADSMITH
//
// Checkpoint 1: clips -> video_only.mp4 (concat demuxer, copy-mux when the
// streams already agree, normalize first when they don't).
// Checkpoint 2: VO + SFX + ducked BGM -> audio_mix.m4a over a silent bed.
// Checkpoint 3: mux + adaptive-quality encode (CRF 18 -> 23 -> 28).
// Every checkpoint is durable on disk; remix re-enters at checkpoint 2.

use crate::error::{PipelineError, Result};
use crate::media;
use crate::stages::{StageContext, StageLog, StageVerdict};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{info, warn};

pub const VIDEO_ONLY_FILE: &str = "video_only.mp4";
pub const AUDIO_MIX_FILE: &str = "audio_mix.m4a";
pub const FINAL_FILE: &str = "final.mp4";

/// Quality ladder for the final encode; failure or oversize steps down.
const CRF_LADDER: [u32; 3] = [18, 23, 28];
/// BGM gain under voiceover, ~-12 dB.
const DUCK_GAIN: f64 = 0.25;

/// An audio element placed on the timeline at an absolute offset.
#[derive(Debug, Clone)]
pub struct TimedAudio {
    pub path: PathBuf,
    pub start_s: f64,
    /// Natural length, probed before mixing.
    pub duration_s: f64,
}

/// Everything the composer consumes, already resolved to paths.
#[derive(Debug, Clone)]
pub struct ComposerPlan {
    /// Clips in scene order.
    pub clips: Vec<PathBuf>,
    pub lines: Vec<TimedAudio>,
    pub sfx: Vec<TimedAudio>,
    pub bgm: Option<PathBuf>,
    pub total_duration_s: f64,
}

#[derive(Debug)]
pub struct ComposeResult {
    pub video_only: PathBuf,
    pub audio_mix: PathBuf,
    pub final_video: PathBuf,
    pub verdict: StageVerdict,
    pub logs: Vec<StageLog>,
}

pub async fn run(ctx: &StageContext, plan: &ComposerPlan, reuse_video: bool) -> Result<ComposeResult> {
    let out_dir = ctx.store.dir(crate::store::ArtifactKind::Final);
    let video_only = out_dir.join(VIDEO_ONLY_FILE);
    let audio_mix = out_dir.join(AUDIO_MIX_FILE);
    let final_video = out_dir.join(FINAL_FILE);
    let mut logs = Vec::new();

    // -- Checkpoint 1: video timeline -------------------------------------
    if reuse_video {
        if !video_only.exists() {
            return Err(PipelineError::Assembly(
                "remix requested but video_only.mp4 is missing".into(),
            ));
        }
        logs.push(StageLog::new("COMPOSER", "Checkpoint 1 reused from disk"));
    } else {
        if plan.clips.is_empty() {
            return Err(PipelineError::Assembly("no clips to assemble".into()));
        }
        build_timeline(ctx, &plan.clips, &video_only).await?;
        logs.push(StageLog::new(
            "COMPOSER",
            format!("Checkpoint 1 done: {} clips -> {}", plan.clips.len(), video_only.display()),
        ));
    }

    // -- Checkpoint 2: audio mix ------------------------------------------
    mix_audio(plan, &audio_mix).await?;
    logs.push(StageLog::new(
        "COMPOSER",
        format!(
            "Checkpoint 2 done: {} lines, {} sfx, bgm={}",
            plan.lines.len(),
            plan.sfx.len(),
            plan.bgm.is_some()
        ),
    ));

    // -- Checkpoint 3: final mux with the quality ladder -------------------
    let crf_used = finalize_mux(ctx, &video_only, &audio_mix, &final_video).await?;
    logs.push(StageLog::new(
        "COMPOSER",
        format!("Checkpoint 3 done at CRF {}: {}", crf_used, final_video.display()),
    ));

    if !media::verify_media(&final_video).await {
        return Err(PipelineError::Assembly(
            "final output failed integrity verification".into(),
        ));
    }

    let duration = media::probe_duration(&final_video).await?;
    let drift = (duration - plan.total_duration_s).abs();
    let verdict = if drift > 0.2 {
        StageVerdict::Warned(vec![format!(
            "final duration {:.2}s drifts {:.2}s from the {:.0}s brief",
            duration, drift, plan.total_duration_s
        )])
    } else {
        StageVerdict::Clean
    };

    Ok(ComposeResult {
        video_only,
        audio_mix,
        final_video,
        verdict,
        logs,
    })
}

/// Concatenate clips at the target geometry. Copy-mux when every input
/// already matches; otherwise normalize each clip to a common intermediate
/// first.
async fn build_timeline(ctx: &StageContext, clips: &[PathBuf], out: &Path) -> Result<()> {
    let (target_w, target_h) = ctx.config.aspect_ratio.dimensions(ctx.config.resolution);

    let mut uniform = true;
    for clip in clips {
        let params = media::probe_video_params(clip).await?;
        if params.codec != "h264" || params.width != target_w || params.height != target_h {
            uniform = false;
            break;
        }
    }

    let concat_inputs: Vec<PathBuf> = if uniform {
        clips.to_vec()
    } else {
        info!("[COMPOSER] Inputs differ from target geometry, normalizing first");
        let mut normalized = Vec::with_capacity(clips.len());
        for (i, clip) in clips.iter().enumerate() {
            let norm = ctx
                .store
                .dir(crate::store::ArtifactKind::Clip)
                .join(format!("norm_{:02}.mp4", i + 1));
            normalize_clip(clip, &norm, target_w, target_h).await?;
            normalized.push(norm);
        }
        normalized
    };

    // Concat demuxer over a manifest: zero quality loss, near-zero CPU.
    // Entries must be absolute, the demuxer resolves relative paths
    // against the manifest's own directory.
    let absolute: Vec<PathBuf> = concat_inputs
        .iter()
        .map(|p| p.canonicalize().unwrap_or_else(|_| p.clone()))
        .collect();
    let manifest_path = out.with_extension("concat_manifest.txt");
    fs::write(&manifest_path, concat_manifest(&absolute))?;

    let status = Command::new("ffmpeg")
        .kill_on_drop(true)
        .args(["-y", "-nostdin", "-f", "concat", "-safe", "0", "-i"])
        .arg(&manifest_path)
        .args(["-c", "copy"])
        .arg(media::safe_arg_path(out))
        .status()
        .await?;

    let _ = fs::remove_file(&manifest_path);

    if !status.success() {
        return Err(PipelineError::Assembly("concat demuxer failed".into()));
    }
    Ok(())
}

/// One line per segment: `file '<path>'`.
pub fn concat_manifest(segments: &[PathBuf]) -> String {
    segments
        .iter()
        .map(|p| format!("file '{}'", p.to_string_lossy()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Transcode a clip to the common intermediate: target geometry
/// (aspect-preserving pad), h264, 24fps, yuv420p.
async fn normalize_clip(input: &Path, output: &Path, w: u32, h: u32) -> Result<()> {
    let vf = format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,fps=24,format=yuv420p",
    );
    let status = Command::new("ffmpeg")
        .kill_on_drop(true)
        .args(["-y", "-nostdin", "-i"])
        .arg(media::safe_arg_path(input))
        .args(["-vf", &vf, "-an", "-c:v", "libx264", "-preset", "medium", "-crf", "18"])
        .arg(media::safe_arg_path(output))
        .status()
        .await?;
    if !status.success() {
        return Err(PipelineError::Assembly(format!(
            "normalization failed for {:?}",
            input
        )));
    }
    Ok(())
}

/// Time-align every element over a silent bed of the full duration and
/// mix. The bed is input 0 and pins the output length.
async fn mix_audio(plan: &ComposerPlan, out: &Path) -> Result<()> {
    let bgm_index = plan.bgm.as_ref().map(|_| 1 + plan.lines.len() + plan.sfx.len());
    let filter = build_mix_filter(&plan.lines, &plan.sfx, bgm_index, plan.total_duration_s);

    let mut cmd = Command::new("ffmpeg");
    cmd.kill_on_drop(true).args(["-y", "-nostdin"]);
    // Input 0: the silent bed.
    cmd.args([
        "-f",
        "lavfi",
        "-t",
        &format!("{:.3}", plan.total_duration_s),
        "-i",
        "anullsrc=r=48000:cl=stereo",
    ]);
    for line in &plan.lines {
        cmd.arg("-i").arg(media::safe_arg_path(&line.path));
    }
    for fx in &plan.sfx {
        cmd.arg("-i").arg(media::safe_arg_path(&fx.path));
    }
    if let Some(bgm) = &plan.bgm {
        cmd.arg("-i").arg(media::safe_arg_path(bgm));
    }
    cmd.args(["-filter_complex", &filter, "-map", "[mix]"])
        .args(["-c:a", "aac", "-b:a", "192k", "-ar", "48000"])
        .arg(media::safe_arg_path(out));

    let output = cmd.output().await?;
    if !output.status.success() {
        warn!(
            "[COMPOSER] Audio mix stderr: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        return Err(PipelineError::Assembly("audio mix failed".into()));
    }
    Ok(())
}

/// Build the full filter graph for checkpoint 2. Pure, so the exact graph
/// is testable without ffmpeg.
pub fn build_mix_filter(
    lines: &[TimedAudio],
    sfx: &[TimedAudio],
    bgm_input: Option<usize>,
    total_s: f64,
) -> String {
    let mut parts = Vec::new();
    let mut mix_labels = vec!["[0:a]".to_string()];

    // VO lines and effects: conform to the bed's format, then shift onto
    // the timeline. amix needs uniform rate and layout across inputs.
    for (slot, element) in lines.iter().chain(sfx.iter()).enumerate() {
        let input = slot + 1;
        let delay_ms = (element.start_s * 1000.0).round().max(0.0) as u64;
        let label = format!("[a{}]", input);
        parts.push(format!(
            "[{input}:a]aformat=sample_rates=48000:channel_layouts=stereo,adelay={delay_ms}|{delay_ms}{label}"
        ));
        mix_labels.push(label);
    }

    // BGM: duck under every VO interval, then trim to the bed.
    if let Some(bgm) = bgm_input {
        let mut chain =
            format!("[{bgm}:a]aformat=sample_rates=48000:channel_layouts=stereo,atrim=0:{total_s:.3}");
        for line in lines {
            let start = line.start_s;
            let end = line.start_s + line.duration_s;
            chain.push_str(&format!(
                ",volume=enable='between(t,{start:.3},{end:.3})':volume={DUCK_GAIN}"
            ));
        }
        chain.push_str("[bgm]");
        parts.push(chain);
        mix_labels.push("[bgm]".to_string());
    }

    // duration=first: the silent bed (input 0) pins the mix length.
    parts.push(format!(
        "{}amix=inputs={}:duration=first:normalize=0[mix]",
        mix_labels.concat(),
        mix_labels.len()
    ));
    parts.join(";")
}

/// Mux video and audio into the final container, stepping down the CRF
/// ladder on encoder failure or oversize output. Returns the CRF used.
async fn finalize_mux(
    ctx: &StageContext,
    video: &Path,
    audio: &Path,
    out: &Path,
) -> Result<u32> {
    let max_bytes = (ctx.config.platform.max_output_mb() * 1_048_576.0) as u64;

    for (i, crf) in CRF_LADDER.iter().enumerate() {
        let status = Command::new("ffmpeg")
            .kill_on_drop(true)
            .args(["-y", "-nostdin", "-i"])
            .arg(media::safe_arg_path(video))
            .arg("-i")
            .arg(media::safe_arg_path(audio))
            .args(["-map", "0:v:0", "-map", "1:a:0"])
            .args(["-c:v", "libx264", "-preset", "medium"])
            .args(["-crf", &crf.to_string()])
            .args(["-pix_fmt", "yuv420p"])
            .args(["-c:a", "copy"])
            .args(["-movflags", "+faststart"])
            .arg(media::safe_arg_path(out))
            .status()
            .await?;

        if !status.success() {
            warn!("[COMPOSER] Encode at CRF {} failed", crf);
            continue;
        }

        let size = fs::metadata(out)?.len();
        if size > max_bytes && i + 1 < CRF_LADDER.len() {
            warn!(
                "[COMPOSER] Output {:.1} MB over the {:.0} MB cap at CRF {}, stepping down",
                size as f64 / 1_048_576.0,
                ctx.config.platform.max_output_mb(),
                crf
            );
            continue;
        }

        info!(
            "[COMPOSER] ✅ Final encode at CRF {} ({:.2} MB)",
            crf,
            size as f64 / 1_048_576.0
        );
        return Ok(*crf);
    }

    Err(PipelineError::Assembly(format!(
        "encoder failed at every CRF in {:?}",
        CRF_LADDER
    )))
}

/// Probe the natural duration of each audio element so ducking intervals
/// and mix placement use real lengths.
pub async fn resolve_timed_audio(
    elements: Vec<(PathBuf, f64)>,
) -> Result<Vec<TimedAudio>> {
    let mut resolved = Vec::with_capacity(elements.len());
    for (path, start_s) in elements {
        let duration_s = media::probe_duration(&path).await?;
        resolved.push(TimedAudio {
            path,
            start_s,
            duration_s,
        });
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timed(start: f64, dur: f64) -> TimedAudio {
        TimedAudio {
            path: PathBuf::from(format!("a_{start}.m4a")),
            start_s: start,
            duration_s: dur,
        }
    }

    #[test]
    fn test_concat_manifest_shape() {
        let manifest = concat_manifest(&[
            PathBuf::from("/tmp/scene_01.mp4"),
            PathBuf::from("/tmp/scene_02.mp4"),
        ]);
        let lines: Vec<&str> = manifest.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "file '/tmp/scene_01.mp4'");
    }

    #[test]
    fn test_mix_filter_delays_each_line() {
        let filter = build_mix_filter(&[timed(0.5, 2.0), timed(4.0, 1.5)], &[], None, 12.0);
        assert!(filter.contains("adelay=500|500[a1]"));
        assert!(filter.contains("adelay=4000|4000[a2]"));
        assert!(filter.contains("channel_layouts=stereo"));
        assert!(filter.contains("amix=inputs=3:duration=first"));
    }

    #[test]
    fn test_mix_filter_ducks_bgm_during_vo() {
        let filter = build_mix_filter(&[timed(1.0, 2.0)], &[], Some(2), 10.0);
        assert!(filter.contains("volume=enable='between(t,1.000,3.000)':volume=0.25"));
        assert!(filter.contains("[bgm]"));
        assert!(filter.contains("amix=inputs=3"));
    }

    #[test]
    fn test_mix_filter_without_bgm_has_no_duck() {
        let filter = build_mix_filter(&[timed(0.0, 2.0)], &[timed(4.0, 3.0)], None, 8.0);
        assert!(!filter.contains("volume=enable"));
        assert!(filter.contains("amix=inputs=3"));
    }

    #[test]
    fn test_crf_ladder_order() {
        assert_eq!(CRF_LADDER, [18, 23, 28]);
    }
}
