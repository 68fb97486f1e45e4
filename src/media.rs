// ADSMITH Media Probes - FFmpeg/FFprobe Helpers
// Copyright (c) 2026 AdSmith Collective | ADSMITH

use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info};

/// Treat a relative path as a file, never as a flag.
pub fn safe_arg_path(p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        Path::new(".").join(p)
    }
}

/// Whether an ffmpeg binary is reachable. Checked once per process.
pub fn ffmpeg_available() -> bool {
    use std::sync::OnceLock;
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| {
        std::process::Command::new("ffmpeg")
            .arg("-version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    })
}

/// Container duration in seconds, from the format header.
pub async fn probe_duration(path: &Path) -> Result<f64> {
    let safe_path = safe_arg_path(path);

    // Header reads are near-instant; the timeout guards against wedged pipes.
    let output = tokio::time::timeout(
        Duration::from_secs(10),
        Command::new("ffprobe")
            .kill_on_drop(true)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(&safe_path)
            .output(),
    )
    .await
    .map_err(|_| {
        PipelineError::Assembly("ffprobe duration check timed out".into())
    })??;

    String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse()
        .map_err(|_| PipelineError::Assembly(format!("unparsable duration for {:?}", path)))
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamParams {
    pub codec: String,
    pub width: u32,
    pub height: u32,
}

/// First video stream's codec and geometry.
pub async fn probe_video_params(path: &Path) -> Result<StreamParams> {
    let safe_path = safe_arg_path(path);
    let output = tokio::time::timeout(
        Duration::from_secs(10),
        Command::new("ffprobe")
            .kill_on_drop(true)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=codec_name,width,height",
                "-of",
                "csv=p=0",
            ])
            .arg(&safe_path)
            .output(),
    )
    .await
    .map_err(|_| PipelineError::Assembly("ffprobe stream check timed out".into()))??;

    let text = String::from_utf8_lossy(&output.stdout);
    let mut parts = text.trim().split(',');
    let codec = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PipelineError::Assembly(format!("no video stream in {:?}", path)))?
        .to_string();
    let width = parts
        .next()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0);
    let height = parts
        .next()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0);
    Ok(StreamParams {
        codec,
        width,
        height,
    })
}

/// Null-decode integrity pass: ffmpeg reads and decodes every packet but
/// writes nothing, so any bitstream corruption surfaces on stderr.
pub async fn verify_media(path: &Path) -> bool {
    let safe_path = safe_arg_path(path);
    let output = Command::new("ffmpeg")
        .kill_on_drop(true)
        .args(["-v", "error"])
        .arg("-i")
        .arg(&safe_path)
        .args(["-f", "null", "-"])
        .output()
        .await;

    match output {
        Ok(res) => {
            let stderr = String::from_utf8_lossy(&res.stderr);
            if res.status.success() && stderr.trim().is_empty() {
                info!(
                    "[VALIDATE] ✅ Verified: {:?}",
                    path.file_name().unwrap_or_default()
                );
                true
            } else {
                error!("[VALIDATE] ❌ Corruption in {:?}: {}", path, stderr.trim());
                false
            }
        }
        Err(e) => {
            error!("[VALIDATE] Failed to spawn ffmpeg: {}", e);
            false
        }
    }
}

/// Grab the last frame of a clip as a JPEG, for the continuity bridge.
pub async fn extract_last_frame(clip: &Path, frame_out: &Path) -> Result<()> {
    let status = Command::new("ffmpeg")
        .kill_on_drop(true)
        .args(["-y", "-nostdin", "-sseof", "-0.25", "-i"])
        .arg(safe_arg_path(clip))
        .args(["-frames:v", "1", "-q:v", "2", "-update", "1"])
        .arg(safe_arg_path(frame_out))
        .status()
        .await?;
    if !status.success() {
        return Err(PipelineError::Assembly(format!(
            "last-frame extraction failed for {:?}",
            clip
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_arg_path() {
        assert_eq!(
            safe_arg_path(Path::new("-flaglike.mp4")),
            PathBuf::from("./-flaglike.mp4")
        );
        let abs = PathBuf::from("/tmp/x.mp4");
        assert_eq!(safe_arg_path(&abs), abs);
    }

    #[tokio::test]
    async fn test_verify_rejects_missing_file() {
        if !ffmpeg_available() {
            eprintln!("ffmpeg not installed; skipping");
            return;
        }
        assert!(!verify_media(Path::new("__nonexistent_clip_zyx.mp4")).await);
    }
}
