use std::process::Command;

fn main() {
    // Do NOT fail the build when ffmpeg is missing: the planner and the
    // provider adapters work without it. Only the Composer needs the binary
    // at runtime, so a build-time warning is enough.
    let ffmpeg_present = Command::new("ffmpeg")
        .arg("-version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);

    if !ffmpeg_present {
        println!(
            "cargo:warning=⚠️  ffmpeg not found on PATH.\
             \ncargo:warning=   Assembly (concat / mix / mux) will fail at runtime until it is installed."
        );
    }
}
