// ADSMITH Main Entry Point
// Copyright (c) 2026 AdSmith Collective | ADSMITH

use adsmith_core::config::{AspectRatio, Platform, ProjectConfig, Resolution, VisualStyle};
use adsmith_core::executor::CancelToken;
use adsmith_core::orchestrator::{Orchestrator, RemixOptions};
use adsmith_core::project::ProjectStatus;
use adsmith_core::providers::ProviderSet;
use adsmith_core::server::{self, ServerState};

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "adsmith-core")]
#[command(about = "ADSMITH Production Orchestrator", long_about = None)]
struct Cli {
    /// Root directory for per-project state and artifacts
    #[arg(long, default_value = "projects", global = true)]
    projects_dir: PathBuf,

    /// Use the deterministic offline provider set (no network)
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the HTTP control server
    Serve {
        #[arg(short, long, default_value = "7807")]
        port: u16,
    },

    /// Plan a new spot (stops at approval gate 1)
    Plan {
        /// Creative brief topic (e.g. "luxury watch ad")
        #[arg(short, long)]
        topic: String,

        /// Total spot duration in seconds
        #[arg(short, long, default_value = "12")]
        duration: u32,

        /// Visual style: cinematic, documentary, playful, minimal, retro
        #[arg(long, default_value = "cinematic")]
        style: String,

        /// Target platform: broadcast, youtube, instagram, tiktok
        #[arg(long, default_value = "youtube")]
        platform: String,

        /// Aspect ratio: 16:9, 9:16 or 1:1
        #[arg(long, default_value = "16:9")]
        aspect: String,

        /// Resolution: 720p or 1080p
        #[arg(long, default_value = "1080p")]
        resolution: String,

        /// Generate per-scene sound effects
        #[arg(long)]
        sfx: bool,

        /// Generate a music bed
        #[arg(long)]
        bgm: bool,
    },

    /// Plan and run every stage, approving all gates automatically
    Run {
        #[arg(short, long)]
        topic: String,

        #[arg(short, long, default_value = "12")]
        duration: u32,

        #[arg(long, default_value = "cinematic")]
        style: String,

        #[arg(long, default_value = "16:9")]
        aspect: String,

        #[arg(long)]
        sfx: bool,

        #[arg(long)]
        bgm: bool,
    },

    /// Approve the next gate for a project (one stage per call)
    Approve {
        #[arg(short, long)]
        project: String,
    },

    /// Show a project's current state
    Status {
        #[arg(short, long)]
        project: String,
    },

    /// Regenerate audio from a new lines file and re-assemble
    Remix {
        #[arg(short, long)]
        project: String,

        /// JSON file: array of script lines {speaker, text, time_range}
        #[arg(short, long)]
        lines_file: PathBuf,

        /// Override SFX inclusion for this remix
        #[arg(long)]
        sfx: Option<bool>,

        /// Override music-bed inclusion for this remix
        #[arg(long)]
        bgm: Option<bool>,
    },

    /// Reset a project back to initialized
    Reset {
        #[arg(short, long)]
        project: String,
    },
}

fn parse_enum_arg<T: serde::de::DeserializeOwned>(value: &str, what: &str) -> anyhow::Result<T> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| anyhow::anyhow!("unrecognized {}: {}", what, value))
}

#[allow(clippy::too_many_arguments)]
fn build_config(
    topic: String,
    duration: u32,
    style: &str,
    platform: &str,
    aspect: &str,
    resolution: &str,
    sfx: bool,
    bgm: bool,
) -> anyhow::Result<ProjectConfig> {
    Ok(ProjectConfig {
        topic,
        duration_seconds: duration,
        style: parse_enum_arg::<VisualStyle>(style, "style")?,
        platform: parse_enum_arg::<Platform>(platform, "platform")?,
        aspect_ratio: parse_enum_arg::<AspectRatio>(aspect, "aspect ratio")?,
        resolution: parse_enum_arg::<Resolution>(resolution, "resolution")?,
        include_sfx: sfx,
        include_bgm: bgm,
        ..Default::default()
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("--- ADSMITH PRODUCTION ORCHESTRATOR v0.1.1 ---");

    let args = Cli::parse();
    let providers = if args.offline {
        info!("Offline provider set active (deterministic, no network)");
        ProviderSet::offline(0xAD5)
    } else {
        ProviderSet::from_env()
    };
    let orchestrator = Orchestrator::new(args.projects_dir.clone(), providers);

    match args.command {
        Commands::Serve { port } => {
            let state = Arc::new(ServerState::new(orchestrator));
            server::start_server(port, state).await;
        }
        Commands::Plan {
            topic,
            duration,
            style,
            platform,
            aspect,
            resolution,
            sfx,
            bgm,
        } => {
            let config =
                build_config(topic, duration, &style, &platform, &aspect, &resolution, sfx, bgm)?;
            let state = orchestrator.plan(config).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Commands::Run {
            topic,
            duration,
            style,
            aspect,
            sfx,
            bgm,
        } => {
            let config =
                build_config(topic, duration, &style, "youtube", &aspect, "1080p", sfx, bgm)?;
            let planned = orchestrator.plan(config).await?;
            info!("Planned {}, approving all gates", planned.id);

            let state = orchestrator
                .run_images(&planned.id, CancelToken::new())
                .await?;
            anyhow::ensure!(
                state.status == ProjectStatus::ImagesComplete,
                "image stage ended at {}",
                state.status.as_str()
            );
            let state = orchestrator
                .run_videos(&planned.id, CancelToken::new())
                .await?;
            anyhow::ensure!(
                state.status == ProjectStatus::VideosComplete,
                "motion stage ended at {}",
                state.status.as_str()
            );
            let state = orchestrator.run_assembly(&planned.id).await?;
            match &state.final_video_path {
                Some(path) => println!("✅ Final video: {}", path.display()),
                None => anyhow::bail!(
                    "assembly ended at {}: {:?}",
                    state.status.as_str(),
                    state.error
                ),
            }
        }
        Commands::Approve { project } => {
            let state = orchestrator.status(&project)?;
            let state = match state.status {
                ProjectStatus::Planned => {
                    orchestrator.run_images(&project, CancelToken::new()).await?
                }
                ProjectStatus::ImagesComplete | ProjectStatus::GeneratingVideos => {
                    orchestrator.run_videos(&project, CancelToken::new()).await?
                }
                ProjectStatus::VideosComplete => orchestrator.run_assembly(&project).await?,
                other => anyhow::bail!("no gate to approve at status {}", other.as_str()),
            };
            println!("{} -> {}", project, state.status.as_str());
        }
        Commands::Status { project } => {
            let state = orchestrator.status(&project)?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Commands::Remix {
            project,
            lines_file,
            sfx,
            bgm,
        } => {
            let json = std::fs::read_to_string(&lines_file)?;
            let lines: Vec<adsmith_core::project::ScriptLine> = serde_json::from_str(&json)?;
            let options = RemixOptions {
                include_sfx: sfx,
                include_bgm: bgm,
            };
            let state = orchestrator.remix(&project, lines, options).await?;
            println!("{} -> {}", project, state.status.as_str());
        }
        Commands::Reset { project } => {
            let state = orchestrator.reset(&project)?;
            println!("{} -> {}", project, state.status.as_str());
        }
    }

    Ok(())
}
