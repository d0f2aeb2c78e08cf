use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use generation::{GenerationClient, HttpGenerationClient, MockGenerationClient};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storyboard::{Scene, ScreenplayParser};
use studio::{JobKey, JobStatus, Studio, StudioConfig};
use timeline::Track;
use tracing::{info, warn};

const API_KEY_ENV: &str = "SCRIPTBOARD_API_KEY";

#[derive(Parser)]
#[command(name = "scriptboard")]
#[command(about = "Scriptboard CLI - Scripts to scenes, shots and a timeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Studio configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a script and print its scenes
    Parse {
        /// Script file (JSON screenplay or plain text)
        script: PathBuf,
    },

    /// Parse a script and lay every scene out on the default video track
    Assemble {
        /// Script file
        script: PathBuf,

        /// Also write the resulting tracks to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate the still image (and optionally the video) for one scene
    Generate {
        /// Script file
        script: PathBuf,

        /// Scene ordinal, starting at 1
        #[arg(short, long)]
        scene: u32,

        /// Animate the generated still into a video clip
        #[arg(long)]
        video: bool,

        /// Use the in-memory generation service instead of the remote API
        #[arg(long)]
        mock: bool,

        /// Download the final artifact to this path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write the default configuration to a file
    InitConfig {
        /// Output file path
        output: PathBuf,
    },
}

#[derive(Serialize)]
struct Assembly<'a> {
    scenes: &'a [Scene],
    tracks: &'a [Track],
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Parse { script } => parse_command(config, script).await,
        Commands::Assemble { script, output } => assemble_command(config, script, output).await,
        Commands::Generate {
            script,
            scene,
            video,
            mock,
            output,
        } => generate_command(config, script, scene, video, mock, output).await,
        Commands::InitConfig { output } => init_config_command(config, output),
    }
}

fn load_config(path: Option<&Path>) -> Result<StudioConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            StudioConfig::load(path).with_context(|| format!("loading {}", path.display()))
        }
        None => Ok(StudioConfig::default()),
    }
}

fn build_studio(config: StudioConfig, mock: bool) -> Result<Studio> {
    let client: Arc<dyn GenerationClient> = if mock {
        Arc::new(MockGenerationClient::new())
    } else {
        let mut generation = config.generation.clone();
        if generation.api_key.is_none() {
            generation.api_key = std::env::var(API_KEY_ENV).ok();
        }
        Arc::new(HttpGenerationClient::new(generation).with_context(|| {
            format!("set generation.api_key in the config or {API_KEY_ENV}, or pass --mock")
        })?)
    };
    Ok(Studio::new(config, client, Arc::new(ScreenplayParser))?)
}

async fn read_and_parse(studio: &Studio, script: &Path) -> Result<Vec<Scene>> {
    let raw = std::fs::read_to_string(script)
        .with_context(|| format!("reading script {}", script.display()))?;
    let scenes = studio.request_parse(&raw).await?;
    info!("Parsed {} scenes from {:?}", scenes.len(), script);
    Ok(scenes)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn parse_command(config: StudioConfig, script: PathBuf) -> Result<()> {
    let studio = build_studio(config, true)?;
    let scenes = read_and_parse(&studio, &script).await?;
    print_json(&scenes)
}

async fn assemble_command(
    config: StudioConfig,
    script: PathBuf,
    output: Option<PathBuf>,
) -> Result<()> {
    let studio = build_studio(config, true)?;
    let scenes = read_and_parse(&studio, &script).await?;

    for scene in &scenes {
        let clip = studio.add_scene_to_timeline(scene.id)?;
        info!(
            "Placed '{}' at {:.2}s for {:.2}s",
            clip.name, clip.start, clip.duration
        );
    }

    let tracks = studio.tracks();
    let assembly = Assembly {
        scenes: &scenes,
        tracks: &tracks,
    };
    if let Some(path) = output {
        std::fs::write(&path, serde_json::to_string_pretty(&assembly)?)?;
        info!("Timeline written to {:?}", path);
    }
    print_json(&assembly)
}

async fn generate_command(
    config: StudioConfig,
    script: PathBuf,
    ordinal: u32,
    video: bool,
    mock: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let studio = build_studio(config, mock)?;
    let scenes = read_and_parse(&studio, &script).await?;
    let Some(scene) = scenes.iter().find(|s| s.ordinal == ordinal) else {
        bail!("script has no scene {} ({} scenes)", ordinal, scenes.len());
    };

    info!(
        "Generating image for scene {}: {}",
        scene.ordinal, scene.slugline
    );
    studio.request_image_generation(scene.id)?;
    let mut key = JobKey::image(scene.id);
    let mut snapshot = studio.wait_for_job(key).await;

    if video && snapshot.status == JobStatus::Succeeded {
        info!("Animating scene {}", scene.ordinal);
        studio.request_video_generation(scene.id)?;
        key = JobKey::video(scene.id);
        snapshot = studio.wait_for_job(key).await;
    }

    if let Some(job) = studio.job(key.scene_id, key.kind) {
        print_json(&job)?;
    }
    if snapshot.status != JobStatus::Succeeded {
        warn!("Generation failed: {}", snapshot.message);
        bail!("{} generation failed: {}", key.kind, snapshot.message);
    }

    if let Some(path) = output {
        let bytes = studio.fetch_artifact(scene.id, key.kind).await?;
        std::fs::write(&path, &bytes)?;
        info!("Saved {} ({} bytes) to {:?}", key.kind, bytes.len(), path);
    }
    Ok(())
}

fn init_config_command(config: StudioConfig, output: PathBuf) -> Result<()> {
    config.save(&output)?;
    info!("Configuration written to {:?}", output);
    Ok(())
}
