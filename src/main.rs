use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::settings::AppConfig;
use crate::modules::media::model::{MediaAsset, TranscodeRequest};
use crate::modules::publish::orchestrator::PublishOutcome;

mod app;
mod common;
mod config;
mod infrastructure;
mod modules;
mod state;
mod workers;

#[derive(Parser, Debug)]
#[command(
    name = "reelguard",
    version,
    about = "Spooled media publisher with a platform-block kill switch"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish one spooled asset per interval until stopped or blocked
    Run,
    /// Publish a single asset and exit
    Publish {
        path: PathBuf,
        /// Caption text; defaults to the `<stem>.txt` sidecar or DEFAULT_CAPTION
        #[arg(long)]
        caption: Option<String>,
    },
    /// Print the probe report of a media file as JSON
    Inspect { path: PathBuf },
    /// Transcode a video into the publish-compatible profile
    Normalize {
        path: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            error!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<ExitCode> {
    let config = AppConfig::new();

    match command {
        Command::Run => {
            info!("Starting publisher...");
            let state = app::create_state(config).await?;
            workers::publisher::start_publisher_worker(state).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Publish { path, caption } => {
            let caption = match caption {
                Some(caption) => caption,
                None => workers::publisher::caption_for(&path, &config.default_caption).await,
            };
            let state = app::create_state(config).await?;

            match state.publisher.publish(&path, &caption).await {
                Ok(PublishOutcome::Succeeded { media_id, attempts }) => {
                    info!(
                        "✅ Published {} as {} after {} attempt(s)",
                        path.display(),
                        media_id.0,
                        attempts
                    );
                    Ok(ExitCode::SUCCESS)
                }
                Ok(PublishOutcome::Exhausted { attempts, .. }) => {
                    error!("Giving up on {} after {} attempt(s)", path.display(), attempts);
                    Ok(ExitCode::from(1))
                }
                Err(halt) => {
                    error!("❌ {}", halt);
                    Ok(ExitCode::from(2))
                }
            }
        }
        Command::Inspect { path } => {
            let asset = MediaAsset::from_path(&path).await?;
            let Some(probe) = app::inspector(&config).inspect(&path).await else {
                return Ok(ExitCode::FAILURE);
            };
            let report = serde_json::json!({ "asset": asset, "probe": probe });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Normalize { path, output } => {
            let mut request = TranscodeRequest::for_profile(&path, &app::video_profile(&config));
            if let Some(output) = output {
                request = request.output(output);
            }

            let result = app::transcoder(&config).normalize(&request).await;
            println!("{}", result.display());
            if result == path {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}
