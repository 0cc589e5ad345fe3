use std::path::PathBuf;

use serde::Deserialize;

use crate::config::env::{self, EnvKey};
use crate::modules::publish::detector::DEFAULT_BLOCK_MARKERS;

#[derive(Clone, Debug, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub from: String,
    pub to: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub publish_api_base: String,
    pub post_interval_secs: u64,
    pub output_dir: PathBuf,
    pub spool_dir: PathBuf,
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    pub target_width: u32,
    pub target_height: u32,
    pub target_fps: u32,
    pub video_crf: u8,
    pub audio_bitrate: String,
    pub max_upload_attempts: u32,
    pub block_markers: Vec<String>,
    pub smtp: Option<SmtpConfig>,
    pub default_caption: String,
}

impl AppConfig {
    pub fn new() -> Self {
        let output_dir = PathBuf::from(env::get_or(EnvKey::OutputDir, "outputs"));
        let spool_dir = env::get_opt(EnvKey::SpoolDir)
            .map(PathBuf::from)
            .unwrap_or_else(|| output_dir.join("spool"));

        let block_markers = env::get_opt(EnvKey::BlockMarkers)
            .map(|raw| parse_markers(&raw))
            .filter(|markers| !markers.is_empty())
            .unwrap_or_else(default_markers);

        Self {
            username: env::get_opt(EnvKey::Username),
            password: env::get_opt(EnvKey::Password),
            publish_api_base: env::get_or(EnvKey::PublishApiBase, "http://localhost:3000"),
            post_interval_secs: env::get_parsed(EnvKey::PostInterval, 3600),
            output_dir,
            spool_dir,
            ffmpeg_bin: PathBuf::from(env::get_or(EnvKey::FfmpegBin, "ffmpeg")),
            ffprobe_bin: PathBuf::from(env::get_or(EnvKey::FfprobeBin, "ffprobe")),
            target_width: env::get_parsed(EnvKey::TargetWidth, 1080),
            target_height: env::get_parsed(EnvKey::TargetHeight, 1080),
            target_fps: env::get_parsed(EnvKey::TargetFps, 30),
            video_crf: env::get_parsed(EnvKey::VideoCrf, 23),
            audio_bitrate: env::get_or(EnvKey::AudioBitrate, "128k"),
            max_upload_attempts: env::get_parsed(EnvKey::MaxUploadAttempts, 4).max(1),
            block_markers,
            smtp: smtp_from_env(),
            default_caption: env::get_or(
                EnvKey::DefaultCaption,
                "#programming #devhumor #coding",
            ),
        }
    }

    /// Credentials for the remote account; only the publishing commands need them.
    pub fn credentials(&self) -> anyhow::Result<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) => Ok((user, pass)),
            _ => Err(anyhow::anyhow!(
                "Missing credentials: set {} and {}",
                EnvKey::Username.as_str(),
                EnvKey::Password.as_str()
            )),
        }
    }

    /// Path of the append-only block record file.
    pub fn block_debug_path(&self) -> PathBuf {
        self.output_dir.join("publish_block_debug.txt")
    }
}

/// The alert channel only exists when every SMTP setting is present.
fn smtp_from_env() -> Option<SmtpConfig> {
    Some(SmtpConfig {
        host: env::get_opt(EnvKey::SmtpHost)?,
        port: env::get_parsed(EnvKey::SmtpPort, 587),
        user: env::get_opt(EnvKey::SmtpUser)?,
        pass: env::get_opt(EnvKey::SmtpPass)?,
        from: env::get_opt(EnvKey::AlertEmailFrom)?,
        to: env::get_opt(EnvKey::AlertEmailTo)?,
    })
}

fn default_markers() -> Vec<String> {
    DEFAULT_BLOCK_MARKERS.iter().map(|m| m.to_string()).collect()
}

pub fn parse_markers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty())
        .collect()
}
