use std::env;
use std::str::FromStr;

pub enum EnvKey {
    Username,
    Password,
    PublishApiBase,
    PostInterval,
    OutputDir,
    SpoolDir,
    FfmpegBin,
    FfprobeBin,
    TargetWidth,
    TargetHeight,
    TargetFps,
    VideoCrf,
    AudioBitrate,
    MaxUploadAttempts,
    BlockMarkers,
    SmtpHost,
    SmtpPort,
    SmtpUser,
    SmtpPass,
    AlertEmailFrom,
    AlertEmailTo,
    DefaultCaption,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::Username => "IG_USERNAME",
            EnvKey::Password => "IG_PASSWORD",
            EnvKey::PublishApiBase => "PUBLISH_API_BASE",
            EnvKey::PostInterval => "POST_INTERVAL_SECONDS",
            EnvKey::OutputDir => "OUTPUT_DIR",
            EnvKey::SpoolDir => "SPOOL_DIR",
            EnvKey::FfmpegBin => "FFMPEG_BIN",
            EnvKey::FfprobeBin => "FFPROBE_BIN",
            EnvKey::TargetWidth => "TARGET_WIDTH",
            EnvKey::TargetHeight => "TARGET_HEIGHT",
            EnvKey::TargetFps => "TARGET_FPS",
            EnvKey::VideoCrf => "VIDEO_CRF",
            EnvKey::AudioBitrate => "AUDIO_BITRATE",
            EnvKey::MaxUploadAttempts => "MAX_UPLOAD_ATTEMPTS",
            EnvKey::BlockMarkers => "BLOCK_MARKERS",
            EnvKey::SmtpHost => "SMTP_HOST",
            EnvKey::SmtpPort => "SMTP_PORT",
            EnvKey::SmtpUser => "SMTP_USER",
            EnvKey::SmtpPass => "SMTP_PASS",
            EnvKey::AlertEmailFrom => "ALERT_EMAIL_FROM",
            EnvKey::AlertEmailTo => "ALERT_EMAIL_TO",
            EnvKey::DefaultCaption => "DEFAULT_CAPTION",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

/// Like [`get`], but treats empty values as unset.
pub fn get_opt(key: EnvKey) -> Option<String> {
    env::var(key.as_str()).ok().filter(|v| !v.trim().is_empty())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> T {
    match get(key) {
        Ok(val) => val.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
