use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{info, warn};

use crate::config::settings::AppConfig;
use crate::infrastructure::alert::AlertChannel;
use crate::infrastructure::alert::smtp::SmtpAlertChannel;
use crate::infrastructure::client::http::HttpPublishClient;
use crate::modules::media::inspector::MediaInspector;
use crate::modules::media::model::VideoProfile;
use crate::modules::media::transcoder::Transcoder;
use crate::modules::publish::client::PublishClient;
use crate::modules::publish::detector::BlockDetector;
use crate::modules::publish::orchestrator::{Publisher, RetryPolicy};
use crate::modules::publish::safety::{SafetyLatch, SafetyTrip};
use crate::state::AppState;

const LOGIN_ATTEMPTS: u32 = 3;

pub fn inspector(config: &AppConfig) -> MediaInspector {
    MediaInspector::new(&config.ffprobe_bin)
}

pub fn transcoder(config: &AppConfig) -> Transcoder {
    Transcoder::new(&config.ffmpeg_bin, inspector(config))
}

pub fn video_profile(config: &AppConfig) -> VideoProfile {
    VideoProfile {
        width: config.target_width,
        height: config.target_height,
        fps: config.target_fps,
        crf: config.video_crf,
        audio_bitrate: config.audio_bitrate.clone(),
    }
}

/// Builds the alert channel when SMTP is fully configured. A broken
/// configuration is logged and treated as absent.
fn alert_channel(config: &AppConfig) -> Option<Arc<dyn AlertChannel>> {
    let smtp = config.smtp.as_ref()?;
    match SmtpAlertChannel::new(smtp) {
        Ok(channel) => Some(Arc::new(channel)),
        Err(e) => {
            warn!("Alert channel disabled: {}", e);
            None
        }
    }
}

/// Logs in, retrying with 5s, 10s waits between attempts.
pub async fn login(client: &dyn PublishClient, username: &str, password: &str) -> Result<()> {
    let mut last_err = None;
    for attempt in 0..LOGIN_ATTEMPTS {
        match client.authenticate(username, password).await {
            Ok(session) => {
                info!("Session established for {}", session.username);
                return Ok(());
            }
            Err(e) => {
                warn!("Login attempt {} failed: {}", attempt + 1, e);
                last_err = Some(e);
            }
        }
        if attempt + 1 < LOGIN_ATTEMPTS {
            tokio::time::sleep(Duration::from_secs(5 * 2u64.pow(attempt))).await;
        }
    }
    Err(anyhow!(
        "Could not login: {}",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    ))
}

pub fn publisher(
    config: &AppConfig,
    client: Arc<dyn PublishClient>,
    latch: Arc<SafetyLatch>,
    account: &str,
) -> Publisher {
    let safety = SafetyTrip::new(latch, config.block_debug_path())
        .with_alert(alert_channel(config))
        .with_account(account);

    let detector = BlockDetector::new(&config.block_markers);
    info!("Block markers: {:?}", detector.markers());

    Publisher::new(client, transcoder(config), safety)
        .with_detector(detector)
        .with_policy(RetryPolicy::with_max_attempts(config.max_upload_attempts))
        .with_profile(video_profile(config))
}

pub async fn create_state(config: AppConfig) -> Result<AppState> {
    let (username, password) = config.credentials()?;
    let username = username.to_string();

    let client = Arc::new(HttpPublishClient::new(&config.publish_api_base)?);
    login(client.as_ref(), &username, password).await?;

    let latch = Arc::new(SafetyLatch::new());
    let publisher = publisher(&config, client, latch, &username);

    info!(
        "Publisher ready: account={} max_attempts={} alerts={}",
        username,
        config.max_upload_attempts,
        config.smtp.is_some()
    );
    Ok(AppState::new(config, publisher))
}
