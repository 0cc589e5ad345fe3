use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use super::client::{MediaId, PublishClient};
use super::detector::{BODY_SCAN_LIMIT, BlockDetector};
use super::safety::SafetyTrip;
use crate::common::error::{Halt, RemoteFailure};
use crate::common::process::truncate;
use crate::modules::media::model::{
    MediaKind, PublishRoute, TranscodeRequest, VideoProfile, transcode_target,
};
use crate::modules::media::transcoder::Transcoder;

/// Bounded exponential backoff between upload attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base: Duration::from_secs(5),
            cap: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Wait after failed attempt number `attempt` (1-based): `base * 2^attempt`,
    /// capped. The first retry therefore waits 10s with the defaults.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap))
    }
}

#[derive(Debug, Clone)]
pub enum PublishOutcome {
    Succeeded { media_id: MediaId, attempts: u32 },
    /// Every attempt failed without an enforcement signal.
    Exhausted {
        attempts: u32,
        last_failure: Option<RemoteFailure>,
    },
}

impl PublishOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PublishOutcome::Succeeded { .. })
    }
}

/// Drives one asset through transcode, upload, and retry.
pub struct Publisher {
    client: Arc<dyn PublishClient>,
    transcoder: Transcoder,
    detector: BlockDetector,
    safety: SafetyTrip,
    policy: RetryPolicy,
    profile: VideoProfile,
}

impl Publisher {
    pub fn new(client: Arc<dyn PublishClient>, transcoder: Transcoder, safety: SafetyTrip) -> Self {
        Self {
            client,
            transcoder,
            detector: BlockDetector::default(),
            safety,
            policy: RetryPolicy::default(),
            profile: VideoProfile::default(),
        }
    }

    pub fn with_detector(mut self, detector: BlockDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_profile(mut self, profile: VideoProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn is_halted(&self) -> bool {
        self.safety.latch().is_tripped()
    }

    /// Publishes `asset` with `caption`.
    ///
    /// Returns `Ok` for success or for exhausted retries. `Err(Halt)` means
    /// an enforcement signal was seen (now or earlier in the process) and no
    /// further publishing may happen.
    pub async fn publish(&self, asset: &Path, caption: &str) -> Result<PublishOutcome, Halt> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_failure = None;

        for attempt in 1..=max_attempts {
            if let Some(halt) = self.safety.latch().halt() {
                warn!("Safety latch is set; refusing to publish {}", asset.display());
                return Err(halt);
            }

            let upload_path = self.prepare(asset).await;
            info!("⬆️ Uploading {} (attempt {})", upload_path.display(), attempt);

            let result = match PublishRoute::for_path(&upload_path) {
                PublishRoute::Video => self.client.publish_video(&upload_path, caption).await,
                PublishRoute::Image => self.client.publish_image(&upload_path, caption).await,
            };

            match result {
                Ok(media_id) => {
                    info!("✅ Upload succeeded: {:?}", media_id);
                    remove_transcoded(&upload_path, asset).await;
                    return Ok(PublishOutcome::Succeeded {
                        media_id,
                        attempts: attempt,
                    });
                }
                Err(failure) => {
                    let verdict = self.detector.classify(&failure);
                    if verdict.is_block() {
                        error!(
                            "Enforcement signal ({:?}) in upload failure on attempt {}",
                            verdict, attempt
                        );
                        return Err(self.safety.trip(&block_payload(&failure)).await);
                    }

                    warn!("Upload attempt {} failed: {}", attempt, failure);
                    last_failure = Some(failure);

                    if attempt < max_attempts {
                        let wait = self.policy.delay_after(attempt);
                        info!("Backing off {} seconds", wait.as_secs());
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        error!(
            "All {} upload attempts failed for {}: {}",
            max_attempts,
            asset.display(),
            last_failure
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default()
        );
        Ok(PublishOutcome::Exhausted {
            attempts: max_attempts,
            last_failure,
        })
    }

    async fn prepare(&self, asset: &Path) -> PathBuf {
        match MediaKind::from_path(asset) {
            MediaKind::Video => {
                let req = TranscodeRequest::for_profile(asset, &self.profile)
                    .output(transcode_target(asset));
                self.transcoder.normalize(&req).await
            }
            MediaKind::Image => asset.to_path_buf(),
        }
    }
}

/// Text recorded when a failure trips the safety latch.
fn block_payload(failure: &RemoteFailure) -> String {
    match &failure.response {
        Some(resp) => format!(
            "{} (status={}, body={})",
            failure.message,
            resp.status,
            truncate(&resp.body, BODY_SCAN_LIMIT)
        ),
        None => failure.message.clone(),
    }
}

async fn remove_transcoded(upload_path: &Path, asset: &Path) {
    if upload_path == asset {
        return;
    }
    if let Err(e) = tokio::fs::remove_file(upload_path).await {
        warn!(
            "Failed to remove transcoded file {}: {}",
            upload_path.display(),
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::common::error::AuthError;
    use crate::modules::media::inspector::MediaInspector;
    use crate::modules::publish::client::Session;
    use crate::modules::publish::safety::SafetyLatch;
    use crate::modules::publish::safety::tests::RecordingAlert;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Image(PathBuf),
        Video(PathBuf),
    }

    /// Replays scripted results; succeeds once the script runs out.
    #[derive(Default)]
    struct ScriptedClient {
        script: Mutex<VecDeque<Result<(), RemoteFailure>>>,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<(), RemoteFailure>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::default(),
            })
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn next(&self, call: Call) -> Result<MediaId, RemoteFailure> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(call);
                calls.len()
            };
            match self.script.lock().unwrap().pop_front() {
                Some(Err(failure)) => Err(failure),
                _ => Ok(MediaId(format!("media-{n}"))),
            }
        }
    }

    #[async_trait]
    impl PublishClient for ScriptedClient {
        async fn authenticate(
            &self,
            username: &str,
            _password: &str,
        ) -> Result<Session, AuthError> {
            Ok(Session {
                username: username.to_string(),
            })
        }

        async fn publish_image(
            &self,
            path: &Path,
            _caption: &str,
        ) -> Result<MediaId, RemoteFailure> {
            self.next(Call::Image(path.to_path_buf()))
        }

        async fn publish_video(
            &self,
            path: &Path,
            _caption: &str,
        ) -> Result<MediaId, RemoteFailure> {
            self.next(Call::Video(path.to_path_buf()))
        }
    }

    struct Harness {
        publisher: Publisher,
        client: Arc<ScriptedClient>,
        alert: Arc<RecordingAlert>,
        latch: Arc<SafetyLatch>,
        debug_path: PathBuf,
        _dir: tempfile::TempDir,
    }

    fn harness(script: Vec<Result<(), RemoteFailure>>, ffmpeg: &Path) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let debug_path = dir.path().join("block_debug.txt");
        let client = ScriptedClient::new(script);
        let alert = Arc::new(RecordingAlert::default());
        let latch = Arc::new(SafetyLatch::new());
        let safety = SafetyTrip::new(latch.clone(), &debug_path)
            .with_alert(Some(alert.clone()))
            .with_account("codechugger");
        let transcoder = Transcoder::new(ffmpeg, MediaInspector::new("/no/such/ffprobe"));
        let publisher = Publisher::new(client.clone(), transcoder, safety);

        Harness {
            publisher,
            client,
            alert,
            latch,
            debug_path,
            _dir: dir,
        }
    }

    fn timeout_error() -> Result<(), RemoteFailure> {
        Err(RemoteFailure::new("operation timed out"))
    }

    fn debug_lines(path: &Path) -> usize {
        std::fs::read_to_string(path)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    #[test]
    fn backoff_doubles_from_ten_seconds_and_caps() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=7).map(|a| policy.delay_after(a).as_secs()).collect();
        assert_eq!(delays, [10, 20, 40, 80, 160, 300, 300]);
        assert_eq!(policy.delay_after(64), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_attempt_does_not_wait() {
        let h = harness(vec![], Path::new("/no/such/ffmpeg"));
        let started = Instant::now();

        let outcome = h.publisher.publish(Path::new("joke.jpg"), "caption").await.unwrap();

        assert!(matches!(outcome, PublishOutcome::Succeeded { attempts: 1, .. }));
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(h.client.calls(), [Call::Image(PathBuf::from("joke.jpg"))]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_then_succeed() {
        let h = harness(
            vec![timeout_error(), timeout_error(), timeout_error()],
            Path::new("/no/such/ffmpeg"),
        );
        let started = Instant::now();

        let outcome = h.publisher.publish(Path::new("joke.jpg"), "caption").await.unwrap();

        assert!(matches!(outcome, PublishOutcome::Succeeded { attempts: 4, .. }));
        // 10s + 20s + 40s before the fourth call.
        assert_eq!(started.elapsed(), Duration::from_secs(70));
        assert_eq!(h.client.calls().len(), 4);
        assert!(!h.latch.is_tripped());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_report_failure_without_trailing_wait() {
        let h = harness(vec![timeout_error(); 4], Path::new("/no/such/ffmpeg"));
        let started = Instant::now();

        let outcome = h.publisher.publish(Path::new("joke.jpg"), "caption").await.unwrap();

        match outcome {
            PublishOutcome::Exhausted {
                attempts,
                last_failure,
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(last_failure.unwrap().message, "operation timed out");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(started.elapsed(), Duration::from_secs(70));
        assert_eq!(h.client.calls().len(), 4);
        assert_eq!(h.alert.count(), 0);
        assert_eq!(debug_lines(&h.debug_path), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_policy_never_sleeps() {
        let h = harness(vec![timeout_error()], Path::new("/no/such/ffmpeg"));
        let publisher = h.publisher.with_policy(RetryPolicy::with_max_attempts(1));
        let started = Instant::now();

        let outcome = publisher.publish(Path::new("joke.jpg"), "caption").await.unwrap();

        assert!(!outcome.is_success());
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn block_in_response_body_trips_immediately() {
        let h = harness(
            vec![Err(RemoteFailure::new("upload rejected")
                .with_response(400, r#"{"message":"challenge_required"}"#))],
            Path::new("/no/such/ffmpeg"),
        );
        let started = Instant::now();

        let halt = h
            .publisher
            .publish(Path::new("joke.jpg"), "caption")
            .await
            .unwrap_err();

        assert!(halt.reason.contains("challenge_required"));
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(h.client.calls().len(), 1);
        assert_eq!(debug_lines(&h.debug_path), 1);
        assert_eq!(h.alert.count(), 1);
        assert!(h.publisher.is_halted());
    }

    #[tokio::test(start_paused = true)]
    async fn block_on_later_attempt_stops_remaining_attempts() {
        let h = harness(
            vec![
                timeout_error(),
                Err(RemoteFailure::new("feedback_required: try again later")),
            ],
            Path::new("/no/such/ffmpeg"),
        );

        let halt = h
            .publisher
            .publish(Path::new("joke.jpg"), "caption")
            .await
            .unwrap_err();

        assert_eq!(halt.reason, "feedback_required: try again later");
        assert_eq!(h.client.calls().len(), 2);
        assert_eq!(debug_lines(&h.debug_path), 1);
        assert_eq!(h.alert.count(), 1);
    }

    #[tokio::test]
    async fn tripped_latch_short_circuits_every_later_publish() {
        let h = harness(
            vec![Err(RemoteFailure::new("Please wait a few minutes"))],
            Path::new("/no/such/ffmpeg"),
        );
        h.publisher
            .publish(Path::new("first.jpg"), "caption")
            .await
            .unwrap_err();

        let halt = h
            .publisher
            .publish(Path::new("second.jpg"), "caption")
            .await
            .unwrap_err();

        assert_eq!(halt.reason, "Please wait a few minutes");
        assert_eq!(h.client.calls(), [Call::Image(PathBuf::from("first.jpg"))]);
        assert_eq!(debug_lines(&h.debug_path), 1);
        assert_eq!(h.alert.count(), 1);
    }

    #[tokio::test]
    async fn video_without_encoder_is_published_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let asset = dir.path().join("joke.mp4");
        std::fs::write(&asset, b"raw").unwrap();
        let h = harness(vec![], Path::new("/no/such/ffmpeg"));

        let outcome = h.publisher.publish(&asset, "caption").await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(h.client.calls(), [Call::Video(asset.clone())]);
        assert!(asset.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn transcoded_video_is_uploaded_then_removed() {
        use crate::common::testing::write_script;

        let dir = tempfile::tempdir().unwrap();
        let asset = dir.path().join("joke.mov");
        std::fs::write(&asset, b"raw").unwrap();
        let ffmpeg = write_script(
            dir.path(),
            "ffmpeg",
            "for last; do :; done\nprintf encoded > \"$last\"",
        );
        let h = harness(vec![], &ffmpeg);

        let outcome = h.publisher.publish(&asset, "caption").await.unwrap();

        let transcoded = dir.path().join("joke.ig.mp4");
        assert!(outcome.is_success());
        assert_eq!(h.client.calls(), [Call::Video(transcoded.clone())]);
        assert!(!transcoded.exists());
        assert!(asset.exists());
    }

    #[test]
    fn block_payload_includes_bounded_body() {
        let failure = RemoteFailure::new("bad request")
            .with_response(400, "x".repeat(BODY_SCAN_LIMIT + 100));
        let payload = block_payload(&failure);

        assert!(payload.starts_with("bad request (status=400, body="));
        assert!(payload.len() < BODY_SCAN_LIMIT + 64);
    }
}
