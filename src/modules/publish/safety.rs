use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::common::error::{AlertError, Halt};
use crate::infrastructure::alert::AlertChannel;

pub const ALERT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub at: OffsetDateTime,
    pub payload: String,
}

impl BlockRecord {
    pub fn now(payload: impl Into<String>) -> Self {
        Self {
            at: OffsetDateTime::now_utc(),
            payload: payload.into(),
        }
    }

    pub fn timestamp(&self) -> String {
        self.at
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.at.unix_timestamp().to_string())
    }

    /// One line of the debug file; embedded line breaks are escaped.
    pub fn line(&self) -> String {
        let payload = self.payload.replace('\r', "\\r").replace('\n', "\\n");
        format!("[{}] BLOCK DETECTED: {}\n", self.timestamp(), payload)
    }
}

/// Process-wide, write-once halt flag. Cleared only by restarting the process.
#[derive(Debug, Default)]
pub struct SafetyLatch {
    record: OnceLock<BlockRecord>,
}

impl SafetyLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_tripped(&self) -> bool {
        self.record.get().is_some()
    }

    pub fn record(&self) -> Option<&BlockRecord> {
        self.record.get()
    }

    /// The halt every caller sees once the latch is set.
    pub fn halt(&self) -> Option<Halt> {
        self.record.get().map(|r| Halt {
            reason: r.payload.clone(),
        })
    }

    /// Returns `true` only for the call that actually set the latch.
    fn set(&self, record: BlockRecord) -> bool {
        self.record.set(record).is_ok()
    }
}

/// Stops all publishing after a platform enforcement signal: records the
/// event, sends at most one alert, and sets the latch.
pub struct SafetyTrip {
    latch: Arc<SafetyLatch>,
    debug_path: PathBuf,
    alert: Option<Arc<dyn AlertChannel>>,
    account: String,
    alert_timeout: Duration,
}

impl SafetyTrip {
    pub fn new(latch: Arc<SafetyLatch>, debug_path: impl Into<PathBuf>) -> Self {
        Self {
            latch,
            debug_path: debug_path.into(),
            alert: None,
            account: String::new(),
            alert_timeout: ALERT_TIMEOUT,
        }
    }

    pub fn with_alert(mut self, alert: Option<Arc<dyn AlertChannel>>) -> Self {
        self.alert = alert;
        self
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }

    pub fn with_alert_timeout(mut self, limit: Duration) -> Self {
        self.alert_timeout = limit;
        self
    }

    pub fn latch(&self) -> &Arc<SafetyLatch> {
        &self.latch
    }

    /// Trips the latch and returns the halt the caller must propagate.
    ///
    /// Only the first call writes the debug record and dispatches the alert;
    /// later calls return the halt of the original trip.
    pub async fn trip(&self, reason: &str) -> Halt {
        let record = BlockRecord::now(reason);
        if !self.latch.set(record.clone()) {
            return self.latch.halt().unwrap_or_else(|| Halt {
                reason: reason.to_string(),
            });
        }

        if let Err(e) = self.append_record(&record).await {
            error!(
                "Failed to write block record to {}: {}",
                self.debug_path.display(),
                e
            );
        }

        self.notify(&record).await;

        error!(
            "🛑 Detected platform block; stopping publisher. See {}",
            self.debug_path.display()
        );
        Halt {
            reason: record.payload,
        }
    }

    async fn append_record(&self, record: &BlockRecord) -> std::io::Result<()> {
        if let Some(dir) = self.debug_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.debug_path)
            .await?;
        file.write_all(record.line().as_bytes()).await?;
        file.flush().await
    }

    async fn notify(&self, record: &BlockRecord) {
        let Some(alert) = &self.alert else {
            info!("Alert channel not configured; skipping block alert");
            return;
        };

        let subject = format!("Publishing blocked for account {}", self.account);
        let body = format!(
            "Block detected at {}. Failure: {}\n\nCheck {} for details.",
            record.timestamp(),
            record.payload,
            self.debug_path.display()
        );

        match send_bounded(alert.as_ref(), &subject, &body, self.alert_timeout).await {
            Ok(()) => info!("📧 Sent block alert for account {}", self.account),
            Err(e) => warn!("Failed to send block alert: {}", e),
        }
    }
}

async fn send_bounded(
    alert: &dyn AlertChannel,
    subject: &str,
    body: &str,
    limit: Duration,
) -> Result<(), AlertError> {
    timeout(limit, alert.send(subject, body))
        .await
        .unwrap_or(Err(AlertError::Timeout(limit)))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::common::error::AlertError;

    /// Records every alert; optionally fails or never completes.
    #[derive(Default)]
    pub(crate) struct RecordingAlert {
        pub sent: Mutex<Vec<(String, String)>>,
        pub fail: bool,
        pub hang: bool,
    }

    impl RecordingAlert {
        pub fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl AlertChannel for RecordingAlert {
        async fn send(&self, subject: &str, body: &str) -> Result<(), AlertError> {
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), body.to_string()));
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail {
                return Err(AlertError::Delivery("connection refused".to_string()));
            }
            Ok(())
        }
    }

    fn lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn record_line_format() {
        let record = BlockRecord {
            at: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
            payload: "feedback_required".to_string(),
        };
        assert_eq!(
            record.line(),
            "[2023-11-14T22:13:20Z] BLOCK DETECTED: feedback_required\n"
        );

        let multiline = BlockRecord {
            payload: "status=400\nbody={}".to_string(),
            ..record
        };
        assert_eq!(multiline.line().lines().count(), 1);
        assert!(multiline.line().contains("status=400\\nbody={}"));
    }

    #[test]
    fn latch_starts_clear_and_sets_once() {
        let latch = SafetyLatch::new();
        assert!(!latch.is_tripped());
        assert!(latch.halt().is_none());

        assert!(latch.set(BlockRecord::now("first")));
        assert!(!latch.set(BlockRecord::now("second")));
        assert!(latch.is_tripped());
        assert_eq!(latch.record().unwrap().payload, "first");
    }

    #[tokio::test]
    async fn trip_records_alerts_and_latches_once() {
        let dir = tempfile::tempdir().unwrap();
        let debug = dir.path().join("nested").join("block_debug.txt");
        let alert = Arc::new(RecordingAlert::default());
        let latch = Arc::new(SafetyLatch::new());
        let trip = SafetyTrip::new(latch.clone(), &debug)
            .with_alert(Some(alert.clone()))
            .with_account("codechugger");

        let halt = trip.trip("challenge_required").await;
        assert_eq!(halt.reason, "challenge_required");
        assert!(latch.is_tripped());

        let again = trip.trip("feedback_required").await;
        assert_eq!(again.reason, "challenge_required");

        let written = lines(&debug);
        assert_eq!(written.len(), 1);
        assert!(written[0].starts_with('['));
        assert!(written[0].ends_with("] BLOCK DETECTED: challenge_required"));

        assert_eq!(alert.count(), 1);
        let (subject, body) = alert.sent.lock().unwrap()[0].clone();
        assert_eq!(subject, "Publishing blocked for account codechugger");
        assert!(body.contains("challenge_required"));
    }

    #[tokio::test]
    async fn trip_without_alert_channel_still_halts() {
        let dir = tempfile::tempdir().unwrap();
        let debug = dir.path().join("block_debug.txt");
        let latch = Arc::new(SafetyLatch::new());

        SafetyTrip::new(latch.clone(), &debug).trip("restricted").await;

        assert!(latch.is_tripped());
        assert_eq!(lines(&debug).len(), 1);
    }

    #[tokio::test]
    async fn unwritable_debug_file_does_not_prevent_trip() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending.
        let latch = Arc::new(SafetyLatch::new());
        let alert = Arc::new(RecordingAlert::default());

        SafetyTrip::new(latch.clone(), dir.path())
            .with_alert(Some(alert.clone()))
            .trip("please wait")
            .await;

        assert!(latch.is_tripped());
        assert_eq!(alert.count(), 1);
    }

    #[tokio::test]
    async fn failing_or_hanging_alert_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        for (fail, hang) in [(true, false), (false, true)] {
            let latch = Arc::new(SafetyLatch::new());
            let alert = Arc::new(RecordingAlert {
                fail,
                hang,
                ..Default::default()
            });

            let halt = SafetyTrip::new(latch.clone(), dir.path().join("debug.txt"))
                .with_alert(Some(alert.clone()))
                .with_alert_timeout(Duration::from_millis(50))
                .trip("feedback_required")
                .await;

            assert_eq!(halt.reason, "feedback_required");
            assert!(latch.is_tripped());
            assert_eq!(alert.count(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_alert_reports_timeout() {
        let alert = RecordingAlert {
            hang: true,
            ..Default::default()
        };

        let err = send_bounded(&alert, "subject", "body", Duration::from_secs(20))
            .await
            .unwrap_err();

        assert!(matches!(err, AlertError::Timeout(d) if d == Duration::from_secs(20)), "{err:?}");
        assert_eq!(err.to_string(), "alert delivery timed out after 20s");
    }
}
