//! Classifies remote failures as transient or as platform enforcement.
//!
//! This is plain substring matching over the failure text and, when present,
//! the attached response body. It has no view of the real account state: a
//! generic word such as "restricted" can over-trigger, and new enforcement
//! wording will go unnoticed until it is added to the marker set. Treat a
//! `Transient` verdict as "no known signal", not as proof the account is fine.

use tracing::error;

use crate::common::error::RemoteFailure;
use crate::common::process::truncate;

pub const DEFAULT_BLOCK_MARKERS: [&str; 4] = [
    "feedback_required",
    "challenge_required",
    "restricted",
    "please wait",
];

/// Only this much of a response body is scanned and logged.
pub const BODY_SCAN_LIMIT: usize = 4000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Transient,
    PlatformBlock { marker: String },
}

impl Verdict {
    pub fn is_block(&self) -> bool {
        matches!(self, Verdict::PlatformBlock { .. })
    }
}

#[derive(Debug, Clone)]
pub struct BlockDetector {
    markers: Vec<String>,
}

impl Default for BlockDetector {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_MARKERS)
    }
}

impl BlockDetector {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let markers = markers
            .into_iter()
            .map(|m| m.as_ref().trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        Self { markers }
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    pub fn classify(&self, failure: &RemoteFailure) -> Verdict {
        if let Some(marker) = self.find_marker(&failure.message) {
            return Verdict::PlatformBlock { marker };
        }

        if let Some(resp) = &failure.response {
            let body = truncate(&resp.body, BODY_SCAN_LIMIT);
            if let Some(marker) = self.find_marker(&body) {
                error!(
                    "Remote response status={} body={}",
                    resp.status, body
                );
                return Verdict::PlatformBlock { marker };
            }
        }

        Verdict::Transient
    }

    fn find_marker(&self, text: &str) -> Option<String> {
        let haystack = text.to_lowercase();
        self.markers
            .iter()
            .find(|m| haystack.contains(m.as_str()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_default_marker_blocks_in_any_case() {
        let detector = BlockDetector::default();
        for text in [
            "feedback_required: we limit how often you can do certain things",
            "CHALLENGE_REQUIRED",
            "This feature is Restricted for your account",
            "Please wait a few minutes before you try again.",
        ] {
            let verdict = detector.classify(&RemoteFailure::new(text));
            assert!(verdict.is_block(), "{text}");
        }
    }

    #[test]
    fn marker_in_response_body_blocks() {
        let detector = BlockDetector::default();
        let failure = RemoteFailure::new("upload failed with status 400")
            .with_response(400, r#"{"message":"challenge_required","status":"fail"}"#);

        assert_eq!(
            detector.classify(&failure),
            Verdict::PlatformBlock {
                marker: "challenge_required".to_string()
            }
        );
    }

    #[test]
    fn generic_errors_are_transient() {
        let detector = BlockDetector::default();
        for failure in [
            RemoteFailure::new("operation timed out"),
            RemoteFailure::new("connection reset by peer"),
            RemoteFailure::new("server error").with_response(502, "<html>Bad Gateway</html>"),
        ] {
            assert_eq!(detector.classify(&failure), Verdict::Transient);
        }
    }

    #[test]
    fn markers_past_the_scan_limit_are_ignored() {
        let detector = BlockDetector::default();
        let body = format!("{}feedback_required", "x".repeat(BODY_SCAN_LIMIT));
        let failure = RemoteFailure::new("bad request").with_response(400, body);

        assert_eq!(detector.classify(&failure), Verdict::Transient);
    }

    #[test]
    fn custom_marker_set_replaces_defaults() {
        let detector = BlockDetector::new([" Spam_Detected ", ""]);
        assert_eq!(detector.markers(), ["spam_detected"]);

        assert!(detector.classify(&RemoteFailure::new("SPAM_DETECTED")).is_block());
        assert!(!detector.classify(&RemoteFailure::new("feedback_required")).is_block());
    }
}
