use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Failure of an external tool invocation (encoder or prober).
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("{program} not found")]
    NotFound { program: String },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    #[error("{program} exited with code {code:?}: {stderr}")]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("i/o error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// HTTP-like response attached to a remote failure, when one was recoverable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: String,
}

/// A failed remote publish call.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RemoteFailure {
    pub message: String,
    pub response: Option<RemoteResponse>,
}

impl RemoteFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            response: None,
        }
    }

    pub fn with_response(mut self, status: u16, body: impl Into<String>) -> Self {
        self.response = Some(RemoteResponse {
            status,
            body: body.into(),
        });
        self
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("login request failed: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("invalid alert address: {0}")]
    Address(String),

    #[error("failed to build alert message: {0}")]
    Message(String),

    #[error("alert delivery failed: {0}")]
    Delivery(String),

    #[error("alert delivery timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

/// Fatal halt raised once the safety latch is set. This is the only error
/// that leaves the publish orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct Halt {
    pub reason: String,
}

impl fmt::Display for Halt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "publishing halted after platform enforcement signal ({}); restart required",
            self.reason
        )
    }
}
