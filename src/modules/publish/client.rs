use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::error::{AuthError, RemoteFailure};

/// Identifier the remote assigns to a published post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaId(pub String);

/// Authenticated account. The client keeps its own credentials for uploads.
#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
}

/// Remote account the pipeline publishes to.
#[async_trait]
pub trait PublishClient: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Session, AuthError>;

    async fn publish_image(&self, path: &Path, caption: &str) -> Result<MediaId, RemoteFailure>;

    async fn publish_video(&self, path: &Path, caption: &str) -> Result<MediaId, RemoteFailure>;
}
