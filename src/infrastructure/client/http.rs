use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::common::error::{AuthError, RemoteFailure};
use crate::common::process::truncate;
use crate::modules::publish::client::{MediaId, PublishClient, Session};
use crate::modules::publish::detector::BODY_SCAN_LIMIT;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const PLACEHOLDER_ID_LIMIT: usize = 200;

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(alias = "media_id", alias = "pk")]
    id: serde_json::Value,
}

/// Id of an accepted upload. An unparseable body is kept as the id.
fn media_id(route: &str, body: &str) -> MediaId {
    match serde_json::from_str::<UploadResponse>(body) {
        Ok(UploadResponse {
            id: serde_json::Value::String(id),
        }) => MediaId(id),
        Ok(UploadResponse { id }) => MediaId(id.to_string()),
        Err(e) => {
            let placeholder = truncate(body, PLACEHOLDER_ID_LIMIT);
            warn!("{} upload accepted without a media id ({}): {}", route, e, placeholder);
            MediaId(placeholder)
        }
    }
}

/// Publishes through the account's HTTP API using multipart uploads.
pub struct HttpPublishClient {
    http: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl HttpPublishClient {
    pub fn new(base_url: &str) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        })
    }

    async fn upload(
        &self,
        route: &str,
        path: &Path,
        caption: &str,
    ) -> Result<MediaId, RemoteFailure> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            RemoteFailure::new(format!("failed to read {}: {}", path.display(), e))
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let mime = mime_guess::from_path(path).first_or_octet_stream();

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime.as_ref())
            .map_err(|e| RemoteFailure::new(format!("invalid mime type {mime}: {e}")))?;
        let form = Form::new()
            .text("caption", caption.to_string())
            .part("file", part);

        let url = format!("{}/api/media/{}", self.base_url, route);
        let mut request = self.http.post(&url).multipart(form);
        if let Some(token) = self.token.read().await.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RemoteFailure::new(format!("{route} upload request failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!(
            "{} upload responded {} {}",
            route,
            status.as_u16(),
            truncate(&body, BODY_SCAN_LIMIT)
        );

        if !status.is_success() {
            return Err(RemoteFailure::new(format!(
                "{route} upload failed with status {}",
                status.as_u16()
            ))
            .with_response(status.as_u16(), body));
        }

        // The remote accepted the upload; a retry here would post it twice.
        Ok(media_id(route, &body))
    }
}

#[async_trait]
impl PublishClient for HttpPublishClient {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Session, AuthError> {
        let url = format!("{}/api/login", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&LoginRequest { username, password })
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body: truncate(&body, BODY_SCAN_LIMIT),
            });
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        *self.token.write().await = Some(login.token);
        info!("✅ Logged in as {}", username);

        Ok(Session {
            username: username.to_string(),
        })
    }

    async fn publish_image(&self, path: &Path, caption: &str) -> Result<MediaId, RemoteFailure> {
        self.upload("photo", path, caption).await
    }

    async fn publish_video(&self, path: &Path, caption: &str) -> Result<MediaId, RemoteFailure> {
        self.upload("video", path, caption).await
    }
}
