use async_trait::async_trait;

use crate::common::error::AlertError;

pub mod smtp;

/// Out-of-band notification channel used when publishing is halted.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<(), AlertError>;
}
