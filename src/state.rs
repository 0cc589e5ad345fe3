use std::sync::Arc;

use crate::config::settings::AppConfig;
use crate::modules::publish::orchestrator::Publisher;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub publisher: Arc<Publisher>,
}

impl AppState {
    pub fn new(config: AppConfig, publisher: Publisher) -> Self {
        Self {
            config,
            publisher: Arc::new(publisher),
        }
    }
}
