use std::sync::Arc;

use artifetch_core::{Config, DownloadOrchestrator, Notifier};

/// Shared application state
pub struct AppState {
    config: Config,
    orchestrator: Arc<DownloadOrchestrator>,
    notifier: Notifier,
}

impl AppState {
    pub fn new(config: Config, orchestrator: Arc<DownloadOrchestrator>, notifier: Notifier) -> Self {
        Self {
            config,
            orchestrator,
            notifier,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn orchestrator(&self) -> &DownloadOrchestrator {
        &self.orchestrator
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }
}
