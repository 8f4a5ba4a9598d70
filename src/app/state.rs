use std::sync::Arc;

use crate::jobs::JobDispatcher;
use crate::storage::PathLocks;

use super::settings::GatewaySettings;

/// Everything a route handler needs, built once at startup and cloned into
/// each filter.
#[derive(Clone)]
pub struct AppState {
    settings: Arc<GatewaySettings>,
    locks: Arc<PathLocks>,
    dispatcher: Arc<JobDispatcher>,
}

impl AppState {
    pub fn new(settings: GatewaySettings) -> Self {
        let locks = PathLocks::new(settings.lock_policy);
        let dispatcher = JobDispatcher::new(&settings.tool);
        Self {
            settings: Arc::new(settings),
            locks: Arc::new(locks),
            dispatcher: Arc::new(dispatcher),
        }
    }

    pub fn settings(&self) -> Arc<GatewaySettings> {
        self.settings.clone()
    }

    pub fn locks(&self) -> &PathLocks {
        &self.locks
    }

    pub fn dispatcher(&self) -> &JobDispatcher {
        &self.dispatcher
    }
}
