//! Shared application state handed to every handler through Axum's
//! `State` extractor.

use std::fmt;
use std::sync::Arc;

use engram_core::broadcaster::EventBroadcaster;
use engram_core::drive_monitor::DriveMonitor;
use engram_core::job_manager::JobManager;
use engram_core::store::Store;

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub drive_monitor: Arc<DriveMonitor>,
    pub job_manager: Arc<JobManager>,
    pub config: Arc<ServerConfig>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
