use std::sync::Arc;

use crate::config::Config;
use crate::profiles::ProfileStore;
use crate::queue::QueueManager;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Config,
    pub profiles: Arc<ProfileStore>,
    pub queue: QueueManager,
}
