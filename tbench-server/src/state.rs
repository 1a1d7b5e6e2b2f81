use std::sync::Arc;

use tbench_storage::RunCoordinator;

pub struct AppState {
    pub coordinator: Arc<RunCoordinator>,
    pub api_key: String,
}
