use std::sync::Arc;

use crate::{config::Config, database::Database};

/// Shared by every handler: the connection pool and the loaded settings.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db: Database, config: Config) -> Self {
        Self {
            db,
            config: Arc::new(config),
        }
    }
}
