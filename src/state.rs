use std::sync::Arc;

use crate::db::Database;
use crate::generation::ImageDispatcher;
use crate::session::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub sessions: SessionStore,
    pub generator: Arc<ImageDispatcher>,
}

impl AppState {
    pub fn new(db: Database, generator: ImageDispatcher) -> Self {
        AppState {
            db,
            sessions: SessionStore::new(),
            generator: Arc::new(generator),
        }
    }
}
