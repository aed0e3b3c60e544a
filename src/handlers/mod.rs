use crate::registry::ModelRegistry;
use std::sync::Arc;

pub mod health;
pub mod predict;

/// Shared state of the serving process
#[derive(Clone, Debug)]
pub struct AppState {
    pub models: Arc<ModelRegistry>,
}

impl AppState {
    pub fn new(models: ModelRegistry) -> Self {
        Self {
            models: Arc::new(models),
        }
    }
}
