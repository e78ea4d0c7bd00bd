//! Shared application state.

use std::sync::Arc;

use rasi_reconciler::ReconcilerService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ReconcilerService>,
}

impl AppState {
    pub fn new(service: Arc<ReconcilerService>) -> Self {
        Self { service }
    }
}
