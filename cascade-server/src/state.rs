//! Shared application state for the control server.

use std::sync::Arc;

use cascade::controller::Controller;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The single controller for the served project.
    pub controller: Arc<Controller>,
}

impl AppState {
    pub fn new(controller: Arc<Controller>) -> Self {
        Self { controller }
    }
}
