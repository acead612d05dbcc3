pub mod auth;
pub mod routes;

use std::sync::Arc;

use crate::config::Config;
use crate::coordinator::Coordinator;

/// Shared, cloneable application state threaded through every handler via
/// `axum::extract::State`. Never read from a global.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub config: Arc<Config>,
}

pub use routes::build_router;
