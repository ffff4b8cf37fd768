//! REST API for the app store.

mod handlers;
mod routes;

pub use handlers::{ApiError, AppState, VersionInfo};
pub use routes::{ApiDoc, create_router};
