use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::handlers::{self, AppState};
use crate::ingest::{Event, Events, Target};
use crate::installer::{Capability, Installer, InstallerMetadata, Protocol, PublicPort};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "mvirt App Store API",
        version = "0.1.0",
        description = "REST API for the mvirt app store. Catalogs installer images published to the container registry and lets clients discover them by capability or free text.",
        license(name = "MIT")
    ),
    tags(
        (name = "system", description = "System information"),
        (name = "installers", description = "Installer catalog queries"),
        (name = "events", description = "Registry notification webhook")
    ),
    paths(
        handlers::get_version,
        handlers::search,
        handlers::list_installers,
        handlers::get_installer,
        handlers::process_event,
    ),
    components(schemas(
        handlers::VersionInfo,
        Installer,
        InstallerMetadata,
        PublicPort,
        Protocol,
        Capability,
        Events,
        Event,
        Target,
    ))
)]
pub struct ApiDoc;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // System
        .route("/version", get(handlers::get_version))
        // Catalog
        .route("/search", get(handlers::search))
        .route("/installers/all", get(handlers::list_installers))
        .route("/installers/{id}", get(handlers::get_installer))
        // Registry webhook
        .route("/event", post(handlers::process_event));

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
