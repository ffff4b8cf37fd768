use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::ToSchema;

use crate::catalog::Catalog;
use crate::error::CatalogError;
use crate::ingest::{Events, Ingestor};
use crate::installer::{Installer, InstallerKey};
use crate::search::{InstallerMap, SearchQuery};

/// Shared application state
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub ingestor: Arc<Ingestor>,
}

/// API error, rendered as a plain-text body
#[derive(Debug)]
pub struct ApiError {
    pub error: String,
    pub code: u32,
}

impl ApiError {
    fn internal(error: impl Into<String>) -> Self {
        ApiError {
            error: error.into(),
            code: 500,
        }
    }

    /// Map a catalog error, keeping store details out of the response.
    fn from_catalog(e: CatalogError, public_message: &str) -> Self {
        match e {
            CatalogError::Validation(e) => ApiError::internal(e.to_string()),
            e @ CatalogError::Store { .. } => {
                error!(error = %e, "Catalog request failed");
                ApiError::internal(public_message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.code {
            400 => StatusCode::BAD_REQUEST,
            404 => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.error).into_response()
    }
}

// === Version ===

/// Version information
#[derive(Serialize, ToSchema)]
pub struct VersionInfo {
    pub version: String,
}

/// Get service version
#[utoipa::path(
    get,
    path = "/api/v1/version",
    responses(
        (status = 200, description = "Service version", body = VersionInfo)
    ),
    tag = "system"
)]
pub async fn get_version() -> Json<VersionInfo> {
    Json(VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// === Search ===

/// Search installers by provided capability or free text
///
/// Results are keyed by ID in relevance order. A repeated parameter uses
/// its first value.
#[utoipa::path(
    get,
    path = "/api/v1/search",
    params(SearchQuery),
    responses(
        (status = 200, description = "Matching installers keyed by ID", body = IndexMap<String, Installer>),
        (status = 500, description = "Missing or conflicting query, or search failure", body = String)
    ),
    tag = "installers"
)]
pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<InstallerMap>, ApiError> {
    let query = SearchQuery::from_pairs(params);
    state
        .catalog
        .search(&query)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_catalog(e, "Internal error: can't perform search"))
}

// === Installers ===

/// List all installers keyed by ID, ordered by name
#[utoipa::path(
    get,
    path = "/api/v1/installers/all",
    responses(
        (status = 200, description = "All installers keyed by ID", body = IndexMap<String, Installer>),
        (status = 500, description = "Catalog failure", body = String)
    ),
    tag = "installers"
)]
pub async fn list_installers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<InstallerMap>, ApiError> {
    let installers = state
        .catalog
        .list()
        .await
        .map_err(|e| ApiError::from_catalog(e, "Internal error: can't list installers"))?;

    Ok(Json(
        installers
            .into_iter()
            .map(|installer| (installer.id.clone(), installer))
            .collect(),
    ))
}

/// Get installer by ID
#[utoipa::path(
    get,
    path = "/api/v1/installers/{id}",
    params(
        ("id" = String, Path, description = "Installer ID")
    ),
    responses(
        (status = 200, description = "Installer found", body = Installer),
        (status = 500, description = "Installer not found or catalog failure", body = String)
    ),
    tag = "installers"
)]
pub async fn get_installer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Installer>, ApiError> {
    state
        .catalog
        .get(InstallerKey::Id(&id))
        .await
        .map_err(|e| ApiError::from_catalog(e, "Internal error: can't retrieve installer"))?
        .map(Json)
        .ok_or_else(|| ApiError::internal(format!("Installer {} not found", id)))
}

// === Registry events ===

/// Receive registry notifications
///
/// Acknowledged as soon as the body parses; push events are processed in
/// the background.
#[utoipa::path(
    post,
    path = "/api/v1/event",
    request_body = Events,
    responses(
        (status = 200, description = "Events accepted"),
        (status = 400, description = "Body could not be read"),
        (status = 500, description = "Body is not a valid event envelope", body = String)
    ),
    tag = "events"
)]
pub async fn process_event(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let events: Events = serde_json::from_slice(&body).map_err(|e| {
        error!(error = %e, "Failed to parse registry events");
        ApiError::internal(e.to_string())
    })?;

    debug!(count = events.events.len(), "Received registry events");
    state.ingestor.process_events(events);
    Ok(StatusCode::OK)
}
