//! Error types for the app store.

use std::fmt;

use thiserror::Error;

/// Input that cannot be turned into a valid catalog value or query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A mandatory installer metadata field is missing or empty.
    #[error("installer metadata field '{0}' is mandatory")]
    MissingField(&'static str),

    /// A search was issued without any query parameter.
    #[error("one of 'provides' or 'general' must be supplied")]
    MissingQuery,

    /// A search was issued with both query parameters.
    #[error("only one of 'provides' or 'general' may be supplied")]
    AmbiguousQuery,
}

/// Stage of a registry fetch, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStage {
    Catalog,
    Tags,
    Manifest,
    ConfigBlob,
    Extract,
}

impl fmt::Display for FetchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchStage::Catalog => write!(f, "catalog"),
            FetchStage::Tags => write!(f, "tags"),
            FetchStage::Manifest => write!(f, "manifest"),
            FetchStage::ConfigBlob => write!(f, "config blob"),
            FetchStage::Extract => write!(f, "metadata extraction"),
        }
    }
}

/// Registry fetch failure.
#[derive(Debug, Error)]
#[error("failed to fetch {stage} for {image}: {message}")]
pub struct FetchError {
    /// `name` or `name:tag` the fetch was about.
    pub image: String,
    pub stage: FetchStage,
    pub message: String,
    /// Set when the labels were retrieved but did not form valid metadata.
    pub validation: Option<ValidationError>,
}

impl FetchError {
    pub fn new(image: impl Into<String>, stage: FetchStage, message: impl fmt::Display) -> Self {
        Self {
            image: image.into(),
            stage,
            message: message.to_string(),
            validation: None,
        }
    }

    pub fn invalid_metadata(image: impl Into<String>, err: ValidationError) -> Self {
        Self {
            image: image.into(),
            stage: FetchStage::Extract,
            message: err.to_string(),
            validation: Some(err),
        }
    }

    /// Whether retrying the same fetch may succeed.
    ///
    /// Invalid labels stay invalid until the tag is pushed again.
    pub fn is_transient(&self) -> bool {
        self.validation.is_none()
    }
}

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An installer with the same name already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// An update targeted a name that is not stored.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("malformed versions column: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Catalog operation, used as error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogOp {
    Lookup,
    Insert,
    Update,
    List,
    Search,
}

impl fmt::Display for CatalogOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogOp::Lookup => write!(f, "lookup"),
            CatalogOp::Insert => write!(f, "insert"),
            CatalogOp::Update => write!(f, "update"),
            CatalogOp::List => write!(f, "list"),
            CatalogOp::Search => write!(f, "search"),
        }
    }
}

/// Errors surfaced by the merge engine and the search facade.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{op} failed for installer '{name}': {source}")]
    Store {
        op: CatalogOp,
        name: String,
        #[source]
        source: StoreError,
    },
}

impl CatalogError {
    pub fn store(op: CatalogOp, name: impl Into<String>, source: StoreError) -> Self {
        CatalogError::Store {
            op,
            name: name.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// Failure to ingest one `(image, tag)` pair.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
