pub mod catalog;
pub mod config;
pub mod error;
pub mod ingest;
pub mod installer;
pub mod metadata;
pub mod registry;
pub mod rest;
pub mod search;
pub mod store;

pub use catalog::{AddOutcome, Catalog};
pub use config::{Config, RegistryConfig, RetryPolicy};
pub use error::{CatalogError, FetchError, StoreError, ValidationError};
pub use ingest::{Events, Ingestor, ScanReport};
pub use installer::{Installer, InstallerKey, InstallerMetadata, derive_id};
pub use registry::{MetadataSource, RegistryClient};
pub use search::SearchQuery;
pub use store::{CatalogStore, Store};
