//! Ingestion pipeline.
//!
//! Registry push notifications are turned into catalog merges here. Each push
//! event runs as its own task; a full scan walks the whole registry
//! sequentially.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use crate::catalog::{AddOutcome, Catalog};
use crate::config::RetryPolicy;
use crate::error::{FetchError, IngestError};
use crate::installer::InstallerMetadata;
use crate::registry::MetadataSource;

/// Action name of the only event kind that is processed.
pub const PUSH_ACTION: &str = "push";

/// Notification envelope sent by the registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct Events {
    #[serde(default)]
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Event {
    pub id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub action: String,
    pub target: Target,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct Target {
    pub media_type: String,
    pub size: i64,
    pub digest: String,
    pub length: i64,
    pub repository: String,
    pub url: String,
    pub tag: String,
}

impl Event {
    pub fn is_push(&self) -> bool {
        self.action == PUSH_ACTION
    }
}

/// Summary of a full registry scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Repositories enumerated.
    pub images: usize,
    /// Tags attempted.
    pub tags: usize,
    /// Tags merged into the catalog.
    pub added: usize,
    /// Tag listings or tags that could not be ingested.
    pub failed: usize,
}

pub struct Ingestor {
    source: Arc<dyn MetadataSource>,
    catalog: Arc<Catalog>,
    retry: RetryPolicy,
}

impl Ingestor {
    pub fn new(source: Arc<dyn MetadataSource>, catalog: Arc<Catalog>, retry: RetryPolicy) -> Self {
        Self {
            source,
            catalog,
            retry,
        }
    }

    /// Dispatch every push event to its own task and return immediately.
    pub fn process_events(self: &Arc<Self>, events: Events) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for event in events.events {
            if !event.is_push() {
                debug!(event_id = %event.id, action = %event.action, "Ignoring event");
                continue;
            }

            let image = event.target.repository;
            let tag = event.target.tag;
            if image.is_empty() || tag.is_empty() {
                warn!(event_id = %event.id, image = %image, "Push event without repository or tag, skipping");
                continue;
            }

            let ingestor = Arc::clone(self);
            let event_id = event.id;
            handles.push(tokio::spawn(async move {
                info!(event_id = %event_id, image = %image, tag = %tag, "Processing push event");
                if let Err(e) = ingestor.ingest(&image, &tag, ingestor.retry).await {
                    error!(event_id = %event_id, image = %image, tag = %tag, error = %e, "Push event processing failed");
                }
            }));
        }
        handles
    }

    /// Walk every repository and tag of the registry, one at a time.
    ///
    /// Only a failure to list the repositories aborts the scan.
    pub async fn full_scan(&self) -> Result<ScanReport, FetchError> {
        let images = self.source.list_repositories().await?;
        info!(count = images.len(), "Starting full registry scan");

        let mut report = ScanReport {
            images: images.len(),
            ..Default::default()
        };
        for image in &images {
            let tags = match self.source.list_tags(image).await {
                Ok(tags) => tags,
                Err(e) => {
                    error!(image = %image, error = %e, "Failed to list image tags, skipping image");
                    report.failed += 1;
                    continue;
                }
            };

            for tag in &tags {
                report.tags += 1;
                match self.ingest(image, tag, RetryPolicy::none()).await {
                    Ok(_) => report.added += 1,
                    Err(e) => {
                        error!(image = %image, tag = %tag, error = %e, "Failed to ingest image tag");
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            images = report.images,
            tags = report.tags,
            added = report.added,
            failed = report.failed,
            "Full registry scan finished"
        );
        Ok(report)
    }

    async fn ingest(
        &self,
        image: &str,
        tag: &str,
        retry: RetryPolicy,
    ) -> Result<AddOutcome, IngestError> {
        let metadata = self.fetch_with_retry(image, tag, retry).await?;
        Ok(self.catalog.add(image, tag, metadata).await?)
    }

    async fn fetch_with_retry(
        &self,
        image: &str,
        tag: &str,
        retry: RetryPolicy,
    ) -> Result<InstallerMetadata, FetchError> {
        let mut attempt = 1;
        loop {
            match self.source.fetch_metadata(image, tag).await {
                Ok(metadata) => return Ok(metadata),
                Err(e) if e.is_transient() && attempt < retry.max_attempts => {
                    let delay = retry.backoff(attempt);
                    warn!(
                        image = %image,
                        tag = %tag,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Metadata fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
