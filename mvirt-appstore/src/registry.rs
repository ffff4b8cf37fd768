//! Container registry client.
//!
//! Talks to the Docker registry HTTP API v2 to enumerate repositories and
//! tags and to materialize installer metadata for a single image tag:
//!
//! 1. `GET /v2/<name>/manifests/<tag>` for the content digest and the config blob digest
//! 2. `GET /v2/<name>/blobs/<config digest>` for the image labels
//! 3. label extraction via [`MetadataExtractor`]

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::RegistryConfig;
use crate::error::{FetchError, FetchStage};
use crate::installer::InstallerMetadata;
use crate::metadata::MetadataExtractor;

/// Media type requested for manifests so the registry returns schema 2.
pub const MANIFEST_V2_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Header carrying the canonical manifest digest.
pub const CONTENT_DIGEST_HEADER: &str = "docker-content-digest";

/// Platform type recorded on every metadata snapshot.
pub const PLATFORM_TYPE: &str = "docker";

/// Source of installer metadata. Implemented by [`RegistryClient`].
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// List every repository in the registry.
    async fn list_repositories(&self) -> Result<Vec<String>, FetchError>;

    /// List the tags of one repository.
    async fn list_tags(&self, image: &str) -> Result<Vec<String>, FetchError>;

    /// Retrieve and parse the installer metadata of `image:tag`.
    async fn fetch_metadata(&self, image: &str, tag: &str)
    -> Result<InstallerMetadata, FetchError>;
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    repositories: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TagListResponse {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ManifestV2 {
    config: Descriptor,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: String,
}

/// Image config blob. Registries return `config`, docker inspect output
/// uses `Config`.
#[derive(Debug, Deserialize)]
struct ImageConfigBlob {
    #[serde(alias = "Config", default)]
    config: Option<ImageConfigSection>,
}

#[derive(Debug, Deserialize)]
struct ImageConfigSection {
    #[serde(rename = "Labels", default)]
    labels: Option<HashMap<String, String>>,
}

/// HTTP client for a Docker registry v2 endpoint.
pub struct RegistryClient {
    client: Client,
    base_url: String,
    extractor: MetadataExtractor,
}

impl RegistryClient {
    pub fn new(config: &RegistryConfig) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            extractor: MetadataExtractor::new(&config.label_namespace),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(
        &self,
        path: &str,
        accept: Option<&str>,
        image: &str,
        stage: FetchStage,
    ) -> Result<reqwest::Response, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, stage = %stage, "Registry request");

        let mut request = self.client.get(&url);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }

        request
            .send()
            .await
            .map_err(|e| FetchError::new(image, stage, format!("request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| FetchError::new(image, stage, format!("registry returned error: {}", e)))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        image: &str,
        stage: FetchStage,
    ) -> Result<T, FetchError> {
        let body = self
            .get(path, None, image, stage)
            .await?
            .bytes()
            .await
            .map_err(|e| FetchError::new(image, stage, format!("failed to read body: {}", e)))?;
        serde_json::from_slice(&body)
            .map_err(|e| FetchError::new(image, stage, format!("failed to parse body: {}", e)))
    }
}

#[async_trait]
impl MetadataSource for RegistryClient {
    async fn list_repositories(&self) -> Result<Vec<String>, FetchError> {
        let catalog: CatalogResponse = self
            .get_json("/v2/_catalog", "registry", FetchStage::Catalog)
            .await?;
        Ok(catalog.repositories.unwrap_or_default())
    }

    async fn list_tags(&self, image: &str) -> Result<Vec<String>, FetchError> {
        info!(image = %image, "Retrieving image tags");
        let tag_list: TagListResponse = self
            .get_json(&format!("/v2/{}/tags/list", image), image, FetchStage::Tags)
            .await?;
        Ok(tag_list.tags.unwrap_or_default())
    }

    async fn fetch_metadata(
        &self,
        image: &str,
        tag: &str,
    ) -> Result<InstallerMetadata, FetchError> {
        let reference = format!("{}:{}", image, tag);
        info!(image = %image, tag = %tag, "Retrieving installer metadata");

        let response = self
            .get(
                &format!("/v2/{}/manifests/{}", image, tag),
                Some(MANIFEST_V2_MEDIA_TYPE),
                &reference,
                FetchStage::Manifest,
            )
            .await?;

        let content_digest = response
            .headers()
            .get(CONTENT_DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if content_digest.is_empty() {
            return Err(FetchError::new(
                &reference,
                FetchStage::Manifest,
                "image digest is empty",
            ));
        }

        let body = response.bytes().await.map_err(|e| {
            FetchError::new(
                &reference,
                FetchStage::Manifest,
                format!("failed to read manifest: {}", e),
            )
        })?;
        let manifest: ManifestV2 = serde_json::from_slice(&body).map_err(|e| {
            FetchError::new(
                &reference,
                FetchStage::Manifest,
                format!("failed to parse manifest: {}", e),
            )
        })?;

        let blob: ImageConfigBlob = self
            .get_json(
                &format!("/v2/{}/blobs/{}", image, manifest.config.digest),
                &reference,
                FetchStage::ConfigBlob,
            )
            .await?;
        let labels = blob.config.and_then(|c| c.labels).unwrap_or_default();

        let mut metadata = self
            .extractor
            .extract(&labels)
            .map_err(|e| FetchError::invalid_metadata(&reference, e))?;
        metadata.platform_id = format!("{}@{}", image, content_digest);
        metadata.platform_type = PLATFORM_TYPE.to_string();

        debug!(image = %image, tag = %tag, platform_id = %metadata.platform_id, "Parsed installer metadata");
        Ok(metadata)
    }
}
