/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::client
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1
  ------------------------------------------------------------
  Purpose:
    HTTP access to the update server: channel manifests,
    change logs and artifact bodies.

  Security / Safety Notes:
    Read-only HTTPS GET requests; no credentials transmitted.
    Manifest requests bypass intermediate caches.

  Dependencies:
    reqwest for HTTP, futures-util for body streaming,
    async-trait for the artifact source seam.

  Operational Scope:
    One client per process, passed explicitly to the check and
    download paths.

  Revision History:
    2025-11-12 COD  Reworked AUR client into update server client.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Configurable timeouts on every request
    - Non-2xx responses surface as typed HTTP errors
    - Best-effort enrichment never fails the caller
============================================================*/

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::{CACHE_CONTROL, PRAGMA};

use crate::changelog::extract_changelog;
use crate::config::{EndpointConfig, HttpConfig};
use crate::decision::{merge_channels, Channel};
use crate::error::{Result, SynupdError};
use crate::logger::Logger;
use crate::manifest::AvailableVersion;

/// Streaming artifact response.
pub struct ArtifactBody {
    /// `Content-Length`, when the server sent one.
    pub total: Option<u64>,
    pub stream: BoxStream<'static, Result<Bytes>>,
}

/// Where the download pipeline obtains artifact bytes from.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn open(&self, url: &str) -> Result<ArtifactBody>;
}

/// Where update checks obtain the advertised build and its notes from.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn fetch_available(&self, channel: Channel) -> Result<AvailableVersion>;
    /// Change log for `version`; empty when unavailable.
    async fn release_notes(&self, version: &AvailableVersion) -> String;
}

/// Client for the update server.
#[derive(Clone)]
pub struct UpdateClient {
    client: reqwest::Client,
    /// Whole-request limit for manifest and change log GETs.
    request_timeout: Duration,
    endpoints: EndpointConfig,
    logger: Arc<Logger>,
}

impl UpdateClient {
    /// Construct a new client from configuration.
    ///
    /// `http.timeout` bounds small GETs end to end. Artifact bodies are only
    /// bounded per read, so a slow but steady transfer may take as long as
    /// it needs.
    pub fn new(http: &HttpConfig, endpoints: &EndpointConfig, logger: Arc<Logger>) -> Result<Self> {
        let timeout = Duration::from_secs(http.timeout);
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(http.timeout.min(30)))
            .read_timeout(timeout)
            .user_agent(http.user_agent.as_str())
            .build()
            .map_err(|err| SynupdError::Network(format!("Failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            request_timeout: timeout,
            endpoints: endpoints.clone(),
            logger,
        })
    }

    /// Fetch and decode a single manifest; an empty body decodes to NONE.
    pub async fn fetch_manifest(&self, url: &str) -> Result<AvailableVersion> {
        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .await
            .map_err(|err| SynupdError::Network(format!("Manifest request to {url} failed: {err}")))?;
        let text = checked(response, url)?
            .text()
            .await
            .map_err(|err| SynupdError::Network(format!("Manifest body from {url}: {err}")))?;
        self.logger.timing("MANIFEST", "Get version", started);

        let available = AvailableVersion::decode(&text);
        if available.is_none() {
            self.logger
                .warn("MANIFEST", format!("No usable version record at {url}"));
        }
        Ok(available)
    }

    /// Release notes for `version`; an empty string when unavailable.
    pub async fn fetch_changelog(&self, version: &AvailableVersion) -> String {
        match self.try_fetch_changelog(version).await {
            Ok(text) => text,
            Err(err) => {
                self.logger
                    .warn("CHANGES", format!("Change log unavailable: {err}"));
                String::new()
            }
        }
    }

    async fn try_fetch_changelog(&self, version: &AvailableVersion) -> Result<String> {
        let url = version.changelog_url(&self.endpoints.download_base)?;
        let started = Instant::now();
        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|err| {
                SynupdError::Network(format!("Change log request to {url} failed: {err}"))
            })?;
        let text = checked(response, &url)?.text().await?;
        self.logger.timing("CHANGES", "Get changes", started);
        Ok(extract_changelog(&text))
    }
}

#[async_trait]
impl ManifestSource for UpdateClient {
    async fn fetch_available(&self, channel: Channel) -> Result<AvailableVersion> {
        match channel {
            Channel::Stable => self.fetch_manifest(&self.endpoints.stable_manifest_url()).await,
            Channel::Beta => self.fetch_manifest(&self.endpoints.beta_manifest_url()).await,
            Channel::Both => {
                let beta = self.fetch_manifest(&self.endpoints.beta_manifest_url()).await?;
                let stable = self
                    .fetch_manifest(&self.endpoints.stable_manifest_url())
                    .await?;
                Ok(merge_channels(beta, stable))
            }
        }
    }

    async fn release_notes(&self, version: &AvailableVersion) -> String {
        self.fetch_changelog(version).await
    }
}

#[async_trait]
impl ArtifactSource for UpdateClient {
    async fn open(&self, url: &str) -> Result<ArtifactBody> {
        let response =
            self.client.get(url).send().await.map_err(|err| {
                SynupdError::Network(format!("Artifact request to {url} failed: {err}"))
            })?;
        let response = checked(response, url)?;
        let total = response.content_length();
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(SynupdError::from))
            .boxed();
        Ok(ArtifactBody { total, stream })
    }
}

fn checked(response: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(SynupdError::Http {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }
}
