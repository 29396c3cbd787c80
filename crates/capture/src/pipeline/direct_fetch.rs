//! Fetch documents that already are PDFs instead of re-rendering them.

use async_trait::async_trait;
use pagesync_core::{CaptureResult, Error, Result, Target};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{CaptureStrategy, StrategyContext, StrategyOutcome};
use crate::filename::filename_from_address;
use crate::host::{FetchedResource, ResourceFetcher};

/// Query parameters whose value names the response format.
const FORMAT_PARAMS: &[&str] = &["format", "type", "output", "mime", "filetype"];

/// Whether an address looks like it serves a PDF directly.
pub fn looks_like_pdf(address: &str) -> bool {
    let Ok(parsed) = url::Url::parse(address) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https" | "file") {
        return false;
    }

    let path = parsed.path().to_lowercase();
    if path.ends_with(".pdf") {
        return true;
    }
    // e.g. https://arxiv.org/pdf/2401.00001
    if path.split('/').any(|segment| segment == "pdf") {
        return true;
    }

    parsed.query_pairs().any(|(key, value)| {
        let key = key.to_lowercase();
        let value = value.to_lowercase();
        value.ends_with(".pdf")
            || (FORMAT_PARAMS.contains(&key.as_str())
                && (value == "pdf" || value == "application/pdf"))
    })
}

fn is_pdf_response(resource: &FetchedResource) -> bool {
    (200..300).contains(&resource.status)
        && resource
            .content_type
            .as_deref()
            .map(|ct| ct.to_lowercase().contains("application/pdf"))
            .unwrap_or(false)
}

pub struct DirectFetchStrategy {
    fetcher: Arc<dyn ResourceFetcher>,
}

impl DirectFetchStrategy {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl CaptureStrategy for DirectFetchStrategy {
    fn name(&self) -> &'static str {
        "direct-fetch"
    }

    fn applies_to(&self, target: &Target) -> bool {
        looks_like_pdf(&target.url)
    }

    async fn capture(&self, _ctx: &StrategyContext<'_>, target: &Target) -> StrategyOutcome {
        let resource = match self.fetcher.fetch(&target.url).await {
            Ok(r) => r,
            Err(e) => return StrategyOutcome::NotApplicable(format!("fetch failed: {}", e)),
        };
        if !is_pdf_response(&resource) {
            return StrategyOutcome::NotApplicable(format!(
                "status {} with content type {:?}",
                resource.status, resource.content_type
            ));
        }

        StrategyOutcome::Captured(CaptureResult {
            bytes: resource.bytes,
            // The document is immutable at a given address.
            fingerprint_text: target.url.clone(),
            address: target.url.clone(),
            title: target.title.clone(),
            filename: filename_from_address(&target.url),
        })
    }
}

/// `ResourceFetcher` over reqwest. Bodies larger than `max_bytes` are refused.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, max_bytes: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pagesync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, max_bytes })
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResource> {
        debug!(url = %url, "Fetching resource");
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Other(format!("Fetch failed: {}", e)))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        if let Some(declared) = response.content_length() {
            if declared > self.max_bytes {
                return Err(too_large(url, self.max_bytes));
            }
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::Other(format!("Failed to read body: {}", e)))?
        {
            if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(too_large(url, self.max_bytes));
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(FetchedResource {
            status,
            content_type,
            bytes,
        })
    }
}

fn too_large(url: &str, max_bytes: u64) -> Error {
    Error::Other(format!("{} exceeds the {} byte fetch limit", url, max_bytes))
}
