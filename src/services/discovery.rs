//! Discovery stage: produce the document list for a run.
//!
//! Uses the cache when it holds a fresh snapshot for the start URL; otherwise
//! fetches the search page, extracts it and saves the full list back to the
//! cache before any download starts.

use thiserror::Error;
use tracing::{debug, info, warn};

use super::cache::{CacheSnapshot, CacheStore};
use crate::models::DocumentRecord;
use crate::scrapers::extract::{ExtractError, Extractor};
use crate::scrapers::{FetchError, HttpClient};

/// Failure to obtain any documents at all. Fatal for the run.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Could not fetch search page: {0}")]
    Fetch(#[from] FetchError),

    #[error("Could not extract documents from search page: {0}")]
    Extract(#[from] ExtractError),
}

/// Where a discovered list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverySource {
    Cache,
    Portal,
}

/// Result of discovery.
#[derive(Debug)]
pub struct Discovered {
    pub documents: Vec<DocumentRecord>,
    pub source: DiscoverySource,
    /// Entries the extractor dropped (0 for cache hits).
    pub dropped: usize,
}

pub struct DocumentDiscovery<'a> {
    client: &'a HttpClient,
    extractor: &'a Extractor,
    cache: &'a CacheStore,
}

impl<'a> DocumentDiscovery<'a> {
    pub fn new(client: &'a HttpClient, extractor: &'a Extractor, cache: &'a CacheStore) -> Self {
        Self {
            client,
            extractor,
            cache,
        }
    }

    /// Return the unfiltered document list for `start_url`.
    pub async fn discover(&self, start_url: &str) -> Result<Discovered, DiscoveryError> {
        if let Some(snapshot) = self.cache.load_async(start_url).await {
            return Ok(Discovered {
                documents: snapshot.documents,
                source: DiscoverySource::Cache,
                dropped: 0,
            });
        }

        let page = self.client.get_text(start_url).await?;
        let extraction = self.extractor.extract(&page)?;

        for line in &extraction.diagnostics {
            debug!("Extraction: {}", line);
        }
        info!(
            "Extracted {} documents from search page",
            extraction.records.len()
        );

        let snapshot = CacheSnapshot::new(start_url, extraction.records);
        if let Err(e) = self.cache.save_async(&snapshot).await {
            warn!("Failed to save cache: {}", e);
        }

        Ok(Discovered {
            documents: snapshot.documents,
            source: DiscoverySource::Portal,
            dropped: extraction.dropped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldMapping;
    use crate::scrapers::http_client::test_client;
    use std::time::Duration;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r#"<html><script>
var model = {"Rows":[
  {"Guid":"g1","Doc_Ref2":"Letter","Doc_Type":"Planning Comments"},
  {"Guid":"g2","Doc_Ref2":"Plan","Doc_Type":"Drawings"}
]};
</script></html>"#;

    async fn portal() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .expect(1)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_fetches_then_serves_from_cache() {
        let server = portal().await;
        let dir = tempdir().unwrap();
        let client = test_client(1);
        let extractor = Extractor::new(FieldMapping::default(), format!("{}/", server.uri()));
        let cache = CacheStore::new(dir.path().join("cache.json"), Duration::from_secs(3600));
        let discovery = DocumentDiscovery::new(&client, &extractor, &cache);
        let start_url = format!("{}/search", server.uri());

        let first = discovery.discover(&start_url).await.unwrap();
        assert_eq!(first.source, DiscoverySource::Portal);
        assert_eq!(first.documents.len(), 2);

        // The mock expects exactly one request
        let second = discovery.discover(&start_url).await.unwrap();
        assert_eq!(second.source, DiscoverySource::Cache);
        assert_eq!(second.documents, first.documents);
    }

    #[tokio::test]
    async fn test_page_without_model_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let client = test_client(1);
        let extractor = Extractor::new(FieldMapping::default(), server.uri());
        let cache = CacheStore::disabled();
        let discovery = DocumentDiscovery::new(&client, &extractor, &cache);

        let err = discovery
            .discover(&format!("{}/search", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Extract(ExtractError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_http_error_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = test_client(1);
        let extractor = Extractor::new(FieldMapping::default(), server.uri());
        let cache = CacheStore::disabled();
        let discovery = DocumentDiscovery::new(&client, &extractor, &cache);

        let err = discovery
            .discover(&format!("{}/search", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Fetch(ref e) if e.status == Some(403)));
    }
}
