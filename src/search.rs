//! Domain-restricted web search for the research workflow

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};

/// One search result: the page URL and its extracted text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub content: String,
}

/// Web search contract used by the research workflow
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Search `query`, restricted to `domains`, returning at most
    /// `max_results` hits. Zero hits is a valid outcome, not an error.
    async fn search(
        &self,
        query: &str,
        domains: &[String],
        max_results: usize,
    ) -> Result<Vec<SearchHit>>;
}

/// Search provider backed by the Tavily HTTP API
pub struct TavilyClient {
    http: reqwest::Client,
    api_key: String,
}

impl TavilyClient {
    const ENDPOINT: &'static str = "https://api.tavily.com/search";

    /// Create a client from config, reading the API key from the environment
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = std::env::var(&config.search_api_key_env).map_err(|_| {
            Error::config(format!(
                "Missing search API key in environment variable {}",
                config.search_api_key_env
            ))
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http, api_key })
    }
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    include_domains: &'a [String],
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[async_trait]
impl SearchProvider for TavilyClient {
    async fn search(
        &self,
        query: &str,
        domains: &[String],
        max_results: usize,
    ) -> Result<Vec<SearchHit>> {
        let payload = TavilyRequest {
            api_key: &self.api_key,
            query,
            max_results,
            include_domains: domains,
        };

        let response = self
            .http
            .post(Self::ENDPOINT)
            .json(&payload)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::search(format!("Search provider returned an error status: {}", e)))?;

        let body: TavilyResponse = response
            .json()
            .await
            .map_err(|e| Error::search(format!("Unreadable search response: {}", e)))?;

        Ok(body.results)
    }
}

/// Scripted provider for tests: pops canned result batches in order
#[derive(Default)]
pub struct ScriptedSearch {
    batches: Mutex<Vec<Vec<SearchHit>>>,
}

impl ScriptedSearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next batch of hits
    pub fn push_batch(&self, hits: Vec<SearchHit>) {
        self.batches.lock().unwrap().push(hits);
    }
}

#[async_trait]
impl SearchProvider for ScriptedSearch {
    async fn search(
        &self,
        _query: &str,
        _domains: &[String],
        max_results: usize,
    ) -> Result<Vec<SearchHit>> {
        let mut batches = self.batches.lock().unwrap();
        if batches.is_empty() {
            return Ok(Vec::new());
        }
        let mut hits = batches.remove(0);
        hits.truncate(max_results);
        Ok(hits)
    }
}
