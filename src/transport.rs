//! Remote code-search index transport
//!
//! The index is reached through the [`IndexTransport`] trait so the rest of
//! the pipeline never deals with HTTP directly. [`HttpIndexTransport`] talks
//! to an Azure DevOps style `codesearchresults` endpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::RawHit;

/// Match category holding hits in file content (vs file names, etc.)
pub const CONTENT_MATCH_CATEGORY: &str = "content";

/// API version sent with every request
const API_VERSION: &str = "7.1";

/// Structured query accepted by the remote index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSearchRequest {
    pub search_text: String,
    #[serde(rename = "$skip")]
    pub skip: usize,
    #[serde(rename = "$top")]
    pub top: usize,
    pub filters: HashMap<String, Vec<String>>,
    pub include_facets: bool,
}

/// One match inside a result file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeHit {
    pub char_offset: usize,
    pub length: usize,
}

/// One file returned by the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeResult {
    /// Repository-relative path, `/`-separated, usually with a leading `/`
    pub path: String,
    /// Hits keyed by match category
    #[serde(default)]
    pub matches: HashMap<String, Vec<CodeHit>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSearchResponse {
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub results: Vec<CodeResult>,
}

impl CodeSearchResponse {
    /// Flatten the `content` hits of every result into [`RawHit`]s
    pub fn into_hits(self) -> Vec<RawHit> {
        self.results
            .into_iter()
            .flat_map(|mut result| {
                let hits = result.matches.remove(CONTENT_MATCH_CATEGORY).unwrap_or_default();
                let path = result.path;
                hits.into_iter()
                    .map(move |hit| RawHit::new(path.clone(), hit.char_offset, hit.length))
            })
            .collect()
    }
}

/// Something that can execute a [`CodeSearchRequest`]
#[async_trait]
pub trait IndexTransport: Send + Sync {
    async fn fetch(&self, request: &CodeSearchRequest) -> Result<CodeSearchResponse>;

    /// Name used in log messages
    fn name(&self) -> &str;
}

/// Build the search-results URL for a project URI
pub fn search_endpoint(project_uri: &str) -> String {
    format!(
        "{}/_apis/search/codesearchresults?api-version={}",
        project_uri.trim_end_matches('/'),
        API_VERSION
    )
}

/// HTTP transport for Azure DevOps code search
pub struct HttpIndexTransport {
    client: reqwest::Client,
    endpoint: String,
    personal_access_token: Option<String>,
}

impl HttpIndexTransport {
    pub fn new(endpoint: impl Into<String>, personal_access_token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("fastnav/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            personal_access_token,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl IndexTransport for HttpIndexTransport {
    async fn fetch(&self, request: &CodeSearchRequest) -> Result<CodeSearchResponse> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(token) = &self.personal_access_token {
            builder = builder.basic_auth("", Some(token));
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to send search request to {}", self.endpoint))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("Code search API error ({}): {}", status, error_text);
        }

        response
            .json::<CodeSearchResponse>()
            .await
            .context("Failed to parse code search response as JSON")
    }

    fn name(&self) -> &str {
        "azure-devops"
    }
}
