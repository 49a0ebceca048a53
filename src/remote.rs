//! The remote query capability
//!
//! Callers ask a [`RemoteSearch`] for located symbols and never learn where
//! the query actually runs. [`DirectSearch`] runs it in this process: it asks
//! the index transport for hits and reconciles them with the fan-out engine.
//! The bridged implementation lives in [`crate::bridge`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::SearchConfig;
use crate::fanout::{group_by_file, FanOutEngine};
use crate::models::{LocatedSymbol, QueryRequest, QueryType, QUERY_CODE_SEARCH_TIMEOUT};
use crate::repo::RepoInfo;
use crate::transport::{search_endpoint, CodeSearchRequest, HttpIndexTransport, IndexTransport};

/// Filter used by warm-up queries; chosen to match nothing
pub const WARM_UP_FILTER: &str = "_fastnav_warm_up_";

/// Something that can answer a [`QueryRequest`] with located symbols
#[async_trait]
pub trait RemoteSearch: Send + Sync {
    async fn search(&self, request: &QueryRequest) -> Result<Vec<LocatedSymbol>>;

    /// Pay connection/authentication latency ahead of the first real query
    async fn warm_up(&self) -> Result<()>;
}

/// Build the text sent to the index for `request`
///
/// e.g. `ext:cs def:Widget*` for a prefix definition search limited to C#.
pub fn search_text(request: &QueryRequest, file_extension: Option<&str>) -> String {
    let mut text = String::new();
    if let Some(ext) = file_extension {
        text.push_str("ext:");
        text.push_str(ext);
        text.push(' ');
    }
    text.push_str(request.query_type.search_prefix());
    text.push_str(&request.filter_text);
    if !request.exact_match {
        text.push('*');
    }
    text
}

/// Runs queries in-process
pub struct DirectSearch {
    transport: Arc<dyn IndexTransport>,
    engine: Arc<FanOutEngine>,
    filters: HashMap<String, Vec<String>>,
    file_extension: Option<String>,
}

impl DirectSearch {
    pub fn new(
        transport: Arc<dyn IndexTransport>,
        engine: Arc<FanOutEngine>,
        filters: HashMap<String, Vec<String>>,
    ) -> Self {
        Self {
            transport,
            engine,
            filters,
            file_extension: None,
        }
    }

    pub fn with_file_extension(mut self, file_extension: Option<String>) -> Self {
        self.file_extension = file_extension;
        self
    }

    /// Search `repo` over HTTP using the configured endpoint, token and branch
    pub fn from_repo(repo: &RepoInfo, config: &SearchConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| search_endpoint(&repo.project_uri));
        let transport = HttpIndexTransport::new(endpoint, config.personal_access_token.clone())?;
        let engine = FanOutEngine::new(&repo.root_dir)?;

        Ok(Self::new(Arc::new(transport), Arc::new(engine), repo.search_filters(&config.branch))
            .with_file_extension(config.file_extension.clone()))
    }
}

/// Sets the flag when dropped, so abandoned scans stop picking up files
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl RemoteSearch for DirectSearch {
    async fn search(&self, request: &QueryRequest) -> Result<Vec<LocatedSymbol>> {
        let index_request = CodeSearchRequest {
            search_text: search_text(request, self.file_extension.as_deref()),
            skip: 0,
            top: request.max_results,
            filters: self.filters.clone(),
            include_facets: false,
        };

        log::info!(
            "Querying {} code search with filter '{}'",
            self.transport.name(),
            index_request.search_text
        );
        let start = Instant::now();
        let response = self.transport.fetch(&index_request).await?;
        log::info!(
            "Response for '{}' completed in {:.2} seconds and contains {} result(s)",
            index_request.search_text,
            start.elapsed().as_secs_f64(),
            response.results.len()
        );

        let hits_by_file = group_by_file(response.into_hits());
        if hits_by_file.is_empty() {
            return Ok(Vec::new());
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let _guard = CancelOnDrop(Arc::clone(&cancel));
        let engine = Arc::clone(&self.engine);
        let request = request.clone();

        tokio::task::spawn_blocking(move || engine.locate(&hits_by_file, &request, &cancel))
            .await
            .context("Scan task failed")?
    }

    async fn warm_up(&self) -> Result<()> {
        let request = QueryRequest::new(WARM_UP_FILTER, 1, QUERY_CODE_SEARCH_TIMEOUT, true, QueryType::FindDefinitions);
        let located = self.search(&request).await?;
        log::debug!("Warm-up query returned {} result(s)", located.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{CodeHit, CodeResult, CodeSearchResponse};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Transport returning a canned response and recording requests
    struct FakeTransport {
        response: CodeSearchResponse,
        seen: Mutex<Vec<CodeSearchRequest>>,
    }

    #[async_trait]
    impl IndexTransport for FakeTransport {
        async fn fetch(&self, request: &CodeSearchRequest) -> Result<CodeSearchResponse> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(self.response.clone())
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    fn request(filter: &str, exact: bool, query_type: QueryType) -> QueryRequest {
        QueryRequest::new(filter, 50, QUERY_CODE_SEARCH_TIMEOUT, exact, query_type)
    }

    #[test]
    fn test_search_text() {
        assert_eq!(search_text(&request("Widget", true, QueryType::FindDefinitions), None), "def:Widget");
        assert_eq!(search_text(&request("Widget", false, QueryType::FindReferences), None), "Widget*");
        assert_eq!(
            search_text(&request("Widget", false, QueryType::FindDefinitions), Some("cs")),
            "ext:cs def:Widget*"
        );
    }

    #[tokio::test]
    async fn test_direct_search_end_to_end() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("src")).unwrap();
        std::fs::write(temp.path().join("src").join("Widget.cs"), "// Widget\r\nclass Widget {}\r\n").unwrap();

        let transport = Arc::new(FakeTransport {
            response: CodeSearchResponse {
                count: 1,
                results: vec![CodeResult {
                    path: "/src/Widget.cs".to_string(),
                    matches: HashMap::from([(
                        "content".to_string(),
                        vec![CodeHit { char_offset: 3, length: 6 }, CodeHit { char_offset: 17, length: 6 }],
                    )]),
                }],
            },
            seen: Mutex::new(Vec::new()),
        });
        let engine = Arc::new(FanOutEngine::with_parallelism(temp.path(), 2).unwrap());
        let filters = HashMap::from([("Branch".to_string(), vec!["master".to_string()])]);
        let search = DirectSearch::new(transport.clone(), engine, filters);

        let located = search.search(&request("Widget", true, QueryType::FindDefinitions)).await.unwrap();
        assert_eq!(located.len(), 1);
        assert_eq!(located[0].start_line, 1);
        assert_eq!(located[0].start_column, 6);
        assert_eq!(located[0].text, "Widget");

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].search_text, "def:Widget");
        assert_eq!(seen[0].top, 50);
        assert_eq!(seen[0].filters["Branch"], vec!["master"]);
    }

    #[tokio::test]
    async fn test_warm_up_issues_single_result_query() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport {
            response: CodeSearchResponse::default(),
            seen: Mutex::new(Vec::new()),
        });
        let engine = Arc::new(FanOutEngine::with_parallelism(temp.path(), 1).unwrap());
        let search = DirectSearch::new(transport.clone(), engine, HashMap::new());

        search.warm_up().await.unwrap();
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].top, 1);
        assert_eq!(seen[0].search_text, format!("def:{}", WARM_UP_FILTER));
    }
}
