//! Bridge tests against the real `fnav` binary as the child process

use fastnav::bridge::{Bridge, BridgeOptions, BridgeStatus};
use fastnav::{CodeSearchClient, QueryRequest, QueryType, RemoteSearch, RepoInfo, ResultCache};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Checkout whose config points the child at `endpoint`
fn repo_with_endpoint(endpoint: &str) -> (TempDir, RepoInfo) {
    let temp = TempDir::new().unwrap();
    let config_dir = temp.path().join(".fastnav");
    std::fs::create_dir(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.toml"),
        format!("[search]\nmode = \"direct\"\nendpoint = \"{}\"\n", endpoint),
    )
    .unwrap();

    let repo = RepoInfo::from_remote_url(temp.path(), "https://contoso.visualstudio.com/Tools/_git/Widgets").unwrap();
    (temp, repo)
}

/// Endpoint that refuses connections
fn unreachable_repo() -> (TempDir, RepoInfo) {
    repo_with_endpoint("http://127.0.0.1:9/search")
}

fn bridge_options(repo: RepoInfo) -> BridgeOptions {
    BridgeOptions {
        executable: PathBuf::from(env!("CARGO_BIN_EXE_fnav")),
        repo,
        connect_timeout: Duration::from_secs(20),
    }
}

fn request() -> QueryRequest {
    QueryRequest::new("Widget", 5, Duration::from_secs(20), true, QueryType::FindDefinitions)
}

#[tokio::test]
async fn test_bridge_connects_and_relays_errors() {
    let (_temp, repo) = unreachable_repo();
    let bridge = Bridge::new(bridge_options(repo));
    assert_eq!(bridge.status(), BridgeStatus::NotStarted);

    // The child is reachable, the index behind it is not
    let error = bridge.search(&request()).await.unwrap_err();
    assert_eq!(bridge.status(), BridgeStatus::Connected);
    assert!(format!("{:#}", error).contains("searchCode"));

    // Same session serves the next call
    assert!(bridge.search(&request()).await.is_err());
    assert_eq!(bridge.status(), BridgeStatus::Connected);

    bridge.shutdown();
    assert_eq!(bridge.status(), BridgeStatus::Terminated);
    assert!(bridge.search(&request()).await.is_err());
}

#[tokio::test]
async fn test_client_over_bridge_soft_fails() {
    let (_temp, repo) = unreachable_repo();
    let bridge = Arc::new(Bridge::new(bridge_options(repo)));
    let client = CodeSearchClient::new(bridge.clone(), ResultCache::default());

    let results = client
        .query("Widget", 5, Duration::from_secs(20), true, QueryType::FindReferences)
        .await;
    assert!(results.is_empty());
    assert!(client.cache().is_empty());
}

#[tokio::test]
async fn test_bridge_search_bounded_by_request_timeout() {
    // Accepts connections through the backlog but never answers
    let silent = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = format!("http://{}/search", silent.local_addr().unwrap());
    let (_temp, repo) = repo_with_endpoint(&endpoint);
    let bridge = Bridge::new(bridge_options(repo));

    let request = QueryRequest::new("Widget", 5, Duration::from_millis(500), true, QueryType::FindDefinitions);
    let error = bridge.search(&request).await.unwrap_err();
    assert!(format!("{:#}", error).contains("timed out"));

    // Only the call is abandoned, not the session
    assert_eq!(bridge.status(), BridgeStatus::Connected);
    assert!(bridge.search(&request).await.is_err());
    assert_eq!(bridge.status(), BridgeStatus::Connected);

    bridge.shutdown();
}

#[cfg(unix)]
#[tokio::test]
async fn test_child_exiting_before_connect_terminates_bridge() {
    let (_temp, repo) = unreachable_repo();
    let bridge = Bridge::new(BridgeOptions {
        executable: PathBuf::from("/bin/true"),
        repo,
        connect_timeout: Duration::from_secs(5),
    });

    assert!(bridge.search(&request()).await.is_err());
    assert_eq!(bridge.status(), BridgeStatus::Terminated);
}
